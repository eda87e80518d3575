//! The crate's error type.
//!
//! Runtime failures in submitted jobs and scheduled callbacks never surface
//! here — they are reported via `tracing` and swallowed at the worker or
//! dispatcher. `Error` only covers the two cases the core reports
//! synchronously: bad configuration, and a worker factory that is exhausted
//! on the very first spawn a pool ever attempts.

use thiserror::Error;

/// Errors surfaced synchronously by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// `set_range`/`ElasticExecutor::new` was given `min_workers > max_workers`.
    #[error("invalid worker range: min_workers ({min}) > max_workers ({max})")]
    ConfigurationError {
        /// The rejected `min_workers`.
        min: usize,
        /// The rejected `max_workers`.
        max: usize,
    },

    /// The worker factory returned `None` (or the configured [`Spawner`]
    /// failed) while spawning the pool's very first worker. Every later
    /// spawn failure is absorbed silently and logged instead, since
    /// existing workers can still drain the queue.
    ///
    /// [`Spawner`]: crate::collab::Spawner
    #[error("worker factory/spawner failed on the pool's first worker spawn")]
    SpawnFailure,
}

/// A convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
