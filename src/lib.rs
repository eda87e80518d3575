//!
//!
//!
//! `elastic-runtime` is an adaptive, bounded-queue worker pool paired with a
//! cooperative timer scheduler.
//!
//! [`ElasticExecutor`] grows its worker population on demand as work arrives,
//! up to a configured cap, and shrinks it back down once workers sit idle
//! past an `unused_lifetime`. [`TimerScheduler`] drives any number of
//! periodic or one-shot [`TaskHandle`]s from a single dispatcher thread,
//! fanning long work out to an `ElasticExecutor`, a UI thread, or running it
//! inline.
//!
//! Neither type references a concrete OS thread API or UI toolkit directly;
//! both go through the [`collab`] traits (`Clock`, `Spawner`, `UiInvoke`) so
//! a host can substitute fakes in tests or route UI dispatch to whatever
//! event loop it already has.
//!

// Force missing implementations
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(unused_imports)]
#![forbid(unused_must_use)]
#![forbid(unused_import_braces)]

pub mod collab;
pub mod config;
pub mod error;
pub mod handle;
pub mod job;
pub mod pool;
pub mod scheduler;

pub(crate) mod counters;
pub(crate) mod worker;
pub(crate) mod worker_id;

///
/// Prelude of `elastic-runtime`.
pub mod prelude {
    pub use crate::collab::{Clock, OsSpawner, Spawner, SystemClock, UiInvoke};
    pub use crate::config::{PoolConfig, SchedulerConfig};
    pub use crate::error::{Error, Result};
    pub use crate::handle::{TaskHandle, Threading};
    pub use crate::job::{InlineExecutor, InlineWorkerFactory, Job, TaskExecutor, WorkerFactory};
    pub use crate::pool::ElasticExecutor;
    pub use crate::scheduler::{AccessoryRunner, TimerScheduler};
}

use std::sync::Arc;

use once_cell::sync::OnceCell;

pub use crate::error::{Error, Result};
pub use crate::handle::{TaskHandle, Threading};
pub use crate::job::{InlineExecutor, InlineWorkerFactory, Job, TaskExecutor, WorkerFactory};
pub use crate::pool::ElasticExecutor;
pub use crate::scheduler::TimerScheduler;

static COMMON: OnceCell<ElasticExecutor<InlineWorkerFactory>> = OnceCell::new();

/// A lazily initialized, process-wide pool for fire-and-forget work that
/// doesn't warrant its own dedicated pool.
///
/// The instance is built on first access, using [`config::PoolConfig::default`]
/// and [`collab::OsSpawner`], and is shared by every caller thereafter. Opt
/// into it deliberately — most code should own an explicit `ElasticExecutor`
/// instead, built with whatever `Spawner`/`WorkerFactory` the host actually
/// needs, since a shared global pool is much harder to reason about under
/// load than one scoped to the subsystem using it.
pub fn common() -> &'static ElasticExecutor<InlineWorkerFactory> {
    COMMON.get_or_init(|| {
        ElasticExecutor::new(
            InlineWorkerFactory,
            config::PoolConfig {
                name: "common".to_string(),
                ..Default::default()
            },
            Arc::new(collab::OsSpawner),
        )
        .expect("the common pool's first worker spawn should not fail under default configuration")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_pool_is_shared_across_calls() {
        let a = common();
        let b = common();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn common_pool_runs_submitted_work() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let done = Arc::new(AtomicBool::new(false));
        let d = done.clone();
        common()
            .submit(Box::new(move || d.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(common().wait_until_idle(Some(std::time::Duration::from_secs(5))));
        assert!(done.load(Ordering::SeqCst));
    }
}
