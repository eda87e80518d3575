//! The configuration envelope: plain structs with every field carrying its
//! default as a doc comment.

use std::sync::Arc;
use std::time::Duration;

use crate::collab::{Clock, OsSpawner, Spawner, SystemClock};

/// Submissions are never admitted past this many queued jobs, regardless of
/// what `max_queue_size` is configured to.
pub const MAX_QUEUE_SIZE_CAP: usize = 1_000_000_000;

/// Configuration for an [`ElasticExecutor`](crate::pool::ElasticExecutor).
///
/// All fields have documented defaults via [`Default`]; every field can
/// also be changed after construction through the executor's mutator
/// methods.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers are never retired below this population. Default `0`.
    pub min_workers: usize,
    /// Workers are never grown past this population. Default
    /// `max(1, available_parallelism - 1)`.
    pub max_workers: usize,
    /// Submissions are rejected once the queue reaches this length.
    /// Default: unbounded (capped at [`MAX_QUEUE_SIZE_CAP`]).
    pub max_queue_size: usize,
    /// How long an idle worker above `min_workers` waits before retiring.
    /// Default `100ms`.
    pub unused_lifetime: Duration,
    /// Whether a retiring worker's `TaskExecutor` is kept in a cache for
    /// reuse by the next spawned worker. Default `false`.
    pub cache_workers: bool,
    /// Identifier used as a prefix in spawned worker thread names. Default
    /// `"pool"`.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 0,
            max_workers: 1.max(num_cpus::get().saturating_sub(1)),
            max_queue_size: MAX_QUEUE_SIZE_CAP,
            unused_lifetime: Duration::from_millis(100),
            cache_workers: false,
            name: "pool".to_string(),
        }
    }
}

/// Configuration for a [`TimerScheduler`](crate::scheduler::TimerScheduler).
pub struct SchedulerConfig {
    /// Source of `now()` used by the dispatcher and by `TaskHandle`'s
    /// `run_next_in`/`run_immediately`. Default: the system wall clock.
    pub clock: Arc<dyn Clock>,
    /// Used to spawn the dispatcher thread itself. Default: the OS thread
    /// constructor.
    pub spawner: Arc<dyn Spawner>,
    /// Identifier used in the dispatcher thread's name. Default
    /// `"scheduler"`.
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            spawner: Arc::new(OsSpawner),
            name: "scheduler".to_string(),
        }
    }
}

impl std::fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults_are_sane() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.min_workers, 0);
        assert!(cfg.max_workers >= 1);
        assert_eq!(cfg.max_queue_size, MAX_QUEUE_SIZE_CAP);
        assert_eq!(cfg.unused_lifetime, Duration::from_millis(100));
        assert!(!cfg.cache_workers);
    }
}
