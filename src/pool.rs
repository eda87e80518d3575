//! `ElasticExecutor`: the admission-controlled, bounded-queue, adaptively
//! sized worker pool.
//!
//! A cheap `Clone`-able handle wrapping `Arc`-shared pool state; the
//! admission/queue/condvar algorithm follows the "hold the lock while
//! setting ready to avoid lost wakeup" condvar discipline common to
//! worker-pool implementations.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::AtomicUsize;

use crate::collab::Spawner;
use crate::config::PoolConfig;
use crate::counters::PopulationCounters;
use crate::error::Error;
use crate::job::{Job, TaskExecutor, WorkerFactory};
use crate::worker;
use crate::worker_id::WorkerIdGen;

/// A live, mutable slice of [`PoolConfig`] the pool reads on every
/// operation; updated in place by the executor's mutator methods.
struct LiveConfig {
    min_workers: usize,
    max_workers: usize,
    max_queue_size: usize,
    unused_lifetime: Duration,
    cache_workers: bool,
    spawner: Arc<dyn Spawner>,
    name: String,
}

pub(crate) struct PoolInner<F: WorkerFactory> {
    factory: F,
    pub(crate) queue: Mutex<VecDeque<Job>>,
    pub(crate) queue_size: CachePadded<AtomicUsize>,
    pub(crate) monitor: Condvar,
    pub(crate) idle_lock: Mutex<()>,
    pub(crate) idle_monitor: Condvar,
    pub(crate) counters: PopulationCounters,
    config: RwLock<LiveConfig>,
    cache: Mutex<VecDeque<F::Executor>>,
    worker_id_gen: WorkerIdGen,
}

/// The bounded-queue, adaptively sized worker pool.
///
/// Cheap to clone: every clone shares the same underlying state via `Arc`.
/// Generic over a [`WorkerFactory`] that produces the per-worker
/// [`TaskExecutor`] state.
pub struct ElasticExecutor<F: WorkerFactory> {
    pub(crate) inner: Arc<PoolInner<F>>,
}

impl<F: WorkerFactory> Clone for ElasticExecutor<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: WorkerFactory> ElasticExecutor<F> {
    /// Build a new pool. Fails only if `config.min_workers > config.max_workers`.
    pub fn new(factory: F, config: PoolConfig, spawner: Arc<dyn Spawner>) -> Result<Self, Error> {
        if config.min_workers > config.max_workers {
            return Err(Error::ConfigurationError {
                min: config.min_workers,
                max: config.max_workers,
            });
        }
        let inner = PoolInner {
            factory,
            queue: Mutex::new(VecDeque::new()),
            queue_size: CachePadded::new(AtomicUsize::new(0)),
            monitor: Condvar::new(),
            idle_lock: Mutex::new(()),
            idle_monitor: Condvar::new(),
            counters: PopulationCounters::new(),
            config: RwLock::new(LiveConfig {
                min_workers: config.min_workers,
                max_workers: config.max_workers,
                max_queue_size: config.max_queue_size.min(crate::config::MAX_QUEUE_SIZE_CAP),
                unused_lifetime: config.unused_lifetime,
                cache_workers: config.cache_workers,
                spawner,
                name: config.name,
            }),
            cache: Mutex::new(VecDeque::new()),
            worker_id_gen: WorkerIdGen::new(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn name(&self) -> String {
        self.inner.config.read().name.clone()
    }

    /// Submit a job. Returns `Ok(true)` iff admitted, `Ok(false)` iff the
    /// queue was at its cap, and `Err` only when the pool's very first
    /// worker spawn ever fails.
    pub fn submit(&self, job: Job) -> Result<bool, Error> {
        let max_queue_size = self.inner.config.read().max_queue_size;

        loop {
            let cur = self.inner.queue_size.load(Ordering::Acquire);
            if cur >= max_queue_size {
                return Ok(false);
            }
            if self
                .inner
                .queue_size
                .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        {
            let mut q = self.inner.queue.lock();
            q.push_back(job);
        }

        if self.inner.counters.waiting_workers() > 0 {
            self.inner.monitor.notify_one();
            return Ok(true);
        }

        self.grow_if_needed()?;
        Ok(true)
    }

    /// Attempt to spawn one more worker if the population is below
    /// `max_workers`. Includes the fatal-only-on-first-spawn rule.
    ///
    /// `max_workers == 0` is a special case: rather than never spawning at
    /// all, which would leave submitted jobs stuck in the queue forever, a
    /// single ephemeral worker is allowed to come up to drain the queue and
    /// then retire once idle past `unused_lifetime`, same as any worker
    /// above `min_workers`. This is the documented boundary behavior for a
    /// pool configured with no standing capacity.
    fn grow_if_needed(&self) -> Result<(), Error> {
        let max_workers = self.inner.config.read().max_workers;
        let effective_cap = max_workers.max(1);
        let mut count = self.inner.counters.thread_count.load(Ordering::Acquire);
        loop {
            if count >= effective_cap {
                return Ok(());
            }
            match self.inner.counters.thread_count.compare_exchange(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let is_first = count == 0;
                    // Born active: it exists to service the job we just enqueued.
                    self.inner.counters.active_workers.fetch_add(1, Ordering::AcqRel);
                    if let Err(e) = self.spawn_worker(is_first) {
                        self.inner.counters.thread_count.fetch_sub(1, Ordering::AcqRel);
                        self.inner.counters.active_workers.fetch_sub(1, Ordering::AcqRel);
                        if is_first {
                            return Err(e);
                        }
                    }
                    return Ok(());
                }
                Err(actual) => count = actual,
            }
        }
    }

    fn spawn_worker(&self, is_first: bool) -> Result<(), Error> {
        let cached = self.inner.cache.lock().pop_front();
        let executor = match cached {
            Some(e) => Some(e),
            None => self.inner.factory.create(),
        };
        let executor = match executor {
            Some(e) => e,
            None => {
                if is_first {
                    tracing::error!(pool = %self.name(), "worker factory exhausted on the pool's first spawn");
                    return Err(Error::SpawnFailure);
                }
                tracing::warn!(pool = %self.name(), "worker factory exhausted; pool will not grow further for now");
                return Ok(());
            }
        };

        let id = self.inner.worker_id_gen.next();
        let name = format!("{}-{}", self.name(), id);
        let pool = self.inner.clone();
        let job: Job = Box::new(move || worker::run(pool, executor));

        let spawner = self.inner.config.read().spawner.clone();
        match spawner.spawn(&name, job) {
            Ok(()) => Ok(()),
            Err(e) => {
                if is_first {
                    tracing::error!(pool = %self.name(), error = %e, "OS thread spawn failed on the pool's first worker");
                    Err(Error::SpawnFailure)
                } else {
                    tracing::warn!(pool = %self.name(), error = %e, "OS thread spawn failed; pool will not grow further for now");
                    Ok(())
                }
            }
        }
    }

    /// Block until [`is_active`](Self::is_active) is false, or `timeout`
    /// elapses. `timeout = None` waits indefinitely. Returns `true` iff the
    /// pool went idle before the deadline.
    pub fn wait_until_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if !self.is_active() {
                return true;
            }
            let mut guard = self.inner.idle_lock.lock();
            if !self.is_active() {
                return true;
            }
            match deadline {
                None => {
                    self.inner.idle_monitor.wait(&mut guard);
                }
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return !self.is_active();
                    }
                    let result = self.inner.idle_monitor.wait_for(&mut guard, dl - now);
                    if result.timed_out() && self.is_active() {
                        return false;
                    }
                }
            }
        }
    }

    /// Drain the queue, invoking `on_each` once per dropped job. Does not
    /// cancel in-flight executions. Returns the number of jobs dropped.
    pub fn clear(&self, mut on_each: impl FnMut(Job)) -> usize {
        let drained: Vec<Job> = {
            let mut q = self.inner.queue.lock();
            q.drain(..).collect()
        };
        let n = drained.len();
        if n > 0 {
            self.inner.queue_size.fetch_sub(n, Ordering::AcqRel);
        }
        for job in drained {
            on_each(job);
        }
        n
    }

    /// Change the worker population bounds. Lowering `min` wakes all
    /// waiting workers so they can re-evaluate whether to retire.
    pub fn set_range(&self, min: usize, max: usize) -> Result<(), Error> {
        if min > max {
            return Err(Error::ConfigurationError { min, max });
        }
        let lowered_min = {
            let mut cfg = self.inner.config.write();
            let lowered = min < cfg.min_workers;
            cfg.min_workers = min;
            cfg.max_workers = max;
            lowered
        };
        if lowered_min {
            self.wake_all_workers();
        }
        Ok(())
    }

    /// Change the admission cap.
    pub fn set_max_queue_size(&self, max_queue_size: usize) {
        let mut cfg = self.inner.config.write();
        cfg.max_queue_size = max_queue_size.min(crate::config::MAX_QUEUE_SIZE_CAP);
    }

    /// Change how long an idle worker waits before retiring. Lowering it
    /// wakes all waiting workers so they can re-evaluate against the new
    /// value immediately rather than finishing out their old wait.
    pub fn set_unused_lifetime(&self, unused_lifetime: Duration) {
        let lowered = {
            let mut cfg = self.inner.config.write();
            let lowered = unused_lifetime < cfg.unused_lifetime;
            cfg.unused_lifetime = unused_lifetime;
            lowered
        };
        if lowered {
            self.wake_all_workers();
        }
    }

    /// Toggle whether retiring workers' `TaskExecutor`s are cached for
    /// reuse. Turning caching off drains and closes every cached executor
    /// under the same lock used to push into the cache, so no retiring
    /// worker can race a disable with its own cache insertion.
    pub fn set_worker_caching(&self, enabled: bool) {
        let was_enabled = {
            let mut cfg = self.inner.config.write();
            let was = cfg.cache_workers;
            cfg.cache_workers = enabled;
            was
        };
        if was_enabled && !enabled {
            let drained: Vec<F::Executor> = {
                let mut cache = self.inner.cache.lock();
                cache.drain(..).collect()
            };
            for mut executor in drained {
                if let Err(e) = executor.close() {
                    tracing::warn!(pool = %self.name(), error = %e, "failed to close cached executor while disabling the cache");
                }
            }
        }
    }

    /// Replace the thread spawner used for future workers.
    pub fn set_spawner(&self, spawner: Arc<dyn Spawner>) {
        self.inner.config.write().spawner = spawner;
    }

    fn wake_all_workers(&self) {
        let _guard = self.inner.queue.lock();
        self.inner.monitor.notify_all();
    }

    /// Current logical queue length.
    pub fn queue_size(&self) -> usize {
        self.inner.queue_size.load(Ordering::Acquire)
    }

    /// Current total worker population.
    pub fn thread_count(&self) -> usize {
        self.inner.counters.thread_count()
    }

    /// Workers currently executing a job.
    pub fn active_threads(&self) -> usize {
        self.inner.counters.active_workers()
    }

    /// `active_threads() > 0 || queue_size() > 0`.
    pub fn is_active(&self) -> bool {
        self.active_threads() > 0 || self.queue_size() > 0
    }

    /// Wrap this pool as a `Job -> bool` adapter suitable for
    /// `TimerScheduler`'s `Threading::Any` dispatch target.
    pub fn as_accessory_runner(&self) -> crate::scheduler::AccessoryRunner {
        let pool = self.clone();
        Arc::new(move |job: Job| match pool.submit(job) {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::error!(pool = %pool.name(), error = %e, "scheduler's pool rejected a task: fatal spawn failure");
                false
            }
        })
    }
}

impl<F: WorkerFactory> PoolInner<F> {
    pub(crate) fn unused_lifetime(&self) -> Duration {
        self.config.read().unused_lifetime
    }

    pub(crate) fn min_workers(&self) -> usize {
        self.config.read().min_workers
    }

    pub(crate) fn cache_workers(&self) -> bool {
        self.config.read().cache_workers
    }

    pub(crate) fn notify_idle(&self) {
        let _guard = self.idle_lock.lock();
        self.idle_monitor.notify_all();
    }

    pub(crate) fn retire_executor(&self, mut executor: F::Executor) {
        if self.cache_workers() {
            self.cache.lock().push_back(executor);
        } else if let Err(e) = executor.close() {
            tracing::error!(error = %e, "TaskExecutor::close failed");
        }
    }
}
