//! The worker loop: the per-worker Active/Waiting state machine, idle-
//! timeout self-termination, and the worker-cache return/`close()` path on
//! retirement.
//!
//! Pop from the shared admitted queue, block with a timeout when empty,
//! retire past `unused_lifetime`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::job::{Job, TaskExecutor, WorkerFactory};
use crate::pool::PoolInner;

/// Entry point run on a freshly spawned worker thread. `executor` is this
/// worker's serial, stateful consumer; `pool` is shared with every other
/// worker and the pool handle itself.
///
/// The worker is "born Active" — the counters already reflect it as active
/// because it exists to service the job that triggered its spawn — so this
/// function never increments `active_workers` on entry, only on the
/// Waiting → Active transitions that follow an idle wait.
pub(crate) fn run<F: WorkerFactory>(pool: Arc<PoolInner<F>>, mut executor: F::Executor) {
    let mut active = true;

    loop {
        match dequeue(&pool) {
            Some(job) => {
                if !active {
                    pool.counters.waiting_workers.fetch_sub(1, Ordering::AcqRel);
                    pool.counters.active_workers.fetch_add(1, Ordering::AcqRel);
                    active = true;
                }
                pool.queue_size.fetch_sub(1, Ordering::AcqRel);
                run_job(&mut executor, job);
            }
            None => {
                if active {
                    transition_to_waiting(&pool);
                    active = false;
                }
                let unused_lifetime = pool.unused_lifetime();
                if wait_for_work(&pool, unused_lifetime) {
                    // Either woken by a signal or the queue already had
                    // work by the time we looked; loop back and dequeue.
                    continue;
                }
                if try_retire(&pool) {
                    pool.counters.waiting_workers.fetch_sub(1, Ordering::AcqRel);
                    pool.retire_executor(executor);
                    return;
                }
                // min_workers has since been raised, or another worker
                // already retired enough of the population; keep waiting.
            }
        }
    }
}

fn dequeue<F: WorkerFactory>(pool: &PoolInner<F>) -> Option<Job> {
    pool.queue.lock().pop_front()
}

fn run_job<E: TaskExecutor>(executor: &mut E, job: Job) {
    let start = Instant::now();
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| executor.execute(job)));
    if result.is_err() {
        tracing::error!("task panicked; worker continues");
    }
    tracing::trace!(elapsed = ?start.elapsed(), "task executed");
}

fn transition_to_waiting<F: WorkerFactory>(pool: &PoolInner<F>) {
    let prev = pool.counters.active_workers.fetch_sub(1, Ordering::AcqRel);
    if prev == 1 {
        pool.notify_idle();
    }
    pool.counters.waiting_workers.fetch_add(1, Ordering::AcqRel);
}

/// Wait on the pool monitor for up to `timeout`. Returns `true` if work is
/// (or becomes) available, `false` if the wait timed out with the queue
/// still empty.
fn wait_for_work<F: WorkerFactory>(pool: &PoolInner<F>, timeout: Duration) -> bool {
    let mut q = pool.queue.lock();
    if !q.is_empty() {
        return true;
    }
    let result = pool.monitor.wait_for(&mut q, timeout);
    !(result.timed_out() && q.is_empty())
}

/// Attempt to retire: compare-and-decrement `thread_count` only if the
/// population exceeds `min_workers`.
fn try_retire<F: WorkerFactory>(pool: &PoolInner<F>) -> bool {
    let min_workers = pool.min_workers();
    loop {
        let count = pool.counters.thread_count.load(Ordering::Acquire);
        if count <= min_workers {
            return false;
        }
        if pool
            .counters
            .thread_count
            .compare_exchange(count, count - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::OsSpawner;
    use crate::config::PoolConfig;
    use crate::job::InlineWorkerFactory;
    use crate::pool::ElasticExecutor;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn min_max_zero_spawns_and_retires_per_submit() {
        let pool = ElasticExecutor::new(
            InlineWorkerFactory,
            PoolConfig {
                min_workers: 0,
                max_workers: 0,
                unused_lifetime: Duration::from_millis(30),
                ..Default::default()
            },
            Arc::new(OsSpawner),
        )
        .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        // max_workers = 0 leaves no standing capacity, but a submission
        // still gets an ephemeral worker that drains the queue and then
        // retires, rather than leaving the job stuck forever.
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        assert!(pool.wait_until_idle(Some(Duration::from_secs(5))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(pool.thread_count(), 0);
    }
}
