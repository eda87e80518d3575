//! `TimerScheduler`: a single dispatcher thread that drives many periodic
//! or one-shot `TaskHandle`s, sleeping until the earliest is due and
//! dispatching each to the dispatcher thread itself, a UI thread, or an
//! `ElasticExecutor`.
//!
//! The dispatcher CASes an atomic flag and parks; any mutator that needs to
//! shorten the next wake wins the CAS and unparks it directly. Each pass
//! walks a `Vec<TaskHandle>` once and parks the dispatcher thread until the
//! nearest due time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::{self, Thread};
use std::time::Duration;

use parking_lot::Mutex;

use crate::collab::{Clock, Spawner, UiInvoke};
use crate::config::SchedulerConfig;
use crate::handle::{MinNextRun, TaskHandle, Threading, Waker, WeakTaskHandle};
use crate::job::Job;

/// Adapter from a `Threading::Any` dispatch to `ElasticExecutor::submit`,
/// decoupling the scheduler from the executor's `WorkerFactory` type
/// parameter. Build one with
/// [`ElasticExecutor::as_accessory_runner`](crate::pool::ElasticExecutor::as_accessory_runner).
pub type AccessoryRunner = Arc<dyn Fn(Job) -> bool + Send + Sync>;

/// The dispatcher's idle poll interval used when no handle is currently due
/// (e.g. every registered handle is inactive). Bounds how quickly a
/// reactivation is noticed even if, for some reason, its wake-up signal was
/// missed.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct Inner {
    /// Weak references only: a handle is pruned once the caller drops every
    /// strong `TaskHandle` pointing at it, which is how the registry can
    /// ever become empty again and let the dispatcher thread exit.
    handles: Mutex<Vec<WeakTaskHandle>>,
    should_run: AtomicBool,
    sleeping: AtomicBool,
    dispatcher_thread: StdMutex<Option<Thread>>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawner>,
    ui_invoke: Option<Arc<dyn UiInvoke>>,
    accessory_runner: AccessoryRunner,
    name: String,
}

impl Waker for Inner {
    fn wake(&self) {
        if self.sleeping.swap(false, Ordering::AcqRel) {
            if let Some(thread) = self.dispatcher_thread.lock().unwrap().as_ref() {
                thread.unpark();
            }
        }
    }
}

/// A single dispatcher thread driving an arbitrary set of periodic or
/// one-shot tasks, fanning long work out to an `ElasticExecutor` or a UI
/// thread.
pub struct TimerScheduler {
    inner: Arc<Inner>,
}

impl Clone for TimerScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl TimerScheduler {
    /// Build a scheduler. The dispatcher thread is not started until the
    /// first handle is registered via [`build`](Self::build).
    pub fn new(
        config: SchedulerConfig,
        ui_invoke: Option<Arc<dyn UiInvoke>>,
        accessory_runner: AccessoryRunner,
    ) -> Self {
        let inner = Arc::new(Inner {
            handles: Mutex::new(Vec::new()),
            should_run: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
            dispatcher_thread: StdMutex::new(None),
            clock: config.clock,
            spawner: config.spawner,
            ui_invoke,
            accessory_runner,
            name: config.name,
        });
        Self { inner }
    }

    /// Register a new, inactive handle with `threading = Any`, no
    /// frequency, and unlimited remaining count. Starts the dispatcher
    /// thread if this is the first handle ever registered.
    pub fn build<R>(&self, runnable: R) -> TaskHandle
    where
        R: FnMut() + Send + 'static,
    {
        let waker: Arc<dyn Waker> = self.inner.clone();
        let handle = TaskHandle::new(Box::new(runnable), self.inner.clock.clone(), Arc::downgrade(&waker));

        let became_nonempty = {
            let mut handles = self.inner.handles.lock();
            handles.push(handle.downgrade());
            handles.len() == 1
        };
        if became_nonempty {
            self.start_dispatcher();
        }
        handle
    }

    fn start_dispatcher(&self) {
        if self
            .inner
            .should_run
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = self.inner.clone();
        let name = format!("{}-dispatcher", self.inner.name);
        let job: Job = Box::new(move || dispatcher_loop(inner));
        if let Err(e) = self.inner.spawner.spawn(&name, job) {
            tracing::error!(scheduler = %self.inner.name, error = %e, "failed to start the timer dispatcher thread");
            self.inner.should_run.store(false, Ordering::Release);
        }
    }

    /// Number of handles currently registered (active or not) whose caller
    /// still holds a strong reference.
    pub fn handle_count(&self) -> usize {
        self.inner
            .handles
            .lock()
            .iter()
            .filter(|h| h.upgrade().is_some())
            .count()
    }
}

fn dispatcher_loop(inner: Arc<Inner>) {
    {
        let mut t = inner.dispatcher_thread.lock().unwrap();
        *t = Some(thread::current());
    }

    let span = tracing::trace_span!("timer.dispatcher", scheduler = %inner.name);
    let _guard = span.enter();

    loop {
        if !inner.should_run.load(Ordering::Acquire) {
            break;
        }

        // Prune any handle whose caller has dropped every strong reference
        // to it, and upgrade the rest; this is the only place the registry
        // can shrink back to empty.
        let handles: Vec<TaskHandle> = {
            let mut registry = inner.handles.lock();
            let mut live = Vec::with_capacity(registry.len());
            registry.retain(|weak| match weak.upgrade() {
                Some(handle) => {
                    live.push(handle);
                    true
                }
                None => false,
            });
            live
        };

        if handles.is_empty() {
            inner.should_run.store(false, Ordering::Release);
            break;
        }

        let now = inner.clock.now();
        let mut min_next_run = MinNextRun::new();

        for handle in &handles {
            if let Some(threading) = handle.should_execute(now, &mut min_next_run) {
                dispatch(&inner, handle.clone(), threading, &mut min_next_run);
            }
        }

        if !inner.should_run.load(Ordering::Acquire) {
            break;
        }

        let sleep_for = min_next_run
            .sleep_duration(inner.clock.now())
            .unwrap_or(IDLE_POLL_INTERVAL);

        if sleep_for > Duration::ZERO {
            inner.sleeping.store(true, Ordering::Release);
            thread::park_timeout(sleep_for);
            inner.sleeping.store(false, Ordering::Release);
        }
    }

    *inner.dispatcher_thread.lock().unwrap() = None;
}

fn dispatch(inner: &Arc<Inner>, handle: TaskHandle, threading: Threading, min_next_run: &mut MinNextRun) {
    match threading {
        Threading::Timer => {
            handle.run();
        }
        Threading::Ui => match &inner.ui_invoke {
            Some(ui) => {
                let h = handle.clone();
                ui.invoke(Box::new(move || h.run()));
            }
            None => {
                tracing::warn!(
                    scheduler = %inner.name,
                    "TaskHandle is configured for Threading::Ui but no UI invoke callback is set; running inline"
                );
                handle.run();
            }
        },
        Threading::Any => {
            let h = handle.clone();
            let admitted = (inner.accessory_runner)(Box::new(move || h.run()));
            if !admitted {
                tracing::warn!(scheduler = %inner.name, "pool rejected a due scheduled task; retrying next pass");
                handle.cancel_pending_dispatch();
                min_next_run.mark_immediate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{OsSpawner, SystemClock};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutexTest;

    fn scheduler() -> TimerScheduler {
        TimerScheduler::new(
            SchedulerConfig {
                clock: Arc::new(SystemClock),
                spawner: Arc::new(OsSpawner),
                name: "test".to_string(),
            },
            None,
            Arc::new(|job: Job| {
                job();
                true
            }),
        )
    }

    #[test]
    fn one_shot_runs_once() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = scheduler.build(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.run_immediately();
        handle.set_active(true);

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());
    }

    #[test]
    fn periodic_handle_runs_multiple_times() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = scheduler.build(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle
            .set_frequency(Duration::from_millis(20), false)
            .run_immediately();
        handle.set_active(true);

        std::thread::sleep(Duration::from_millis(250));
        handle.set_active(false);
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn dispatcher_stops_once_every_handle_is_dropped() {
        let scheduler = scheduler();
        {
            let handle = scheduler.build(|| {});
            handle.run_immediately();
            handle.set_active(true);
            std::thread::sleep(Duration::from_millis(50));
            assert_eq!(scheduler.handle_count(), 1);
        }
        // `handle` was just dropped; the dispatcher only notices on its next
        // pass, which for an inactive registry is paced by IDLE_POLL_INTERVAL.
        std::thread::sleep(IDLE_POLL_INTERVAL + Duration::from_millis(300));
        assert_eq!(scheduler.handle_count(), 0);
        assert!(!scheduler.inner.should_run.load(Ordering::Acquire));
        assert!(scheduler.inner.dispatcher_thread.lock().unwrap().is_none());
    }

    #[test]
    fn ui_dispatch_preserves_registration_order() {
        let log: Arc<StdMutexTest<Vec<u32>>> = Arc::new(StdMutexTest::new(Vec::new()));

        struct QueueUi(Arc<StdMutexTest<Vec<Job>>>);
        impl UiInvoke for QueueUi {
            fn invoke(&self, job: Job) {
                self.0.lock().unwrap().push(job);
            }
        }

        let queue: Arc<StdMutexTest<Vec<Job>>> = Arc::new(StdMutexTest::new(Vec::new()));
        let scheduler = TimerScheduler::new(
            SchedulerConfig {
                clock: Arc::new(SystemClock),
                spawner: Arc::new(OsSpawner),
                name: "ui-test".to_string(),
            },
            Some(Arc::new(QueueUi(queue.clone()))),
            Arc::new(|job: Job| {
                job();
                true
            }),
        );

        let l1 = log.clone();
        let h1 = scheduler.build(move || l1.lock().unwrap().push(1));
        h1.with_threading(Threading::Ui).run_immediately();
        h1.set_active(true);

        let l2 = log.clone();
        let h2 = scheduler.build(move || l2.lock().unwrap().push(2));
        h2.with_threading(Threading::Ui).run_immediately();
        h2.set_active(true);

        std::thread::sleep(Duration::from_millis(200));

        let mut jobs = queue.lock().unwrap();
        assert_eq!(jobs.len(), 2);
        for job in jobs.drain(..) {
            job();
        }
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }
}
