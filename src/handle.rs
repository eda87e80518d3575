//! `TaskHandle`: the scheduler's record for one periodic or one-shot task,
//! its fluent configuration surface, and the due-time arithmetic
//! (`should_execute` / post-execution housekeeping) that drives the
//! dispatcher loop in `scheduler.rs`.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::collab::Clock;

/// Which thread a due [`TaskHandle`] is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Threading {
    /// Run inline on the dispatcher thread. Only suitable for very short
    /// work — a long-running `Timer` task stalls every other timer.
    Timer,
    /// Hand to the injected "invoke on UI thread" callback.
    Ui,
    /// Hand to the `ElasticExecutor` behind the scheduler's accessory
    /// runner. The default.
    #[default]
    Any,
}

/// An accumulator for the earliest instant any registered handle is next
/// due, folded across one dispatcher pass.
///
/// `Immediate` is the "past" sentinel: once set, the dispatcher
/// should re-poll with no sleep at all, overriding any `At` value folded in
/// afterwards.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MinNextRun {
    /// No handle examined so far is due at a known future instant.
    Unset,
    /// The earliest known due instant across handles examined so far.
    At(Instant),
    /// At least one handle needs immediate re-evaluation.
    Immediate,
}

impl MinNextRun {
    pub(crate) fn new() -> Self {
        MinNextRun::Unset
    }

    pub(crate) fn mark_immediate(&mut self) {
        *self = MinNextRun::Immediate;
    }

    pub(crate) fn fold(&mut self, candidate: Instant) {
        match *self {
            MinNextRun::Immediate => {}
            MinNextRun::Unset => *self = MinNextRun::At(candidate),
            MinNextRun::At(current) => *self = MinNextRun::At(current.min(candidate)),
        }
    }

    /// How long the dispatcher should sleep, or `None` if nothing is due
    /// and it should fall back to its idle poll interval.
    pub(crate) fn sleep_duration(&self, now: Instant) -> Option<Duration> {
        match *self {
            MinNextRun::Immediate => Some(Duration::ZERO),
            MinNextRun::Unset => None,
            MinNextRun::At(at) => Some(at.saturating_duration_since(now)),
        }
    }
}

/// Something that can be nudged to re-evaluate its sleep early. Implemented
/// by the scheduler's dispatcher state; a `TaskHandle` holds a weak
/// reference to it so that configuration changes can interrupt the
/// dispatcher's sleep without the handle keeping the scheduler alive.
pub(crate) trait Waker: Send + Sync {
    fn wake(&self);
}

struct State {
    active: bool,
    frequency: Option<Duration>,
    consistent: bool,
    next_run: Option<Instant>,
    previous_run: Option<Instant>,
    last_run: Option<Instant>,
    remaining_count: Option<u64>,
    run_after_last: bool,
    exec_count: u64,
    threading: Threading,
    waiting: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            active: false,
            frequency: None,
            consistent: false,
            next_run: None,
            previous_run: None,
            last_run: None,
            remaining_count: None,
            run_after_last: true,
            exec_count: 0,
            threading: Threading::Any,
            waiting: false,
        }
    }
}

struct Inner {
    runnable: Mutex<Box<dyn FnMut() + Send>>,
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    waker: Weak<dyn Waker>,
}

/// A scheduled periodic or one-shot task.
///
/// Cheap to clone (an `Arc` around shared state). The scheduler's registry
/// holds only a [`WeakTaskHandle`] to each one, so a handle is pruned from
/// the registry once every strong clone the caller holds is dropped. All
/// methods are safe to call from any thread; configuration changes that
/// could shorten the next due time wake the dispatcher's sleep.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<Inner>,
}

/// A non-owning reference to a [`TaskHandle`], held by the scheduler's
/// registry instead of a strong clone so the registry can tell when a
/// caller has dropped every handle pointing at the same task.
#[derive(Clone)]
pub(crate) struct WeakTaskHandle {
    inner: Weak<Inner>,
}

impl WeakTaskHandle {
    /// Upgrade to a strong [`TaskHandle`], or `None` if every strong
    /// reference has already been dropped.
    pub(crate) fn upgrade(&self) -> Option<TaskHandle> {
        self.inner.upgrade().map(|inner| TaskHandle { inner })
    }
}

impl TaskHandle {
    pub(crate) fn new(
        runnable: Box<dyn FnMut() + Send>,
        clock: Arc<dyn Clock>,
        waker: Weak<dyn Waker>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runnable: Mutex::new(runnable),
                state: Mutex::new(State::default()),
                clock,
                waker,
            }),
        }
    }

    /// A non-owning reference suitable for a registry that should not keep
    /// this handle alive on its own.
    pub(crate) fn downgrade(&self) -> WeakTaskHandle {
        WeakTaskHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn wake(&self) {
        if let Some(waker) = self.inner.waker.upgrade() {
            waker.wake();
        }
    }

    /// Set the interval between executions and whether it runs in
    /// "consistent" (start-to-start, catch-up) or "non-consistent"
    /// (end-to-start) mode.
    pub fn set_frequency(&self, frequency: Duration, consistent: bool) -> &Self {
        let mut st = self.inner.state.lock();
        st.frequency = Some(frequency);
        st.consistent = consistent;
        drop(st);
        self.wake();
        self
    }

    /// Limit this handle to `n` more executions; `n == 0` deactivates it
    /// immediately on the next check.
    pub fn times(&self, n: u64) -> &Self {
        let mut st = self.inner.state.lock();
        st.remaining_count = Some(n);
        self
    }

    /// Set an absolute cutoff: once `now` passes `instant`, stop dispatching
    /// unless `run_after_last` is set, in which case one more execution
    /// whose due time equals `instant` still fires.
    pub fn until(&self, instant: Instant, run_after_last: bool) -> &Self {
        let mut st = self.inner.state.lock();
        st.last_run = Some(instant);
        st.run_after_last = run_after_last;
        self
    }

    /// Schedule the next execution at an absolute instant.
    pub fn run_next_at(&self, instant: Instant) -> &Self {
        {
            let mut st = self.inner.state.lock();
            st.next_run = Some(instant);
        }
        self.wake();
        self
    }

    /// Schedule the next execution `delay` from now.
    pub fn run_next_in(&self, delay: Duration) -> &Self {
        let now = self.inner.clock.now();
        self.run_next_at(now + delay)
    }

    /// Schedule the next execution as soon as the dispatcher next wakes.
    pub fn run_immediately(&self) -> &Self {
        let now = self.inner.clock.now();
        self.run_next_at(now)
    }

    /// Choose which thread this handle dispatches to once due.
    pub fn with_threading(&self, threading: Threading) -> &Self {
        let mut st = self.inner.state.lock();
        st.threading = threading;
        self
    }

    /// Activate or deactivate the handle. Idempotent: activating an already
    /// active handle, or deactivating an already inactive one, is a no-op.
    ///
    /// Activating a handle with no `next_run` configured (a fresh handle
    /// that was never pointed at a time via `run_next_at`/`run_next_in`/
    /// `run_immediately`) schedules it to run immediately, so the common
    /// `scheduler.build(f).set_frequency(d, true).set_active(true)` idiom
    /// fires its first execution right away rather than never.
    pub fn set_active(&self, active: bool) -> &Self {
        let mut st = self.inner.state.lock();
        if st.active == active {
            return self;
        }
        st.active = active;
        if active && st.next_run.is_none() {
            st.next_run = Some(self.inner.clock.now());
        }
        drop(st);
        if active {
            self.wake();
        }
        self
    }

    /// Whether this handle currently participates in scheduling.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Total number of completed executions so far.
    pub fn exec_count(&self) -> u64 {
        self.inner.state.lock().exec_count
    }

    /// The selection step of the dispatcher loop: decide whether this
    /// handle is due at `now`, and if so perform the "about to execute"
    /// state transition and return the target to dispatch to. Folds this
    /// handle's next due instant (or the "immediate" sentinel) into
    /// `min_next_run` regardless of the outcome.
    pub(crate) fn should_execute(&self, now: Instant, min_next_run: &mut MinNextRun) -> Option<Threading> {
        let mut st = self.inner.state.lock();

        if !st.active {
            return None;
        }

        if st.waiting {
            min_next_run.mark_immediate();
            return None;
        }

        let next_run = st.next_run?;

        if now < next_run {
            min_next_run.fold(next_run);
            return None;
        }

        if st.consistent && st.frequency.is_some() {
            let freq = st.frequency.unwrap();
            let mut nr = next_run + freq;
            if now > nr {
                let behind = now.duration_since(nr);
                let periods = duration_periods(behind, freq);
                nr += freq * (periods as u32);
                if now > nr {
                    nr += freq;
                }
            }
            st.next_run = Some(nr);
        } else {
            st.next_run = None;
        }

        if let Some(remaining) = st.remaining_count {
            let remaining = remaining.saturating_sub(1);
            st.remaining_count = Some(remaining);
            if remaining == 0 {
                st.next_run = None;
            }
        }

        if let Some(last_run) = st.last_run {
            if now > last_run && !st.run_after_last {
                st.next_run = None;
            }
        }

        st.waiting = true;
        let threading = st.threading;

        match st.next_run {
            None => st.active = false,
            Some(nr) => min_next_run.fold(nr),
        }

        Some(threading)
    }

    /// Run the user callback, catching panics, then perform the
    /// post-execution housekeeping.
    pub(crate) fn run(&self) {
        {
            let mut runnable = self.inner.runnable.lock();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| (runnable)()));
            if result.is_err() {
                tracing::error!("scheduled task panicked; handle continues");
            }
        }
        self.after_execution();
    }

    fn after_execution(&self) {
        let now = self.inner.clock.now();
        let mut st = self.inner.state.lock();

        st.previous_run = Some(now);
        st.exec_count += 1;

        if st.next_run.is_none() {
            if let Some(freq) = st.frequency {
                if st.remaining_count != Some(0) {
                    st.next_run = Some(now + freq);
                }
            }
        }

        if let (Some(nr), Some(last_run)) = (st.next_run, st.last_run) {
            if nr > last_run && !st.run_after_last {
                st.next_run = None;
            }
        }

        let should_wake = st.next_run.is_some();
        // A non-consistent handle clears `next_run` in `should_execute` (it
        // is recomputed here from the completed run's end time) and so was
        // deactivated there too; re-activate it now that a next run exists,
        // or confirm deactivation if none does.
        st.active = st.next_run.is_some();
        st.waiting = false;
        drop(st);

        if should_wake {
            self.wake();
        }
    }

    /// Used when a `Threading::Any` dispatch was rejected by the pool: the
    /// job that would have called `run`/`after_execution` never ran, so the
    /// `waiting` latch this handle set in `should_execute` must be released
    /// by hand, or the handle would never be reconsidered again.
    pub(crate) fn cancel_pending_dispatch(&self) {
        self.inner.state.lock().waiting = false;
    }
}

/// Integer number of whole `period`s that `behind` exceeds, floored.
fn duration_periods(behind: Duration, period: Duration) -> u64 {
    let period_nanos = period.as_nanos().max(1);
    (behind.as_nanos() / period_nanos) as u64
}
