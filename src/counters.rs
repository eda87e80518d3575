//! Atomic worker-population counters.
//!
//! Kept as bare atomics rather than behind a lock: correctness of the pool's
//! admission and worker-exit algorithms depends on the exact compare-and-swap
//! sequences applied to these counters directly.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

/// `thread_count`, `active_workers` and `waiting_workers`, each padded to a
/// cache line so the three hot counters don't false-share.
#[derive(Debug, Default)]
pub(crate) struct PopulationCounters {
    pub(crate) thread_count: CachePadded<AtomicUsize>,
    pub(crate) active_workers: CachePadded<AtomicUsize>,
    pub(crate) waiting_workers: CachePadded<AtomicUsize>,
}

impl PopulationCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::Acquire)
    }

    pub(crate) fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    pub(crate) fn waiting_workers(&self) -> usize {
        self.waiting_workers.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let c = PopulationCounters::new();
        assert_eq!(c.thread_count(), 0);
        assert_eq!(c.active_workers(), 0);
        assert_eq!(c.waiting_workers(), 0);
    }
}
