//! Host collaborator traits: a clock, an OS thread spawner, and a callback
//! that posts work onto a UI thread. The core never references a concrete
//! OS or UI toolkit; these are the only ways it reaches outside of itself.

use std::io;
use std::thread;
use std::time::Instant;

use crate::job::Job;

/// A source of the current instant.
///
/// Must be monotonic-ish: the design tolerates small backward jumps (the
/// scheduler recomputes `next_run` as `max(now, previous)`-ish by simply
/// never scheduling before `previous_run`), but is not built for a clock
/// that can jump arbitrarily.
pub trait Clock: Send + Sync + 'static {
    /// The current instant, as observed by this clock.
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by `std::time::Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Creates and starts an OS-level thread running `job`, named `name`.
///
/// A `Spawner` failure is treated by the pool exactly like the worker
/// factory returning `None`: fatal on the pool's first worker, silently
/// absorbed afterwards (see [`crate::error::Error::SpawnFailure`]).
pub trait Spawner: Send + Sync + 'static {
    /// Spawn `job` as a named OS thread.
    fn spawn(&self, name: &str, job: Job) -> io::Result<()>;
}

/// [`Spawner`] backed by `std::thread::Builder`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSpawner;

impl Spawner for OsSpawner {
    fn spawn(&self, name: &str, job: Job) -> io::Result<()> {
        thread::Builder::new().name(name.to_string()).spawn(job)?;
        Ok(())
    }
}

/// Posts `job` onto a single-threaded UI event queue.
///
/// Implementations must deliver jobs in FIFO order with respect to the
/// order `invoke` was called, matching the ordering the rest of the core
/// relies on (see seed scenario 6).
pub trait UiInvoke: Send + Sync + 'static {
    /// Post `job` to run on the UI thread.
    fn invoke(&self, job: Job);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn system_clock_is_monotonic_ish() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn os_spawner_runs_the_job() {
        let (tx, rx) = mpsc::channel();
        let spawner = OsSpawner;
        spawner
            .spawn("test-spawner", Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    }
}
