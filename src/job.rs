//! The opaque unit of work the pool moves around, and the per-worker
//! consumer that runs it.

use std::error::Error as StdError;

/// A unit of work submitted to an [`ElasticExecutor`](crate::pool::ElasticExecutor).
///
/// The pool imposes no shape on a job beyond what `TaskExecutor::execute`
/// understands; concretely that is a boxed, once-callable closure.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A stateful, serial consumer of [`Job`]s, owned by exactly one worker.
///
/// One `TaskExecutor` is produced per worker by a [`WorkerFactory`] and
/// receives every job that worker dequeues, in order, until the worker
/// retires.
pub trait TaskExecutor: Send + 'static {
    /// Run one job to completion.
    ///
    /// Panics raised here are caught by the worker loop and logged; they
    /// never escape to the pool or to other workers.
    fn execute(&mut self, job: Job);

    /// Called when the owning worker retires, unless worker caching is
    /// enabled and this executor is returned to the cache instead.
    ///
    /// The default implementation does nothing.
    fn close(&mut self) -> Result<(), Box<dyn StdError + Send + Sync + 'static>> {
        Ok(())
    }
}

/// Produces [`TaskExecutor`]s for newly spawned workers.
///
/// `create` may return `None` to signal that the factory is exhausted; see
/// the pool's admission algorithm for how that is handled.
pub trait WorkerFactory: Send + Sync + 'static {
    /// The concrete executor type this factory produces.
    type Executor: TaskExecutor;

    /// Produce a fresh executor for a new worker, or `None` if none can be
    /// made right now.
    fn create(&self) -> Option<Self::Executor>;
}

impl<Fct, E> WorkerFactory for Fct
where
    Fct: Fn() -> Option<E> + Send + Sync + 'static,
    E: TaskExecutor,
{
    type Executor = E;

    fn create(&self) -> Option<E> {
        (self)()
    }
}

/// The simplest possible [`TaskExecutor`]: run the job's closure directly
/// with no per-worker state.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&mut self, job: Job) {
        job();
    }
}

/// A [`WorkerFactory`] that always hands out a fresh [`InlineExecutor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineWorkerFactory;

impl WorkerFactory for InlineWorkerFactory {
    type Executor = InlineExecutor;

    fn create(&self) -> Option<InlineExecutor> {
        Some(InlineExecutor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn inline_executor_runs_job() {
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        let mut executor = InlineExecutor;
        executor.execute(Box::new(move || {
            flag2.store(1, Ordering::SeqCst);
        }));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closure_factory_produces_executors() {
        let factory = || Some(InlineExecutor);
        assert!(factory.create().is_some());
    }
}
