//! Execution capabilities the scheduler can hand jobs to.
//!
//! The scheduler never owns the executor's lifecycle. Anything that can run a
//! boxed closure asynchronously qualifies.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs asynchronously, possibly in parallel.
///
/// An executor may drop a job without running it (e.g. after its own
/// shutdown); the scheduler still reports such items, as abandoned.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

/// Runs each job on tokio's blocking pool.
impl Executor for tokio::runtime::Handle {
    fn execute(&self, job: Job) {
        drop(self.spawn_blocking(job));
    }
}

impl Executor for rayon::ThreadPool {
    fn execute(&self, job: Job) {
        self.spawn(job);
    }
}

/// Spawns one named OS thread per job.
#[derive(Debug)]
pub struct ThreadExecutor {
    name: String,
    spawned: AtomicUsize,
}

impl ThreadExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Number of threads started so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{n}", self.name))
            .spawn(job);
        if let Err(e) = spawned {
            warn!(executor = %self.name, error = %e, "failed to spawn job thread");
        }
    }
}

/// Build a rayon pool sized by the scheduler config.
pub fn rayon_pool(config: &SchedulerConfig) -> Result<rayon::ThreadPool> {
    let name = config.name.clone();
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .thread_name(move |i| format!("{name}-worker-{i}"))
        .build()
        .map_err(|e| Error::Other(format!("failed to build worker pool: {e}")))
}
