//! Progress tracking for asynchronous work whose size may not be known upfront.
//!
//! A [`Progress`] is either a single indivisible part ([`AtomicProgress`]) or
//! an aggregate of child handles ([`CompositeProgress`]) that can keep growing
//! until its owner seals it. Both can be joined from any number of threads;
//! joining returns once the work is done, or hands back the [`TaskAbort`]
//! attached to it.

pub mod atomic;
pub mod composite;

pub use atomic::AtomicProgress;
pub use composite::CompositeProgress;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Abort signal
// ---------------------------------------------------------------------------

/// Permanent failure attached to a unit of asynchronous work.
///
/// Cloning is cheap; every joiner of an aborted progress receives a clone of
/// the same abort.
#[derive(Debug, Clone)]
pub struct TaskAbort {
    message: String,
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TaskAbort {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Abort carrying the error that caused it.
    pub fn with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for TaskAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task aborted: {}", self.message)
    }
}

impl std::error::Error for TaskAbort {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Status and snapshots
// ---------------------------------------------------------------------------

/// Non-blocking view of where a unit of work stands.
#[derive(Debug, Clone)]
pub enum Status {
    Pending,
    Done,
    Aborted(TaskAbort),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending)
    }
}

/// Snapshot of a progress' part counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressParts {
    pub done: usize,
    /// Parts known so far. Only grows while the total is not final.
    pub known: usize,
    pub total_final: bool,
}

impl ProgressParts {
    /// The total number of parts, if it will not grow any more.
    pub fn finalized_total(&self) -> Option<usize> {
        self.total_final.then_some(self.known)
    }
}

impl fmt::Display for ProgressParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total_final {
            write!(f, "{}/{} (final)", self.done, self.known)
        } else {
            write!(f, "{}/{}", self.done, self.known)
        }
    }
}

// ---------------------------------------------------------------------------
// Progress handle
// ---------------------------------------------------------------------------

/// Shared handle to either kind of progress.
#[derive(Debug, Clone)]
pub enum Progress {
    Atomic(Arc<AtomicProgress>),
    Composite(Arc<CompositeProgress>),
}

impl Progress {
    pub fn parts_done(&self) -> usize {
        match self {
            Progress::Atomic(p) => p.parts_done(),
            Progress::Composite(p) => p.parts_done(),
        }
    }

    pub fn parts_total(&self) -> usize {
        match self {
            Progress::Atomic(p) => p.parts_total(),
            Progress::Composite(p) => p.parts_total(),
        }
    }

    pub fn is_total_final(&self) -> bool {
        match self {
            Progress::Atomic(p) => p.is_total_final(),
            Progress::Composite(p) => p.is_total_final(),
        }
    }

    pub fn parts(&self) -> ProgressParts {
        match self {
            Progress::Atomic(p) => p.parts(),
            Progress::Composite(p) => p.parts(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Progress::Atomic(p) => p.status(),
            Progress::Composite(p) => p.status(),
        }
    }

    /// Block until the work is done, or return the abort attached to it.
    pub fn join(&self) -> Result<(), TaskAbort> {
        match self {
            Progress::Atomic(p) => p.join(),
            Progress::Composite(p) => p.join(),
        }
    }

    /// Like [`join`](Self::join), but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` if the deadline passed with the work still pending.
    pub fn join_timeout(&self, timeout: Duration) -> Result<bool, TaskAbort> {
        match self {
            Progress::Atomic(p) => p.join_timeout(timeout),
            Progress::Composite(p) => p.join_timeout(timeout),
        }
    }

    /// Register an ancestor's watch so it is woken on every change here.
    pub(crate) fn subscribe(&self, watch: Arc<Watch>) {
        match self {
            Progress::Atomic(p) => p.subscribe(watch),
            Progress::Composite(p) => p.subscribe(watch),
        }
    }

    /// Whether `target` is this handle or one of its descendants.
    pub(crate) fn reaches(&self, target: &CompositeProgress) -> bool {
        match self {
            Progress::Atomic(_) => false,
            Progress::Composite(p) => std::ptr::eq(Arc::as_ptr(p), target) || p.reaches(target),
        }
    }
}

impl From<Arc<AtomicProgress>> for Progress {
    fn from(p: Arc<AtomicProgress>) -> Self {
        Progress::Atomic(p)
    }
}

impl From<Arc<CompositeProgress>> for Progress {
    fn from(p: Arc<CompositeProgress>) -> Self {
        Progress::Composite(p)
    }
}

// ---------------------------------------------------------------------------
// Wake-up plumbing
// ---------------------------------------------------------------------------

/// Generation counter plus condition variable.
///
/// Joiners read the generation, check their condition, then sleep until the
/// generation moves. Every state change bumps it, so no wake-up is lost
/// between the check and the sleep.
#[derive(Debug, Default)]
pub(crate) struct Watch {
    generation: Mutex<u64>,
    cvar: Condvar,
}

impl Watch {
    pub(crate) fn generation(&self) -> u64 {
        *lock(&self.generation)
    }

    pub(crate) fn notify(&self) {
        let mut generation = lock(&self.generation);
        *generation = generation.wrapping_add(1);
        drop(generation);
        self.cvar.notify_all();
    }

    /// Sleep until the generation differs from `seen`. Returns false if the
    /// deadline passed first.
    fn wait_past(&self, seen: u64, deadline: Option<Instant>) -> bool {
        let mut generation = lock(&self.generation);
        while *generation == seen {
            match deadline {
                None => {
                    generation = self
                        .cvar
                        .wait(generation)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (next, _) = self
                        .cvar
                        .wait_timeout(generation, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    generation = next;
                }
            }
        }
        true
    }
}

/// Shared join loop: poll `status`, sleep on `watch` until something changes.
pub(crate) fn join_on(
    watch: &Watch,
    deadline: Option<Instant>,
    status: impl Fn() -> Status,
) -> Result<bool, TaskAbort> {
    loop {
        let seen = watch.generation();
        match status() {
            Status::Done => return Ok(true),
            Status::Aborted(abort) => return Err(abort),
            Status::Pending => {}
        }
        if !watch.wait_past(seen, deadline) {
            return Ok(false);
        }
    }
}

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Every critical section in this crate leaves its state consistent, so a
/// poisoned lock carries no torn data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
