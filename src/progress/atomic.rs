//! Progress of a single indivisible part.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{ProgressParts, Status, TaskAbort, Watch, join_on, lock};
use crate::telemetry::metrics;

/// A progress that has one single part.
///
/// Moved to a terminal state by whichever worker completes the part. If both
/// [`set_done`](Self::set_done) and [`set_abort`](Self::set_abort) are called,
/// in any order, joiners see the abort.
#[derive(Debug, Default)]
pub struct AtomicProgress {
    state: Mutex<LeafState>,
    watch: Arc<Watch>,
}

#[derive(Debug, Default)]
struct LeafState {
    done: bool,
    abort: Option<TaskAbort>,
    /// Watches of every composite this leaf sits under.
    subscribers: Vec<Arc<Watch>>,
}

impl AtomicProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the part complete and wake every joiner.
    pub fn set_done(&self) {
        let subscribers = {
            let mut state = lock(&self.state);
            state.done = true;
            state.subscribers.clone()
        };
        self.wake(&subscribers);
    }

    /// Attach a permanent abort and wake every joiner.
    ///
    /// The first abort wins; later ones are dropped.
    pub fn set_abort(&self, abort: TaskAbort) {
        let subscribers = {
            let mut state = lock(&self.state);
            if state.abort.is_none() {
                debug!(reason = %abort, "progress aborted");
                metrics::progress_aborts().add(1, &[]);
                state.abort = Some(abort);
            }
            state.subscribers.clone()
        };
        self.wake(&subscribers);
    }

    pub fn parts_done(&self) -> usize {
        usize::from(lock(&self.state).done)
    }

    pub fn parts_total(&self) -> usize {
        1
    }

    pub fn is_total_final(&self) -> bool {
        true
    }

    pub fn parts(&self) -> ProgressParts {
        ProgressParts {
            done: self.parts_done(),
            known: 1,
            total_final: true,
        }
    }

    pub fn status(&self) -> Status {
        let state = lock(&self.state);
        match (&state.abort, state.done) {
            (Some(abort), _) => Status::Aborted(abort.clone()),
            (None, true) => Status::Done,
            (None, false) => Status::Pending,
        }
    }

    /// Block until done, or return the attached abort.
    pub fn join(&self) -> Result<(), TaskAbort> {
        join_on(&self.watch, None, || self.status()).map(|_| ())
    }

    /// Block for at most `timeout`. `Ok(false)` means still pending.
    pub fn join_timeout(&self, timeout: Duration) -> Result<bool, TaskAbort> {
        join_on(&self.watch, Some(Instant::now() + timeout), || self.status())
    }

    pub(crate) fn subscribe(&self, watch: Arc<Watch>) {
        lock(&self.state).subscribers.push(watch);
    }

    fn wake(&self, subscribers: &[Arc<Watch>]) {
        self.watch.notify();
        for watch in subscribers {
            watch.notify();
        }
    }
}
