//! Progress aggregated over a growing set of children.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{Progress, ProgressParts, Status, TaskAbort, Watch, join_on, lock};
use crate::error::{Error, Result};

/// Held across the cycle check and the attach in [`CompositeProgress::add`],
/// so two concurrent adds cannot each pass the check and close a loop.
static TOPOLOGY: Mutex<()> = Mutex::new(());

/// Aggregate of child progress handles.
///
/// Children can be added until [`seal`](Self::seal) is called. Part counts
/// are the sums over the children; the total is final only once the set is
/// sealed and every child's own total is final.
#[derive(Debug, Default)]
pub struct CompositeProgress {
    state: Mutex<CompositeState>,
    watch: Arc<Watch>,
}

#[derive(Debug, Default)]
struct CompositeState {
    children: Vec<Progress>,
    sealed: bool,
    subscribers: Vec<Arc<Watch>>,
}

impl CompositeProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a child.
    ///
    /// # Errors
    ///
    /// [`Error::Sealed`] once [`seal`](Self::seal) has been called, and
    /// [`Error::InvalidArgument`] if the child contains this composite.
    pub fn add(&self, child: Progress) -> Result<()> {
        let subscribers = {
            let _topology = lock(&TOPOLOGY);
            if child.reaches(self) {
                return Err(Error::InvalidArgument(
                    "composite progress cannot contain itself".to_string(),
                ));
            }
            let mut state = lock(&self.state);
            if state.sealed {
                return Err(Error::Sealed);
            }
            state.children.push(child.clone());
            state.subscribers.clone()
        };

        child.subscribe(Arc::clone(&self.watch));
        for watch in &subscribers {
            child.subscribe(Arc::clone(watch));
        }

        // The child may have finished before it was subscribed.
        self.wake(&subscribers);
        Ok(())
    }

    /// Declare that no more children will be added. Idempotent.
    pub fn seal(&self) {
        let subscribers = {
            let mut state = lock(&self.state);
            state.sealed = true;
            state.subscribers.clone()
        };
        self.wake(&subscribers);
    }

    pub fn is_sealed(&self) -> bool {
        lock(&self.state).sealed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parts_done(&self) -> usize {
        lock(&self.state).children.iter().map(Progress::parts_done).sum()
    }

    pub fn parts_total(&self) -> usize {
        lock(&self.state).children.iter().map(Progress::parts_total).sum()
    }

    pub fn is_total_final(&self) -> bool {
        let state = lock(&self.state);
        state.sealed && state.children.iter().all(Progress::is_total_final)
    }

    pub fn parts(&self) -> ProgressParts {
        let state = lock(&self.state);
        let mut parts = ProgressParts {
            done: 0,
            known: 0,
            total_final: state.sealed,
        };
        for child in &state.children {
            let child = child.parts();
            parts.done += child.done;
            parts.known += child.known;
            parts.total_final &= child.total_final;
        }
        parts
    }

    /// Aborted as soon as any child is (first in insertion order wins), done
    /// once sealed with every child done.
    pub fn status(&self) -> Status {
        let state = lock(&self.state);
        let mut all_done = true;
        for child in &state.children {
            match child.status() {
                Status::Aborted(abort) => return Status::Aborted(abort),
                Status::Pending => all_done = false,
                Status::Done => {}
            }
        }
        if state.sealed && all_done {
            Status::Done
        } else {
            Status::Pending
        }
    }

    /// Block until sealed and every child is done, or return the first abort.
    ///
    /// Children still running when an abort is returned are left alone.
    pub fn join(&self) -> std::result::Result<(), TaskAbort> {
        join_on(&self.watch, None, || self.status()).map(|_| ())
    }

    /// Block for at most `timeout`. `Ok(false)` means still pending.
    pub fn join_timeout(&self, timeout: Duration) -> std::result::Result<bool, TaskAbort> {
        join_on(&self.watch, Some(Instant::now() + timeout), || self.status())
    }

    pub(crate) fn subscribe(&self, watch: Arc<Watch>) {
        let children = {
            let mut state = lock(&self.state);
            state.subscribers.push(Arc::clone(&watch));
            state.children.clone()
        };
        for child in &children {
            child.subscribe(Arc::clone(&watch));
        }
    }

    pub(crate) fn reaches(&self, target: &CompositeProgress) -> bool {
        lock(&self.state)
            .children
            .iter()
            .any(|child| child.reaches(target))
    }

    fn wake(&self, subscribers: &[Arc<Watch>]) {
        self.watch.notify();
        for watch in subscribers {
            watch.notify();
        }
    }
}
