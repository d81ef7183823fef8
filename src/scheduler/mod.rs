//! Concurrent task scheduler.
//!
//! Wraps an [`Executor`] so that any item type can be processed, not just
//! closures. Each item is submitted with a caller-chosen deposit, which comes
//! back with the item and the closure's outcome when the result is accepted.
//!
//! ```text
//! submit(item, deposit) ──► input ──► handle()/auto() ──► executor
//!                                                            │
//! accept() ◄── (item, deposit, outcome) ◄── output ◄─────────┘
//! ```

pub mod executor;
pub mod registry;

pub use executor::{Executor, Job, ThreadExecutor, rayon_pool};
pub use registry::TaskId;

use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendError, Sender, TryRecvError};
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::progress::lock;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_outcome, start_task_span};
use registry::Registry;

/// How often a blocked `accept` re-checks that something is still in flight.
const IDLE_RECHECK: Duration = Duration::from_millis(50);

/// How often a closed dispatch loop re-checks for submitters still sending.
const DRAIN_RECHECK: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a task produced no value.
#[derive(Debug)]
pub enum TaskFailure<X> {
    /// The closure returned an error.
    Failed(X),
    /// The closure panicked; holds the panic message.
    Panicked(String),
    /// The executor dropped the job without running it.
    Abandoned,
}

impl<X> TaskFailure<X> {
    fn label(&self) -> &'static str {
        match self {
            TaskFailure::Failed(_) => "failed",
            TaskFailure::Panicked(_) => "panicked",
            TaskFailure::Abandoned => "abandoned",
        }
    }
}

impl<X: fmt::Display> fmt::Display for TaskFailure<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Failed(e) => write!(f, "{e}"),
            TaskFailure::Panicked(msg) => write!(f, "task panicked: {msg}"),
            TaskFailure::Abandoned => write!(f, "task abandoned by executor"),
        }
    }
}

impl<X: std::error::Error + 'static> std::error::Error for TaskFailure<X> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskFailure::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// What a closure run produced.
pub type Outcome<R, X> = std::result::Result<R, TaskFailure<X>>;

/// A processed item, with its deposit and outcome.
///
/// Always inspect [`outcome`](Self::outcome) before treating the item as
/// processed.
#[derive(Debug)]
pub struct WorkResult<T, D, R, X> {
    pub task: TaskId,
    pub item: T,
    pub deposit: D,
    pub outcome: Outcome<R, X>,
}

impl<T, D, R, X> WorkResult<T, D, R, X> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Called against the executor once the dispatch loop has drained.
pub type ShutdownHook = Box<dyn FnOnce(&dyn Executor) + Send + 'static>;

type Closure<T, R, X> = dyn Fn(&T) -> std::result::Result<R, X> + Send + Sync + 'static;

struct Completed<T, R, X> {
    task: TaskId,
    item: T,
    outcome: Outcome<R, X>,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared<T, D, R, X> {
    name: Arc<str>,
    /// Written only with `registry` locked, so submit and close serialize.
    open: AtomicBool,
    registry: Mutex<Registry<T, D>>,
    /// Registry size, readable without the lock.
    in_flight: AtomicUsize,
    /// Items counted in by `submit` and not yet taken off the input.
    enqueued: AtomicUsize,
    input_tx: Sender<(TaskId, T)>,
    input_rx: Receiver<(TaskId, T)>,
    output_tx: Sender<Completed<T, R, X>>,
    output_rx: Receiver<Completed<T, R, X>>,
    /// Dropped on close, which wakes the dispatch loop.
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    closure: Arc<Closure<T, R, X>>,
    executor: Arc<dyn Executor>,
}

impl<T, D, R, X> Shared<T, D, R, X>
where
    T: Send + 'static,
    R: Send + 'static,
    X: Send + 'static,
{
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Hand one item to the executor.
    fn dispatch(&self, task: TaskId, item: T) {
        self.enqueued.fetch_sub(1, Ordering::AcqRel);
        debug!(scheduler = %self.name, %task, "dispatching");
        let run = Run {
            task,
            item: Some(item),
            closure: Arc::clone(&self.closure),
            output: self.output_tx.clone(),
            scheduler: Arc::clone(&self.name),
        };
        self.executor.execute(Box::new(move || run.run()));
    }

    fn run_dispatch(&self, shutdown: Option<ShutdownHook>) {
        info!(scheduler = %self.name, "dispatch loop started");
        while self.is_open() {
            crossbeam::select! {
                recv(self.input_rx) -> msg => {
                    if let Ok((task, item)) = msg {
                        self.dispatch(task, item);
                    }
                }
                recv(self.close_rx) -> _ => {}
            }
        }
        // Submitters that got past the open check before close may still be
        // blocked on a full input.
        while self.enqueued.load(Ordering::Acquire) > 0 {
            if let Ok((task, item)) = self.input_rx.recv_timeout(DRAIN_RECHECK) {
                self.dispatch(task, item);
            }
        }
        info!(scheduler = %self.name, "dispatch loop drained");
        if let Some(hook) = shutdown {
            hook(self.executor.as_ref());
        }
    }
}

/// One closure run. Reports its item even if the executor drops it unrun.
struct Run<T, R, X> {
    task: TaskId,
    item: Option<T>,
    closure: Arc<Closure<T, R, X>>,
    output: Sender<Completed<T, R, X>>,
    scheduler: Arc<str>,
}

impl<T, R, X> Run<T, R, X> {
    fn run(mut self) {
        let Some(item) = self.item.take() else {
            return;
        };

        let span = start_task_span(&self.scheduler, self.task);
        let _entered = span.enter();
        let started = Instant::now();

        let outcome = match catch_unwind(AssertUnwindSafe(|| (self.closure)(&item))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskFailure::Failed(e)),
            Err(payload) => Err(TaskFailure::Panicked(panic_message(payload.as_ref()))),
        };

        let label = match &outcome {
            Ok(_) => "ok",
            Err(failure) => failure.label(),
        };
        record_outcome(&span, label);
        if outcome.is_err() {
            warn!(scheduler = %self.scheduler, task = %self.task, outcome = label, "task failed");
        }

        let scheduler = KeyValue::new("scheduler", self.scheduler.to_string());
        metrics::task_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            std::slice::from_ref(&scheduler),
        );
        metrics::tasks_completed().add(1, &[scheduler, KeyValue::new("outcome", label)]);

        // The receiver only goes away with the scheduler itself.
        let _ = self.output.send(Completed {
            task: self.task,
            item,
            outcome,
        });
    }
}

impl<T, R, X> Drop for Run<T, R, X> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            warn!(scheduler = %self.scheduler, task = %self.task, "job dropped by executor");
            metrics::tasks_completed().add(
                1,
                &[
                    KeyValue::new("scheduler", self.scheduler.to_string()),
                    KeyValue::new("outcome", "abandoned"),
                ],
            );
            let _ = self.output.send(Completed {
                task: self.task,
                item,
                outcome: Err(TaskFailure::Abandoned),
            });
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Dispatcher {
    started: bool,
    handle: Option<JoinHandle<()>>,
}

/// Runs a closure over submitted items on an executor, correlating each item
/// with a deposit.
///
/// Items double as correlation keys: an item may not be submitted again while
/// a previous submission of it has not been accepted. Results come back in
/// completion order, each exactly once.
pub struct Scheduler<T, D, R, X>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + 'static,
    D: Send + 'static,
    R: Send + 'static,
    X: Send + 'static,
{
    shared: Arc<Shared<T, D, R, X>>,
    dispatcher: Mutex<Dispatcher>,
}

impl<T, D, R, X> Scheduler<T, D, R, X>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + 'static,
    D: Send + 'static,
    R: Send + 'static,
    X: Send + 'static,
{
    /// Create a scheduler with the default config.
    pub fn new<F, E>(closure: F, executor: E) -> Self
    where
        F: Fn(&T) -> std::result::Result<R, X> + Send + Sync + 'static,
        E: Executor,
    {
        Self::with_config(&SchedulerConfig::default(), closure, executor)
    }

    /// Create a scheduler named and sized by `config`.
    ///
    /// With `input_capacity` set, [`submit`](Self::submit) blocks while that
    /// many items wait to be dispatched.
    pub fn with_config<F, E>(config: &SchedulerConfig, closure: F, executor: E) -> Self
    where
        F: Fn(&T) -> std::result::Result<R, X> + Send + Sync + 'static,
        E: Executor,
    {
        let (input_tx, input_rx) = match config.input_capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };
        let (output_tx, output_rx) = channel::unbounded();
        let (close_tx, close_rx) = channel::bounded(0);

        Self {
            shared: Arc::new(Shared {
                name: Arc::from(config.name.as_str()),
                open: AtomicBool::new(true),
                registry: Mutex::new(Registry::new()),
                in_flight: AtomicUsize::new(0),
                enqueued: AtomicUsize::new(0),
                input_tx,
                input_rx,
                output_tx,
                output_rx,
                close_tx: Mutex::new(Some(close_tx)),
                close_rx,
                closure: Arc::new(closure),
                executor: Arc::new(executor),
            }),
            dispatcher: Mutex::new(Dispatcher::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Submit an item for processing, with the given deposit.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after [`close`](Self::close);
    /// [`Error::AlreadySubmitted`] if the item is still in flight, in which
    /// case its existing deposit is left as it was.
    ///
    /// With a bounded input this blocks while the input is full, without
    /// holding up any other call on the scheduler.
    pub fn submit(&self, item: T, deposit: D) -> Result<TaskId> {
        let name = KeyValue::new("scheduler", self.shared.name.to_string());
        let task = {
            let mut registry = lock(&self.shared.registry);
            if !self.shared.is_open() {
                metrics::tasks_submitted().add(1, &[name, KeyValue::new("result", "closed")]);
                return Err(Error::Closed);
            }
            if registry.contains(&item) {
                metrics::tasks_submitted().add(1, &[name, KeyValue::new("result", "duplicate")]);
                return Err(Error::AlreadySubmitted(format!("{item:?}")));
            }
            let task = registry.insert(item.clone(), deposit)?;
            self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
            // Counted before the lock is released, so a dispatch loop that
            // sees the close also waits for this item.
            self.shared.enqueued.fetch_add(1, Ordering::AcqRel);
            task
        };

        if let Err(SendError((task, item))) = self.shared.input_tx.send((task, item)) {
            self.shared.enqueued.fetch_sub(1, Ordering::AcqRel);
            self.release(task, &item);
            return Err(Error::Closed);
        }

        debug!(scheduler = %self.shared.name, %task, "submitted");
        metrics::tasks_submitted().add(1, &[name, KeyValue::new("result", "ok")]);
        Ok(task)
    }

    /// Replace the deposit of an in-flight item, returning the old one.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after [`close`](Self::close);
    /// [`Error::NotSubmitted`] if the item is not in flight.
    pub fn update(&self, item: &T, deposit: D) -> Result<D> {
        let mut registry = lock(&self.shared.registry);
        if !self.shared.is_open() {
            return Err(Error::Closed);
        }
        registry
            .replace(item, deposit)
            .ok_or_else(|| Error::NotSubmitted(format!("{item:?}")))
    }

    /// Block until a processed item is available and return it.
    ///
    /// Several threads may accept at once. Each result goes to exactly one of
    /// them; the others keep waiting, or get [`Error::Idle`] once nothing is
    /// left in flight.
    ///
    /// # Errors
    ///
    /// [`Error::Idle`] if nothing is in flight, since the call could never
    /// return.
    pub fn accept(&self) -> Result<WorkResult<T, D, R, X>> {
        loop {
            if let Some(result) = self.accept_until(None)? {
                return Ok(result);
            }
        }
    }

    /// Return a processed item if one is ready, without blocking.
    pub fn try_accept(&self) -> Result<Option<WorkResult<T, D, R, X>>> {
        match self.shared.output_rx.try_recv() {
            Ok(completed) => self.claim(completed).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Closed),
        }
    }

    /// Like [`accept`](Self::accept), giving up after `timeout`.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<WorkResult<T, D, R, X>>> {
        self.accept_until(Some(Instant::now() + timeout))
    }

    /// Take one submitted item (blocking) and send it to the executor.
    ///
    /// Only needed when [`auto`](Self::auto) is not running.
    pub fn handle(&self) -> Result<()> {
        let (task, item) = self.shared.input_rx.recv().map_err(|_| Error::Closed)?;
        self.shared.dispatch(task, item);
        Ok(())
    }

    /// Dispatch one submitted item if any is waiting. Returns whether one was.
    pub fn try_handle(&self) -> bool {
        match self.shared.input_rx.try_recv() {
            Ok((task, item)) => {
                self.shared.dispatch(task, item);
                true
            }
            Err(_) => false,
        }
    }

    /// Start a thread that dispatches items until the scheduler is closed and
    /// its input is empty, then runs `shutdown` against the executor.
    ///
    /// Only the first call starts anything; it returns `Ok(true)`. Every later
    /// call is a no-op returning `Ok(false)`, whether or not the loop is still
    /// running.
    pub fn auto(&self, shutdown: Option<ShutdownHook>) -> Result<bool> {
        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.started {
            debug!(scheduler = %self.shared.name, "dispatch loop already started");
            return Ok(false);
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(format!("{}-dispatch", self.shared.name))
            .spawn(move || shared.run_dispatch(shutdown))?;

        dispatcher.started = true;
        dispatcher.handle = Some(handle);
        Ok(true)
    }

    /// Stop accepting submissions and updates.
    ///
    /// Items already submitted are still dispatched and can still be
    /// accepted. A running dispatch loop exits once the input is empty.
    pub fn close(&self) {
        let was_open = {
            let _registry = lock(&self.shared.registry);
            self.shared.open.swap(false, Ordering::AcqRel)
        };
        if was_open {
            debug!(scheduler = %self.shared.name, "closed");
        }
        drop(lock(&self.shared.close_tx).take());
    }

    /// Wait for the dispatch loop (and its shutdown hook) to finish.
    ///
    /// Returns at once if [`auto`](Self::auto) was never called.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the scheduler is still open, since the
    /// loop would never exit.
    pub fn wait_dispatcher(&self) -> Result<()> {
        if self.is_open() {
            return Err(Error::InvalidArgument(
                "close the scheduler before waiting on its dispatcher".to_string(),
            ));
        }
        let handle = lock(&self.dispatcher).handle.take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Other("dispatch thread panicked".to_string())),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Whether any submitted item has not been accepted yet.
    pub fn has_pending(&self) -> bool {
        !self.is_idle()
    }

    /// Whether any processed item is waiting to be accepted.
    pub fn has_completed(&self) -> bool {
        !self.shared.output_rx.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn completed_count(&self) -> usize {
        self.shared.output_rx.len()
    }

    fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Wait for a result until `deadline`, re-checking idleness meanwhile so
    /// a consumer that lost the last result to another one is released.
    fn accept_until(&self, deadline: Option<Instant>) -> Result<Option<WorkResult<T, D, R, X>>> {
        loop {
            if self.is_idle() {
                return Err(Error::Idle);
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    (deadline - now).min(IDLE_RECHECK)
                }
                None => IDLE_RECHECK,
            };
            match self.shared.output_rx.recv_timeout(wait) {
                Ok(completed) => return self.claim(completed).map(Some),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Closed),
            }
        }
    }

    /// Drop the record for `task`, returning its deposit.
    fn release(&self, task: TaskId, item: &T) -> Option<D> {
        let mut registry = lock(&self.shared.registry);
        let deposit = registry.remove(task, item)?;
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        Some(deposit)
    }

    fn claim(&self, completed: Completed<T, R, X>) -> Result<WorkResult<T, D, R, X>> {
        let Completed {
            task,
            item,
            outcome,
        } = completed;
        let deposit = self
            .release(task, &item)
            .ok_or_else(|| Error::NotSubmitted(format!("{item:?}")))?;
        debug!(scheduler = %self.shared.name, %task, ok = outcome.is_ok(), "accepted");
        Ok(WorkResult {
            task,
            item,
            deposit,
            outcome,
        })
    }
}

impl<T, D, R, X> Drop for Scheduler<T, D, R, X>
where
    T: Clone + Eq + Hash + fmt::Debug + Send + 'static,
    D: Send + 'static,
    R: Send + 'static,
    X: Send + 'static,
{
    fn drop(&mut self) {
        self.close();
    }
}
