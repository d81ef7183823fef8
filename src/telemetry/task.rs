//! Scheduler task span helpers.

use tracing::Span;

use crate::scheduler::TaskId;

/// Start a span covering one closure run.
///
/// The `task.outcome` field starts empty and is filled in by
/// [`record_outcome`].
pub fn start_task_span(scheduler: &str, task: TaskId) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.scheduler" = scheduler,
        "task.id" = %task,
        "task.outcome" = tracing::field::Empty,
    )
}

/// Record how a task ended on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("task.outcome", outcome);
}
