//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider installed the instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("skeldex")
}

/// Counter: scheduler submissions.
/// Labels: `scheduler`, `result` ("ok" | "duplicate" | "closed").
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("skeldex.tasks.submitted")
        .with_description("Number of items submitted to a scheduler")
        .build()
}

/// Counter: finished closure runs.
/// Labels: `scheduler`, `outcome` ("ok" | "failed" | "panicked" | "abandoned").
pub fn tasks_completed() -> Counter<u64> {
    meter()
        .u64_counter("skeldex.tasks.completed")
        .with_description("Number of scheduler tasks that finished running")
        .build()
}

/// Histogram: closure run time in milliseconds.
/// Labels: `scheduler`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("skeldex.task.duration_ms")
        .with_description("Scheduler task run time in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: abort signals attached to progress leaves.
pub fn progress_aborts() -> Counter<u64> {
    meter()
        .u64_counter("skeldex.progress.aborts")
        .with_description("Number of aborted progress parts")
        .build()
}

/// Counter: archive operations.
/// Labels: `operation` ("push" | "pull").
pub fn archive_operations() -> Counter<u64> {
    meter()
        .u64_counter("skeldex.archive.operations")
        .with_description("Number of archive push and pull operations")
        .build()
}
