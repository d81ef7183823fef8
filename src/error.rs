//! Error types for skeldex.

use thiserror::Error;

use crate::progress::TaskAbort;

#[derive(Debug, Error)]
pub enum Error {
    #[error("scheduler is closed")]
    Closed,

    #[error("item already in flight: {0}")]
    AlreadySubmitted(String),

    #[error("item not in flight: {0}")]
    NotSubmitted(String),

    #[error("progress is sealed, no more children can be added")]
    Sealed,

    #[error("nothing in flight and nothing completed")]
    Idle,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Aborted(#[from] TaskAbort),

    #[error("task failed: {0}")]
    Task(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
