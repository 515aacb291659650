//! Scheduler error types.

use ami_core::StageId;
use thiserror::Error;

/// Errors that can occur while registering or invoking stages.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("stage already registered: {0}")]
    AlreadyRegistered(StageId),

    #[error("stage not registered: {0}")]
    NotRegistered(StageId),

    #[error("{stage} launched over {expected} rows but upstream map has {actual}")]
    RangeMismatch {
        stage: StageId,
        expected: u32,
        actual: usize,
    },

    #[error("{stage}[{index}] failed: {message}")]
    Stage {
        stage: StageId,
        index: u32,
        message: String,
    },

    #[error("{stage}[{index}] skipped: upstream {upstream}[{index}] did not produce a result")]
    Upstream {
        stage: StageId,
        index: u32,
        upstream: StageId,
    },

    #[error("{stage}[{index}] task aborted: {message}")]
    Join {
        stage: StageId,
        index: u32,
        message: String,
    },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
