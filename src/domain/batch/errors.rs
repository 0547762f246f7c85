//! Batch Context - Errors

use thiserror::Error;

use super::BatchJobStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchDomainError {
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition {
        from: BatchJobStatus,
        event: &'static str,
    },

    #[error("unsupported input file type: {0}")]
    InvalidFileType(String),

    #[error("batch job has no remote name")]
    MissingRemoteName,
}
