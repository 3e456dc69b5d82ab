//! Master model error types.

use armada_core::{Goal, JobId};
use armada_store::StoreError;
use thiserror::Error;

/// Errors returned by [`crate::MasterModel`] operations.
///
/// Everything but [`MasterError::Store`] is an expected, user-facing outcome.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("job already exists: {0}")]
    JobAlreadyExists(JobId),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job still in use: {0}")]
    JobInUse(JobId),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("job {job} already deployed on {host}")]
    AlreadyDeployed { host: String, job: JobId },

    #[error("job {job} not deployed on {host}")]
    NotDeployed { host: String, job: JobId },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("goal {0:?} is not valid for this operation")]
    InvalidGoal(Goal),

    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}

pub type MasterResult<T> = Result<T, MasterError>;
