//! Agent error types.

use armada_core::JobId;
use armada_store::StoreError;
use thiserror::Error;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    #[error("runtime driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("deployed job {0} does not exist")]
    JobMissing(JobId),

    #[error("agent task failed: {0}")]
    Task(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
