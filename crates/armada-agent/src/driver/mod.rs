//! Runtime driver seam.
//!
//! The agent only needs a workload's observable contract: start it, stop
//! it, ask how it is doing. [`ProcessDriver`] runs a job's command as a
//! local process; [`FakeDriver`] (tests) records calls and lets the test
//! script failures and exits.

mod process;

pub use process::ProcessDriver;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{DriverCall, FakeDriver};

use std::fmt;

use armada_core::Job;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("start failed: {0}")]
    StartFailed(String),
    #[error("stop failed: {0}")]
    StopFailed(String),
    #[error("status failed: {0}")]
    StatusFailed(String),
}

/// Opaque runtime identifier of a started workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadHandle(String);

impl WorkloadHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the runtime reports about a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Running,
    Exited { code: Option<i32> },
    /// The runtime has no record of the handle.
    Unknown,
}

#[async_trait]
pub trait RuntimeDriver: Send + Sync + 'static {
    async fn start(&self, job: &Job) -> Result<WorkloadHandle, DriverError>;

    /// Stop a workload. Stopping an unknown or already stopped handle succeeds.
    async fn stop(&self, handle: &WorkloadHandle) -> Result<(), DriverError>;

    async fn status(&self, handle: &WorkloadHandle) -> Result<WorkloadState, DriverError>;
}
