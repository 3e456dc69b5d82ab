//! Armada host agent.
//!
//! One [`Agent`] per host watches that host's deployment records and drives
//! a [`RuntimeDriver`] until the runtime matches them, publishing task
//! status as it goes.

pub mod agent;
pub mod config;
pub mod driver;
pub mod error;
pub mod retry;
mod task;

pub use agent::{Agent, AgentHandle};
pub use config::AgentConfig;
pub use driver::{DriverError, ProcessDriver, RuntimeDriver, WorkloadHandle, WorkloadState};
pub use error::{AgentError, AgentResult};
pub use retry::RetryPolicy;
