pub mod config;
pub mod descriptors;
pub mod job;
pub mod paths;
pub mod protocol;
pub mod time;

pub use config::DaemonConfig;
pub use descriptors::*;
pub use job::{IdParseError, Job, JobBuilder, JobId, Resources, validate_host};
