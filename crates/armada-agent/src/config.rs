//! Agent runtime configuration.

use std::time::Duration;

use armada_core::config::AgentSection;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Host this agent reconciles.
    pub host: String,
    pub retry: RetryPolicy,
    /// How often running workloads are probed and the full state re-read.
    pub status_poll_interval: Duration,
    /// Upper bound on pending teardowns at shutdown.
    pub shutdown_grace: Duration,
}

impl AgentConfig {
    pub fn new(host: &str) -> Self {
        Self::from_section(host, &AgentSection::default())
    }

    pub fn from_section(host: &str, section: &AgentSection) -> Self {
        Self {
            host: host.to_string(),
            retry: RetryPolicy {
                initial: Duration::from_millis(section.retry_initial_ms),
                max: Duration::from_millis(section.retry_max_ms),
                multiplier: section.retry_multiplier,
            },
            status_poll_interval: Duration::from_millis(section.poll_interval_ms),
            shutdown_grace: Duration::from_millis(section.shutdown_grace_ms),
        }
    }
}
