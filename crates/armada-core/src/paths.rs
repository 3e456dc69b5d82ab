//! Coordination-store path layout.
//!
//! ```text
//! /jobs/{job_id}                      Job (master)
//! /jobs/{job_id}/hosts/{host}         reverse index of deployments
//! /deployments/{host}/{job_id}        Deployment (master writes, agent deletes)
//! /status/{host}/{job_id}             TaskStatus (agent only)
//! /hosts/{host}                       HostInfo registration
//! /presence/{host}                    HostInfo, ephemeral (agent session)
//! /masters/{master_id}                MasterInfo, ephemeral (master session)
//! ```

use crate::job::JobId;

pub const JOBS: &str = "/jobs";
pub const DEPLOYMENTS: &str = "/deployments";
pub const STATUS: &str = "/status";
pub const HOSTS: &str = "/hosts";
pub const PRESENCE: &str = "/presence";
pub const MASTERS: &str = "/masters";

pub fn job(id: &JobId) -> String {
    format!("{JOBS}/{id}")
}

pub fn job_hosts(id: &JobId) -> String {
    format!("{JOBS}/{id}/hosts")
}

pub fn job_host(id: &JobId, host: &str) -> String {
    format!("{JOBS}/{id}/hosts/{host}")
}

pub fn deployments(host: &str) -> String {
    format!("{DEPLOYMENTS}/{host}")
}

pub fn deployment(host: &str, id: &JobId) -> String {
    format!("{DEPLOYMENTS}/{host}/{id}")
}

pub fn statuses(host: &str) -> String {
    format!("{STATUS}/{host}")
}

pub fn status(host: &str, id: &JobId) -> String {
    format!("{STATUS}/{host}/{id}")
}

pub fn host(host: &str) -> String {
    format!("{HOSTS}/{host}")
}

pub fn presence(host: &str) -> String {
    format!("{PRESENCE}/{host}")
}

pub fn master(id: &str) -> String {
    format!("{MASTERS}/{id}")
}

/// Last segment of a path.
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
