//! Intent and observed-state descriptors shared by master, agents and
//! clients.
//!
//! [`Deployment`] is intent (written by the master), [`TaskStatus`] is
//! observed reality (written only by the agent owning the host). All of
//! these are JSON-serialized into coordination-store nodes and onto the
//! wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobId};

// ── Intent ────────────────────────────────────────────────────────

/// Desired run state of a job on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Goal {
    Start,
    /// Keep the deployment but stop the workload.
    Stop,
    /// Tombstone: tear the workload down, then the agent removes the record.
    Undeploy,
}

/// Intent that a job run on a host. Keyed by `(host, job_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub job_id: JobId,
    pub goal: Goal,
}

impl Deployment {
    pub fn of(job_id: JobId, goal: Goal) -> Self {
        Self { job_id, goal }
    }
}

// ── Observed state ────────────────────────────────────────────────

/// Lifecycle state of a workload as observed by its agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Creating,
    Starting,
    Running,
    Stopping,
    Stopped,
    Exited,
    Failed,
    Unknown,
}

/// Observed state of a `(host, job_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub job_id: JobId,
    /// Goal of the last deployment the agent observed.
    pub goal: Goal,
    pub state: TaskState,
    /// Runtime handle of the workload, if one was started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix epoch milliseconds of the last transition.
    pub timestamp: u64,
}

impl TaskStatus {
    /// Placeholder for a deployment whose status has not been published.
    pub fn unknown(job_id: JobId, goal: Goal) -> Self {
        Self {
            job_id,
            goal,
            state: TaskState::Unknown,
            handle: None,
            error: None,
            timestamp: 0,
        }
    }

    /// Equality ignoring the timestamp.
    pub fn same_observation(&self, other: &TaskStatus) -> bool {
        self.job_id == other.job_id
            && self.goal == other.goal
            && self.state == other.state
            && self.handle == other.handle
            && self.error == other.error
    }
}

// ── Presence ──────────────────────────────────────────────────────

/// Registration record of a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    pub registered_at: u64,
}

/// Presence record of a running master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterInfo {
    pub id: String,
    pub address: String,
    pub started_at: u64,
}

/// Reachability of a host's agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    Up,
    Down,
}

// ── Aggregated views ──────────────────────────────────────────────

/// Everything known about one host. Tombstoned deployments are included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub status: HostState,
    /// Whether a registration record exists (absent after `removeHost`).
    pub registered: bool,
    pub jobs: BTreeMap<JobId, Deployment>,
    pub statuses: BTreeMap<JobId, TaskStatus>,
}

/// Cluster-wide view of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job: Job,
    pub deployments: BTreeMap<String, Deployment>,
    pub task_statuses: BTreeMap<String, TaskStatus>,
}
