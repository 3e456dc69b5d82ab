//! Per-deployment bookkeeping held by the agent.

use tokio::time::Instant;

use armada_core::{Goal, JobId, TaskState, TaskStatus};

use crate::driver::WorkloadHandle;
use crate::retry::{Backoff, RetryPolicy};

/// Local view of one `(host, job)` pair.
#[derive(Debug)]
pub(crate) struct Task {
    pub job_id: JobId,
    pub goal: Goal,
    /// Version of the deployment record the goal was read from.
    pub deployment_version: u64,
    pub handle: Option<WorkloadHandle>,
    pub state: TaskState,
    pub error: Option<String>,
    /// Whether `state` was observed by this process rather than inherited
    /// from a status record written by a previous one.
    pub verified: bool,
    pub backoff: Backoff,
    /// No attempt before this instant.
    pub retry_at: Option<Instant>,
    pub last_published: Option<TaskStatus>,
}

impl Task {
    /// Start tracking a deployment, inheriting whatever an earlier agent
    /// process recorded about it.
    pub fn new(job_id: JobId, goal: Goal, policy: RetryPolicy, previous: Option<TaskStatus>) -> Self {
        let (handle, state) = match &previous {
            Some(status) => (status.handle.clone().map(WorkloadHandle::new), status.state),
            None => (None, TaskState::Unknown),
        };
        Self {
            job_id,
            goal,
            deployment_version: 0,
            handle,
            state,
            error: None,
            verified: false,
            backoff: Backoff::new(policy),
            retry_at: None,
            last_published: previous,
        }
    }

    /// Adopt a new goal. A different goal clears any pending backoff.
    pub fn set_goal(&mut self, goal: Goal, version: u64) {
        self.deployment_version = version;
        if self.goal != goal {
            self.goal = goal;
            self.backoff.reset();
            self.retry_at = None;
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| at <= now)
    }

    /// Schedule the next attempt on the backoff.
    pub fn defer(&mut self) -> std::time::Duration {
        let delay = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        delay
    }

    pub fn status(&self, timestamp: u64) -> TaskStatus {
        TaskStatus {
            job_id: self.job_id.clone(),
            goal: self.goal,
            state: self.state,
            handle: self.handle.as_ref().map(|h| h.as_str().to_string()),
            error: self.error.clone(),
            timestamp,
        }
    }

    /// The status to write, or `None` if it matches what was last written.
    pub fn pending_status(&self, timestamp: u64) -> Option<TaskStatus> {
        let status = self.status(timestamp);
        match &self.last_published {
            Some(last) if last.same_observation(&status) => None,
            _ => Some(status),
        }
    }
}
