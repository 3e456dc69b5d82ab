//! Read-side composition of per-host fragments into status views.
//!
//! Pure functions: the model gathers the records, these assemble them.
//! Missing fragments become explicit `UNKNOWN` entries; tombstoned
//! deployments are always kept.

use std::collections::BTreeMap;

use armada_core::{Deployment, HostState, HostStatus, Job, JobStatus, TaskStatus};

/// Compose a host's view from its registration, presence and records.
///
/// Deployments without a published status get an `UNKNOWN` one.
pub fn host_status(
    registered: bool,
    up: bool,
    deployments: Vec<Deployment>,
    statuses: Vec<TaskStatus>,
) -> HostStatus {
    let mut jobs = BTreeMap::new();
    let mut task_statuses = BTreeMap::new();

    for status in statuses {
        task_statuses.insert(status.job_id.clone(), status);
    }
    for deployment in deployments {
        task_statuses
            .entry(deployment.job_id.clone())
            .or_insert_with(|| TaskStatus::unknown(deployment.job_id.clone(), deployment.goal));
        jobs.insert(deployment.job_id.clone(), deployment);
    }

    HostStatus {
        status: if up { HostState::Up } else { HostState::Down },
        registered,
        jobs,
        statuses: task_statuses,
    }
}

/// Compose a job's cluster-wide view from `(host, deployment, status)`
/// fragments.
pub fn job_status(job: Job, fragments: Vec<(String, Deployment, Option<TaskStatus>)>) -> JobStatus {
    let mut deployments = BTreeMap::new();
    let mut task_statuses = BTreeMap::new();

    for (host, deployment, status) in fragments {
        let status =
            status.unwrap_or_else(|| TaskStatus::unknown(deployment.job_id.clone(), deployment.goal));
        task_statuses.insert(host.clone(), status);
        deployments.insert(host, deployment);
    }

    JobStatus {
        job,
        deployments,
        task_statuses,
    }
}
