//! MasterModel — job, deployment and host registries.
//!
//! Each mutating operation is one store transaction (or a compare-and-set
//! loop of them). Preconditions that depend on other records, such as "the
//! job exists" when deploying, are `Check` ops inside the same transaction,
//! so concurrent masters cannot interleave a violation.

use std::collections::BTreeMap;

use armada_core::{
    Deployment, Goal, HostInfo, HostStatus, Job, JobId, JobStatus, MasterInfo, TaskStatus, paths,
    time::epoch_millis, validate_host,
};
use armada_store::{CoordStore, Op, Session, StoreError};
use tracing::{debug, info};

use crate::error::{MasterError, MasterResult};
use crate::status;

/// The authoritative registry of jobs, deployments and hosts.
#[derive(Clone)]
pub struct MasterModel {
    store: CoordStore,
}

impl MasterModel {
    pub fn new(store: CoordStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CoordStore {
        &self.store
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Store a new job. Its id must be the one derived from its content.
    pub fn add_job(&self, job: &Job) -> MasterResult<()> {
        if !job.has_valid_id() {
            return Err(MasterError::InvalidIdentifier(job.id.to_string()));
        }
        match self.store.create_json(&paths::job(&job.id), job) {
            Ok(_) => {
                info!(job_id = %job.id, "job added");
                Ok(())
            }
            Err(StoreError::NodeExists(_)) => Err(MasterError::JobAlreadyExists(job.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a job. Refused while any host still has a deployment of it.
    pub fn remove_job(&self, id: &JobId) -> MasterResult<()> {
        // Deployments hold reverse-index nodes beneath the job node.
        match self.store.delete(&paths::job(id), None) {
            Ok(()) => {
                info!(job_id = %id, "job removed");
                Ok(())
            }
            Err(StoreError::NoNode(_)) => Err(MasterError::JobNotFound(id.clone())),
            Err(StoreError::NotEmpty(_)) => Err(MasterError::JobInUse(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_job(&self, id: &JobId) -> MasterResult<Job> {
        match self.store.get_json::<Job>(&paths::job(id))? {
            Some((job, _)) => Ok(job),
            None => Err(MasterError::JobNotFound(id.clone())),
        }
    }

    pub fn get_jobs(&self) -> MasterResult<BTreeMap<JobId, Job>> {
        let jobs = self.store.list_json::<Job>(paths::JOBS)?;
        Ok(jobs.into_iter().map(|(_, job, _)| (job.id.clone(), job)).collect())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Record the intent that `deployment.job_id` run on `host`.
    ///
    /// Goals START and STOP are stored as given; UNDEPLOY is refused since
    /// a fresh tombstone has nothing to tear down.
    pub fn deploy_job(&self, host: &str, deployment: &Deployment) -> MasterResult<()> {
        validate_host(host).map_err(|e| MasterError::InvalidIdentifier(e.to_string()))?;
        if deployment.goal == Goal::Undeploy {
            return Err(MasterError::InvalidGoal(deployment.goal));
        }
        let id = &deployment.job_id;

        let ops = vec![
            Op::check(paths::host(host)),
            Op::check(paths::job(id)),
            Op::create_json(paths::deployment(host, id), deployment)?,
            Op::create_json(paths::job_host(id, host), &host)?,
        ];
        match self.store.transaction(ops) {
            Ok(_) => {
                info!(%host, job_id = %id, goal = ?deployment.goal, "job deployed");
                Ok(())
            }
            Err(e) => Err(match e.op_failure() {
                Some((0, StoreError::NoNode(_))) => MasterError::HostNotFound(host.to_string()),
                Some((1, StoreError::NoNode(_))) => MasterError::JobNotFound(id.clone()),
                Some((2 | 3, StoreError::NodeExists(_))) => MasterError::AlreadyDeployed {
                    host: host.to_string(),
                    job: id.clone(),
                },
                _ => e.into(),
            }),
        }
    }

    /// Change the goal of an existing deployment in place.
    ///
    /// The record is overwritten with a compare-and-set against the version
    /// just read; it is never deleted and recreated, so watchers always see
    /// a continuously existing node.
    pub fn update_deployment(&self, host: &str, deployment: &Deployment) -> MasterResult<()> {
        if validate_host(host).is_err() {
            // No such host can ever have registered.
            return Err(MasterError::HostNotFound(host.to_string()));
        }
        let id = &deployment.job_id;
        let path = paths::deployment(host, id);

        loop {
            let Some((current, stat)) = self.store.get_json::<Deployment>(&path)? else {
                // Report a missing host or job ahead of a missing deployment.
                self.check_host_and_job(host, id)?;
                return Err(MasterError::NotDeployed {
                    host: host.to_string(),
                    job: id.clone(),
                });
            };
            if current.goal == deployment.goal {
                self.check_host_and_job(host, id)?;
                debug!(%host, job_id = %id, goal = ?deployment.goal, "goal unchanged");
                return Ok(());
            }

            let ops = vec![
                Op::check(paths::host(host)),
                Op::check(paths::job(id)),
                Op::set_json(&path, deployment, Some(stat.version))?,
            ];
            match self.store.transaction(ops) {
                Ok(_) => {
                    info!(%host, job_id = %id, goal = ?deployment.goal, "deployment goal updated");
                    return Ok(());
                }
                Err(e) => match e.op_failure() {
                    Some((0, StoreError::NoNode(_))) => {
                        return Err(MasterError::HostNotFound(host.to_string()));
                    }
                    Some((1, StoreError::NoNode(_))) => {
                        return Err(MasterError::JobNotFound(id.clone()));
                    }
                    // Concurrent goal change or agent removal; re-read.
                    Some((2, StoreError::BadVersion { .. } | StoreError::NoNode(_))) => {
                        debug!(%host, job_id = %id, "deployment changed concurrently, retrying");
                        continue;
                    }
                    _ => return Err(e.into()),
                },
            }
        }
    }

    /// Tombstone a deployment: set its goal to UNDEPLOY. The owning agent
    /// removes the record once the workload is gone.
    pub fn undeploy_job(&self, host: &str, id: &JobId) -> MasterResult<()> {
        let tombstone = Deployment::of(id.clone(), Goal::Undeploy);
        match self.update_deployment(host, &tombstone) {
            Err(MasterError::NotDeployed { job, .. }) => Err(MasterError::JobNotFound(job)),
            other => other,
        }
    }

    /// The deployment of `id` on `host`, if any. Tombstones are returned.
    pub fn get_deployment(&self, host: &str, id: &JobId) -> MasterResult<Option<Deployment>> {
        Ok(self
            .store
            .get_json::<Deployment>(&paths::deployment(host, id))?
            .map(|(deployment, _)| deployment))
    }

    fn check_host_and_job(&self, host: &str, id: &JobId) -> MasterResult<()> {
        let ops = vec![Op::check(paths::host(host)), Op::check(paths::job(id))];
        match self.store.transaction(ops) {
            Ok(_) => Ok(()),
            Err(e) => Err(match e.op_failure() {
                Some((0, StoreError::NoNode(_))) => MasterError::HostNotFound(host.to_string()),
                Some((1, StoreError::NoNode(_))) => MasterError::JobNotFound(id.clone()),
                _ => e.into(),
            }),
        }
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Register a host. Registering an existing host is a no-op.
    pub fn add_host(&self, host: &str) -> MasterResult<()> {
        validate_host(host).map_err(|e| MasterError::InvalidIdentifier(e.to_string()))?;
        let info = HostInfo {
            name: host.to_string(),
            registered_at: epoch_millis(),
        };
        match self.store.create_json(&paths::host(host), &info) {
            Ok(_) => {
                info!(%host, "host added");
                Ok(())
            }
            Err(StoreError::NodeExists(_)) => {
                debug!(%host, "host already registered");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deregister a host. Its deployments and statuses are left alone.
    pub fn remove_host(&self, host: &str) -> MasterResult<()> {
        match self.store.delete(&paths::host(host), None) {
            Ok(()) => {
                info!(%host, "host removed");
                Ok(())
            }
            Err(StoreError::NoNode(_) | StoreError::InvalidPath(_)) => {
                Err(MasterError::HostNotFound(host.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all registered hosts.
    pub fn list_hosts(&self) -> MasterResult<Vec<String>> {
        Ok(self
            .store
            .list_json::<HostInfo>(paths::HOSTS)?
            .into_iter()
            .map(|(name, _, _)| name)
            .collect())
    }

    /// Presence, registration, deployments and statuses of one host.
    ///
    /// `None` when nothing at all is known about the host.
    pub fn get_host_status(&self, host: &str) -> MasterResult<Option<HostStatus>> {
        if validate_host(host).is_err() {
            return Ok(None);
        }
        let registered = self.store.exists(&paths::host(host))?.is_some();
        let up = self.store.exists(&paths::presence(host))?.is_some();
        let deployments: Vec<Deployment> = self
            .store
            .list_json::<Deployment>(&paths::deployments(host))?
            .into_iter()
            .map(|(_, deployment, _)| deployment)
            .collect();
        let statuses: Vec<TaskStatus> = self
            .store
            .list_json::<TaskStatus>(&paths::statuses(host))?
            .into_iter()
            .map(|(_, status, _)| status)
            .collect();

        if !registered && !up && deployments.is_empty() && statuses.is_empty() {
            return Ok(None);
        }
        Ok(Some(status::host_status(registered, up, deployments, statuses)))
    }

    /// Deployments and statuses of one job across every host it is on.
    pub fn get_job_status(&self, id: &JobId) -> MasterResult<JobStatus> {
        let job = self.get_job(id)?;
        let mut fragments = Vec::new();
        for host in self.store.children(&paths::job_hosts(id))? {
            // The deployment may have been torn down since the index was read.
            let Some((deployment, _)) = self
                .store
                .get_json::<Deployment>(&paths::deployment(&host, id))?
            else {
                continue;
            };
            let status = self
                .store
                .get_json::<TaskStatus>(&paths::status(&host, id))?
                .map(|(status, _)| status);
            fragments.push((host, deployment, status));
        }
        Ok(status::job_status(job, fragments))
    }

    // ── Masters ────────────────────────────────────────────────────

    /// Publish this master's presence. The record lives as long as the
    /// returned session.
    pub fn register_master(&self, info: &MasterInfo) -> MasterResult<Session> {
        let session = self.store.open_session();
        session.create_ephemeral_json(&paths::master(&info.id), info)?;
        info!(master_id = %info.id, address = %info.address, "master registered");
        Ok(session)
    }

    pub fn get_running_masters(&self) -> MasterResult<Vec<MasterInfo>> {
        Ok(self
            .store
            .list_json::<MasterInfo>(paths::MASTERS)?
            .into_iter()
            .map(|(_, info, _)| info)
            .collect())
    }
}
