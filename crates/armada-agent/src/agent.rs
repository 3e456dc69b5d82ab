//! Agent — reconciles one host's deployments against its runtime.
//!
//! The loop suspends on three things only: a change under
//! `/deployments/{host}`, the earliest pending retry, and the status poll.
//! Desired state is always re-derived from the store (a full snapshot on
//! startup, after a lagged watch and on every poll), never from a local
//! journal, so an agent restarted mid-transition simply picks up where the
//! store says things stand.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use armada_core::{
    Deployment, Goal, HostInfo, Job, JobId, TaskState, TaskStatus, paths, time::epoch_millis,
};
use armada_store::{CoordStore, Op, Session, StoreError, WatchError, WatchEvent};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::driver::{RuntimeDriver, WorkloadState};
use crate::error::{AgentError, AgentResult};
use crate::task::Task;

pub struct Agent {
    config: AgentConfig,
    store: CoordStore,
    driver: Arc<dyn RuntimeDriver>,
    tasks: BTreeMap<JobId, Task>,
}

/// A running agent spawned with [`Agent::spawn`].
pub struct AgentHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<AgentResult<()>>,
}

impl AgentHandle {
    /// Signal shutdown and wait for the agent to finish.
    pub async fn stop(self) -> AgentResult<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| AgentError::Task(e.to_string()))?
    }
}

enum Outcome {
    Keep,
    /// The deployment record is gone; stop tracking it.
    Removed,
}

impl Agent {
    pub fn new(config: AgentConfig, store: CoordStore, driver: Arc<dyn RuntimeDriver>) -> Self {
        Self {
            config,
            store,
            driver,
            tasks: BTreeMap::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Run on a background task with its own shutdown channel.
    pub fn spawn(self) -> AgentHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        AgentHandle { shutdown, task }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    ///
    /// Workloads with goal START keep running after shutdown; pending
    /// teardowns get one attempt bounded by the shutdown grace period.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        let host = self.config.host.clone();
        let session = self.store.open_session();
        self.register(&session)?;

        // Subscribe before the snapshot so no change falls between them.
        let mut watcher = self.store.watch(&paths::deployments(&host));
        info!(%host, "agent started");
        self.resync(true).await;
        let mut next_poll = Instant::now() + self.config.status_poll_interval;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let wake = self.next_wake(next_poll);
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!(%host, "agent shutting down");
                    break;
                }
                event = watcher.recv() => match event {
                    Ok(event) => self.on_event(&event).await,
                    Err(WatchError::Lagged(missed)) => {
                        warn!(%host, missed, "deployment watch lagged, resyncing");
                        self.resync(false).await;
                    }
                    Err(WatchError::Closed) => {
                        warn!(%host, "coordination store closed");
                        break;
                    }
                },
                _ = tokio::time::sleep_until(wake) => {
                    let now = Instant::now();
                    if now >= next_poll {
                        self.resync(true).await;
                        next_poll = now + self.config.status_poll_interval;
                    } else {
                        self.retry_due(now).await;
                    }
                }
            }
        }

        self.drain().await;
        session.close()?;
        info!(%host, "agent stopped");
        Ok(())
    }

    /// Ensure the host registration exists and publish presence.
    fn register(&self, session: &Session) -> AgentResult<()> {
        let host = &self.config.host;
        let info = HostInfo {
            name: host.clone(),
            registered_at: epoch_millis(),
        };
        match self.store.create_json(&paths::host(host), &info) {
            Ok(_) => info!(%host, "host registered"),
            Err(StoreError::NodeExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        session.create_ephemeral_json(&paths::presence(host), &info)?;
        Ok(())
    }

    fn next_wake(&self, next_poll: Instant) -> Instant {
        self.tasks
            .values()
            .filter_map(|task| task.retry_at)
            .fold(next_poll, Instant::min)
    }

    /// Re-read every deployment of this host and reconcile each one.
    /// With `probe`, running workloads are also asked for their state.
    async fn resync(&mut self, probe: bool) {
        let host = self.config.host.clone();
        let records = match self.store.list_json::<Deployment>(&paths::deployments(&host)) {
            Ok(records) => records,
            Err(e) => {
                error!(%host, error = %e, "failed to read deployments");
                return;
            }
        };

        let mut seen = BTreeSet::new();
        for (_, deployment, stat) in records {
            seen.insert(deployment.job_id.clone());
            self.apply(deployment, stat.version, probe).await;
        }

        let gone: Vec<JobId> = self
            .tasks
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            self.forget(&id).await;
        }
    }

    async fn on_event(&mut self, event: &WatchEvent) {
        let Ok(id) = JobId::parse(paths::leaf(&event.path)) else {
            debug!(path = %event.path, "ignoring change to non-deployment node");
            return;
        };
        if event.path != paths::deployment(&self.config.host, &id) {
            return;
        }
        // Act on the record as it is now, not as the event described it.
        match self.store.get_json::<Deployment>(&event.path) {
            Ok(Some((deployment, stat))) => self.apply(deployment, stat.version, false).await,
            Ok(None) => self.forget(&id).await,
            Err(e) => error!(path = %event.path, error = %e, "failed to read deployment"),
        }
    }

    async fn apply(&mut self, deployment: Deployment, version: u64, probe: bool) {
        let id = deployment.job_id.clone();
        if !self.tasks.contains_key(&id) {
            let path = paths::status(&self.config.host, &id);
            let previous = match self.store.get_json::<TaskStatus>(&path) {
                Ok(previous) => previous.map(|(status, _)| status),
                Err(e) => {
                    error!(%path, error = %e, "failed to read previous status");
                    return;
                }
            };
            let task = Task::new(id.clone(), deployment.goal, self.config.retry, previous);
            self.tasks.insert(id.clone(), task);
        }
        if let Some(task) = self.tasks.get_mut(&id) {
            task.set_goal(deployment.goal, version);
        }
        self.reconcile(&id, probe).await;
    }

    async fn retry_due(&mut self, now: Instant) {
        let due: Vec<JobId> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.retry_at.is_some_and(|at| at <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.reconcile(&id, false).await;
        }
    }

    async fn reconcile(&mut self, id: &JobId, probe: bool) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        if !task.is_due(Instant::now()) {
            return;
        }
        task.retry_at = None;

        let reconciler = Reconciler {
            store: &self.store,
            driver: self.driver.as_ref(),
            host: &self.config.host,
        };
        let result = match task.goal {
            Goal::Start => reconciler.ensure_running(task, probe).await,
            Goal::Stop => reconciler.ensure_stopped(task).await,
            Goal::Undeploy => reconciler.tear_down(task).await,
        };
        match result {
            Ok(Outcome::Keep) => {}
            Ok(Outcome::Removed) => {
                self.tasks.remove(id);
            }
            Err(e) => reconciler.fail(task, &e),
        }
    }

    /// The deployment vanished without this agent removing it.
    async fn forget(&mut self, id: &JobId) {
        let Some(task) = self.tasks.remove(id) else {
            return;
        };
        let host = &self.config.host;
        if let Some(handle) = &task.handle
            && let Err(e) = self.driver.stop(handle).await
        {
            warn!(%host, job_id = %id, %handle, error = %e, "failed to stop orphaned workload");
        }
        match self.store.delete(&paths::status(host, id), None) {
            Ok(()) | Err(StoreError::NoNode(_)) => {}
            Err(e) => warn!(%host, job_id = %id, error = %e, "failed to remove status"),
        }
        info!(%host, job_id = %id, "deployment disappeared, workload released");
    }

    /// Give pending teardowns one last attempt within the grace period.
    async fn drain(&mut self) {
        let pending: Vec<JobId> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.goal == Goal::Undeploy)
            .map(|(id, _)| id.clone())
            .collect();
        if pending.is_empty() {
            return;
        }
        let host = self.config.host.clone();
        let grace = self.config.shutdown_grace;
        let finished = tokio::time::timeout(grace, async {
            for id in &pending {
                if let Some(task) = self.tasks.get_mut(id) {
                    task.retry_at = None;
                }
                self.reconcile(id, false).await;
            }
        })
        .await;
        if finished.is_err() {
            warn!(%host, ?grace, "shutdown grace elapsed with teardowns pending");
        }
        let left = self
            .tasks
            .values()
            .filter(|task| task.goal == Goal::Undeploy)
            .count();
        if left > 0 {
            warn!(%host, left, "teardowns left for the next agent run");
        }
    }
}

/// Borrowed context for driving one task toward its goal.
struct Reconciler<'a> {
    store: &'a CoordStore,
    driver: &'a dyn RuntimeDriver,
    host: &'a str,
}

impl Reconciler<'_> {
    async fn ensure_running(&self, task: &mut Task, probe: bool) -> AgentResult<Outcome> {
        let host = self.host;
        if let Some(handle) = task.handle.clone() {
            if task.verified && task.state == TaskState::Running && !probe {
                return Ok(Outcome::Keep);
            }
            match self.driver.status(&handle).await? {
                WorkloadState::Running => {
                    // Only a workload that outlived a start counts as recovered.
                    task.backoff.reset();
                    task.verified = true;
                    task.state = TaskState::Running;
                    task.error = None;
                    self.publish(task)?;
                    return Ok(Outcome::Keep);
                }
                WorkloadState::Exited { code } => {
                    // Release the runtime's record of the dead workload.
                    self.driver.stop(&handle).await?;
                    task.handle = None;
                    task.verified = true;
                    task.state = TaskState::Exited;
                    task.error = Some(match code {
                        Some(code) => format!("exited with code {code}"),
                        None => "killed by signal".to_string(),
                    });
                    self.publish(task)?;
                    let delay = task.defer();
                    warn!(%host, job_id = %task.job_id, ?code, ?delay, "workload exited, restart scheduled");
                    return Ok(Outcome::Keep);
                }
                WorkloadState::Unknown => {
                    debug!(%host, job_id = %task.job_id, %handle, "runtime lost workload, starting anew");
                    task.handle = None;
                }
            }
        }

        let job = self
            .store
            .get_json::<Job>(&paths::job(&task.job_id))?
            .map(|(job, _)| job)
            .ok_or_else(|| AgentError::JobMissing(task.job_id.clone()))?;

        task.state = TaskState::Creating;
        task.error = None;
        self.publish(task)?;

        let handle = self.driver.start(&job).await?;
        task.handle = Some(handle.clone());
        task.verified = true;
        task.state = TaskState::Starting;
        self.publish(task)?;

        // Anything other than running is picked up by the next probe.
        if self.driver.status(&handle).await? == WorkloadState::Running {
            task.state = TaskState::Running;
            self.publish(task)?;
        }
        info!(%host, job_id = %task.job_id, %handle, "workload started");
        Ok(Outcome::Keep)
    }

    async fn ensure_stopped(&self, task: &mut Task) -> AgentResult<Outcome> {
        if let Some(handle) = task.handle.clone() {
            task.state = TaskState::Stopping;
            self.publish(task)?;
            self.driver.stop(&handle).await?;
            task.handle = None;
            info!(host = %self.host, job_id = %task.job_id, %handle, "workload stopped");
        }
        task.verified = true;
        task.state = TaskState::Stopped;
        task.error = None;
        self.publish(task)?;
        Ok(Outcome::Keep)
    }

    /// Stop the workload (if this host ever ran one), then delete the
    /// tombstone, its reverse-index entry and the status in one transaction.
    async fn tear_down(&self, task: &mut Task) -> AgentResult<Outcome> {
        let host = self.host;
        let id = task.job_id.clone();

        if let Some(handle) = task.handle.clone() {
            task.state = TaskState::Stopping;
            self.publish(task)?;
            self.driver.stop(&handle).await?;
            task.handle = None;
            task.state = TaskState::Stopped;
            task.error = None;
            self.publish(task)?;
            info!(%host, job_id = %id, %handle, "workload stopped for undeploy");
        }

        let index = paths::job_host(&id, host);
        let status = paths::status(host, &id);
        let mut ops = vec![Op::delete(
            paths::deployment(host, &id),
            Some(task.deployment_version),
        )];
        if self.store.exists(&index)?.is_some() {
            ops.push(Op::delete(index, None));
        }
        if self.store.exists(&status)?.is_some() {
            ops.push(Op::delete(status, None));
        }

        match self.store.transaction(ops) {
            Ok(_) => {
                info!(%host, job_id = %id, "deployment removed");
                Ok(Outcome::Removed)
            }
            Err(e) => match e.op_failure() {
                // The goal changed under us; the pending watch event re-applies it.
                Some((0, StoreError::BadVersion { .. })) => {
                    debug!(%host, job_id = %id, "deployment changed during teardown");
                    Ok(Outcome::Keep)
                }
                Some((0, StoreError::NoNode(_))) => Ok(Outcome::Removed),
                _ => Err(e.into()),
            },
        }
    }

    fn publish(&self, task: &mut Task) -> AgentResult<()> {
        let Some(status) = task.pending_status(epoch_millis()) else {
            return Ok(());
        };
        self.store
            .put_json(&paths::status(self.host, &task.job_id), &status)?;
        debug!(host = %self.host, job_id = %task.job_id, state = ?status.state, "status published");
        task.last_published = Some(status);
        Ok(())
    }

    /// Record a failed attempt and schedule the next one.
    fn fail(&self, task: &mut Task, error: &AgentError) {
        let delay = task.defer();
        task.state = TaskState::Failed;
        task.error = Some(error.to_string());
        warn!(
            host = %self.host,
            job_id = %task.job_id,
            goal = ?task.goal,
            error = %error,
            ?delay,
            "reconciliation failed, retrying"
        );
        if let Err(e) = self.publish(task) {
            error!(host = %self.host, job_id = %task.job_id, error = %e, "failed to publish failure status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use armada_master::MasterModel;

    use crate::driver::{DriverCall, FakeDriver};
    use crate::retry::RetryPolicy;

    fn config() -> AgentConfig {
        AgentConfig {
            host: "h1".into(),
            retry: RetryPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
                multiplier: 2,
            },
            status_poll_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    fn quiet_config() -> AgentConfig {
        AgentConfig {
            status_poll_interval: Duration::from_secs(3600),
            ..config()
        }
    }

    struct Fixture {
        model: MasterModel,
        driver: FakeDriver,
        job: Job,
    }

    impl Fixture {
        fn new() -> Self {
            let model = MasterModel::new(CoordStore::open_in_memory().unwrap());
            let job = Job::builder("foo", "1.0", "busybox")
                .command(["sleep", "3600"])
                .build()
                .unwrap();
            model.add_job(&job).unwrap();
            model.add_host("h1").unwrap();
            Self {
                model,
                driver: FakeDriver::new(),
                job,
            }
        }

        fn agent(&self, config: AgentConfig) -> AgentHandle {
            Agent::new(
                config,
                self.model.store().clone(),
                Arc::new(self.driver.clone()),
            )
            .spawn()
        }

        fn deploy(&self, goal: Goal) {
            self.model
                .deploy_job("h1", &Deployment::of(self.job.id.clone(), goal))
                .unwrap();
        }

        fn status(&self) -> Option<TaskStatus> {
            self.model
                .store()
                .get_json::<TaskStatus>(&paths::status("h1", &self.job.id))
                .unwrap()
                .map(|(status, _)| status)
        }

        fn state(&self) -> Option<TaskState> {
            self.status().map(|status| status.state)
        }

        fn deployment(&self) -> Option<Deployment> {
            self.model.get_deployment("h1", &self.job.id).unwrap()
        }
    }

    async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn starts_deployed_job_and_reports_running() {
        let fx = Fixture::new();
        let agent = fx.agent(config());
        fx.deploy(Goal::Start);

        eventually("running", || fx.state() == Some(TaskState::Running)).await;
        assert_eq!(fx.driver.start_count(), 1);
        assert_eq!(fx.driver.running(&fx.job.id).len(), 1);

        let status = fx.status().unwrap();
        assert_eq!(status.goal, Goal::Start);
        assert!(status.handle.is_some());

        agent.stop().await.unwrap();
        // Shutdown does not stop workloads that should keep running.
        assert_eq!(fx.driver.stop_count(), 0);
    }

    #[tokio::test]
    async fn reobserving_unchanged_deployment_is_a_no_op() {
        let fx = Fixture::new();
        fx.deploy(Goal::Start);
        let agent = fx.agent(quiet_config());
        eventually("running", || fx.state() == Some(TaskState::Running)).await;

        let status_version = fx
            .model
            .store()
            .exists(&paths::status("h1", &fx.job.id))
            .unwrap()
            .unwrap()
            .version;
        fx.driver.clear_calls();

        // Rewrite the same intent: the agent sees a change event.
        let path = paths::deployment("h1", &fx.job.id);
        fx.model
            .store()
            .set_json(&path, &Deployment::of(fx.job.id.clone(), Goal::Start), None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(fx.driver.calls().is_empty());
        let after = fx
            .model
            .store()
            .exists(&paths::status("h1", &fx.job.id))
            .unwrap()
            .unwrap()
            .version;
        assert_eq!(after, status_version);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn undeploy_stops_workload_and_removes_records() {
        let fx = Fixture::new();
        let agent = fx.agent(config());
        fx.deploy(Goal::Start);
        eventually("running", || fx.state() == Some(TaskState::Running)).await;

        fx.model.undeploy_job("h1", &fx.job.id).unwrap();
        eventually("deployment removed", || fx.deployment().is_none()).await;

        assert!(fx.status().is_none());
        assert_eq!(fx.driver.stop_count(), 1);
        assert!(fx.driver.running(&fx.job.id).is_empty());
        // The job is no longer referenced.
        fx.model.remove_job(&fx.job.id).unwrap();
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn tombstone_never_started_is_removed_without_driver_calls() {
        let fx = Fixture::new();
        fx.deploy(Goal::Start);
        fx.model.undeploy_job("h1", &fx.job.id).unwrap();

        let agent = fx.agent(config());
        eventually("deployment removed", || fx.deployment().is_none()).await;
        assert!(fx.driver.calls().is_empty());
        assert!(fx.status().is_none());
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restarted_agent_tears_down_tombstone() {
        let fx = Fixture::new();
        let first = fx.agent(config());
        fx.deploy(Goal::Start);
        eventually("running", || fx.state() == Some(TaskState::Running)).await;
        first.stop().await.unwrap();

        fx.model.undeploy_job("h1", &fx.job.id).unwrap();
        // Offline agent: the tombstone and the stale status stay put.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.deployment().unwrap().goal, Goal::Undeploy);
        assert_eq!(fx.state(), Some(TaskState::Running));

        let second = fx.agent(config());
        eventually("deployment removed", || fx.deployment().is_none()).await;
        assert!(fx.status().is_none());
        assert!(fx.driver.running(&fx.job.id).is_empty());
        assert_eq!(fx.driver.start_count(), 1);
        second.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restarted_agent_adopts_running_workload() {
        let fx = Fixture::new();
        let first = fx.agent(config());
        fx.deploy(Goal::Start);
        eventually("running", || fx.state() == Some(TaskState::Running)).await;
        first.stop().await.unwrap();

        let second = fx.agent(config());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fx.driver.start_count(), 1);
        assert_eq!(fx.state(), Some(TaskState::Running));
        second.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_failure_is_reported_and_retried() {
        let fx = Fixture::new();
        fx.driver.fail_next_starts(2);
        let agent = fx.agent(config());
        fx.deploy(Goal::Start);

        eventually("running after retries", || {
            fx.state() == Some(TaskState::Running)
        })
        .await;
        assert_eq!(fx.driver.start_count(), 3);
        assert!(fx.status().unwrap().error.is_none());
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failed_start_is_visible_in_status() {
        let fx = Fixture::new();
        fx.driver.fail_next_starts(u32::MAX);
        let agent = fx.agent(config());
        fx.deploy(Goal::Start);

        eventually("failed", || fx.state() == Some(TaskState::Failed)).await;
        let status = fx.status().unwrap();
        assert!(status.error.unwrap().contains("injected start failure"));
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn teardown_is_retried_until_it_succeeds() {
        let fx = Fixture::new();
        let agent = fx.agent(config());
        fx.deploy(Goal::Start);
        eventually("running", || fx.state() == Some(TaskState::Running)).await;

        fx.driver.fail_next_stops(3);
        fx.model.undeploy_job("h1", &fx.job.id).unwrap();
        eventually("deployment removed", || fx.deployment().is_none()).await;
        assert_eq!(fx.driver.stop_count(), 4);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn exited_workload_is_restarted() {
        let fx = Fixture::new();
        let agent = fx.agent(config());
        fx.deploy(Goal::Start);
        eventually("running", || fx.state() == Some(TaskState::Running)).await;

        let handle = fx.driver.running(&fx.job.id).remove(0);
        fx.driver.set_exited(&handle, 1);
        eventually("restarted", || fx.driver.start_count() == 2).await;
        eventually("running again", || {
            fx.state() == Some(TaskState::Running)
                && fx.status().unwrap().handle.as_deref() != Some(handle.as_str())
        })
        .await;
        // The dead workload was released before the replacement started.
        assert!(fx.driver.calls().contains(&DriverCall::Stop { handle }));
        assert_eq!(fx.driver.tracked(), 1);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn crash_loop_backs_off() {
        let fx = Fixture::new();
        fx.driver.exit_on_start(1);
        let agent = fx.agent(AgentConfig {
            retry: RetryPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_secs(1),
                multiplier: 2,
            },
            status_poll_interval: Duration::from_millis(10),
            ..config()
        });
        fx.deploy(Goal::Start);

        // Doubling from 10ms leaves room for about six starts in this window;
        // restarting at the base delay would need far more.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let starts = fx.driver.start_count();
        assert!(starts >= 3, "only {starts} starts");
        assert!(starts <= 8, "{starts} starts, backoff was reset");
        assert!(fx.driver.tracked() <= 1);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn lagged_watch_resyncs_deployments() {
        let fx = Fixture::new();
        let gate = fx.driver.hold_next_start();
        let agent = fx.agent(quiet_config());
        fx.deploy(Goal::Start);
        eventually("start in flight", || fx.driver.start_count() == 1).await;

        // The goal flips while the agent is stuck in the driver, then the
        // change is pushed out of the watch buffer.
        fx.model.undeploy_job("h1", &fx.job.id).unwrap();
        let store = fx.model.store();
        for i in 0..armada_store::EVENT_CAPACITY + 64 {
            store.create(&format!("/scratch-{i}"), Vec::new()).unwrap();
        }
        gate.notify_one();

        eventually("deployment removed", || fx.deployment().is_none()).await;
        assert!(fx.status().is_none());
        assert_eq!(fx.driver.stop_count(), 1);
        assert!(fx.driver.running(&fx.job.id).is_empty());
        agent.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashed_processes_are_not_retained() {
        let model = MasterModel::new(CoordStore::open_in_memory().unwrap());
        let job = Job::builder("crasher", "1.0", "busybox")
            .command(["sh", "-c", "exit 1"])
            .build()
            .unwrap();
        model.add_job(&job).unwrap();
        model.add_host("h1").unwrap();
        let driver = Arc::new(crate::driver::ProcessDriver::new());
        let agent = Agent::new(config(), model.store().clone(), driver.clone()).spawn();
        model
            .deploy_job("h1", &Deployment::of(job.id.clone(), Goal::Start))
            .unwrap();

        eventually("exit observed", || {
            model
                .store()
                .get_json::<TaskStatus>(&paths::status("h1", &job.id))
                .unwrap()
                .is_some_and(|(status, _)| status.error.as_deref() == Some("exited with code 1"))
        })
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(driver.tracked().await <= 1);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_goal_keeps_deployment() {
        let fx = Fixture::new();
        let agent = fx.agent(config());
        fx.deploy(Goal::Start);
        eventually("running", || fx.state() == Some(TaskState::Running)).await;

        fx.model
            .update_deployment("h1", &Deployment::of(fx.job.id.clone(), Goal::Stop))
            .unwrap();
        eventually("stopped", || fx.state() == Some(TaskState::Stopped)).await;
        assert_eq!(fx.deployment().unwrap().goal, Goal::Stop);
        assert!(fx.driver.running(&fx.job.id).is_empty());

        fx.model
            .update_deployment("h1", &Deployment::of(fx.job.id.clone(), Goal::Start))
            .unwrap();
        eventually("running again", || fx.state() == Some(TaskState::Running)).await;
        assert_eq!(fx.driver.start_count(), 2);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn presence_follows_agent_lifetime() {
        let fx = Fixture::new();
        let agent = fx.agent(config());
        eventually("presence", || {
            fx.model
                .store()
                .exists(&paths::presence("h1"))
                .unwrap()
                .is_some()
        })
        .await;

        agent.stop().await.unwrap();
        assert!(fx.model.store().exists(&paths::presence("h1")).unwrap().is_none());
        // Registration survives.
        assert_eq!(fx.model.list_hosts().unwrap(), vec!["h1"]);
    }

    #[tokio::test]
    async fn agent_registers_unknown_host() {
        let model = MasterModel::new(CoordStore::open_in_memory().unwrap());
        let agent = Agent::new(
            AgentConfig::new("fresh"),
            model.store().clone(),
            Arc::new(FakeDriver::new()),
        )
        .spawn();
        eventually("registration", || {
            model.list_hosts().unwrap() == vec!["fresh".to_string()]
        })
        .await;
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn pending_teardown_completes_on_shutdown() {
        let fx = Fixture::new();
        let agent = fx.agent(config());
        fx.deploy(Goal::Start);
        eventually("running", || fx.state() == Some(TaskState::Running)).await;

        // Fail the first stop so the teardown is waiting on its backoff.
        fx.driver.fail_next_stops(1);
        fx.model.undeploy_job("h1", &fx.job.id).unwrap();
        eventually("failed stop", || {
            fx.driver
                .calls()
                .iter()
                .any(|call| matches!(call, DriverCall::Stop { .. }))
        })
        .await;

        agent.stop().await.unwrap();
        assert!(fx.deployment().is_none());
    }
}
