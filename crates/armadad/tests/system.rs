//! End-to-end tests: master API, coordination store and agents in one
//! process. Agents use the fake driver; everything else is real.

use std::sync::Arc;
use std::time::Duration;

use armada_agent::driver::FakeDriver;
use armada_agent::{Agent, AgentConfig, AgentHandle, RetryPolicy};
use armada_core::{Goal, Job, TaskState};
use armada_master::{MasterError, MasterModel};
use armada_store::CoordStore;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

struct Cluster {
    model: MasterModel,
    router: Router,
    driver: FakeDriver,
}

impl Cluster {
    fn new() -> Self {
        let model = MasterModel::new(CoordStore::open_in_memory().unwrap());
        Self {
            router: armada_api::build_router(model.clone()),
            model,
            driver: FakeDriver::new(),
        }
    }

    fn start_agent(&self, host: &str) -> AgentHandle {
        let config = AgentConfig {
            retry: RetryPolicy {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(100),
                multiplier: 2,
            },
            status_poll_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(1),
            ..AgentConfig::new(host)
        };
        Agent::new(config, self.model.store().clone(), Arc::new(self.driver.clone())).spawn()
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_job(&self, job: &Job) {
        let (status, _) = self
            .send("PUT", &format!("/api/v1/jobs/{}", job.id), Some(json!(job)))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    async fn deploy(&self, host: &str, job: &Job) -> (StatusCode, Value) {
        self.send(
            "PUT",
            &format!("/api/v1/agents/{host}/jobs/{}", job.id),
            Some(json!({"job_id": job.id.to_string(), "goal": "START"})),
        )
        .await
    }

    async fn undeploy(&self, host: &str, job: &Job) -> (StatusCode, Value) {
        self.send("DELETE", &format!("/api/v1/agents/{host}/jobs/{}", job.id), None)
            .await
    }

    async fn deployment(&self, host: &str, job: &Job) -> (StatusCode, Value) {
        self.send("GET", &format!("/api/v1/agents/{host}/jobs/{}", job.id), None)
            .await
    }

    async fn host_status(&self, host: &str) -> Value {
        let (status, body) = self
            .send("GET", &format!("/api/v1/agents/{host}/status"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    fn task_state(&self, host: &str, job: &Job) -> Option<TaskState> {
        self.model
            .get_host_status(host)
            .unwrap()
            .and_then(|status| status.statuses.get(&job.id).map(|s| s.state))
    }
}

fn foo() -> Job {
    Job::builder("foo", "1.0", "busybox")
        .command(["sleep", "3600"])
        .build()
        .unwrap()
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
async fn undeploy_while_agent_is_down_keeps_tombstone_visible() {
    let cluster = Cluster::new();
    let job = foo();
    cluster.create_job(&job).await;

    let agent = cluster.start_agent("h1");
    eventually("h1 registered", || {
        cluster.model.list_hosts().unwrap() == vec!["h1".to_string()]
    })
    .await;

    let (status, body) = cluster.deploy("h1", &job).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    let (_, body) = cluster.deployment("h1", &job).await;
    assert_eq!(body["goal"], "START");

    eventually("running", || cluster.task_state("h1", &job) == Some(TaskState::Running)).await;
    let view = cluster.host_status("h1").await;
    assert_eq!(view["status"], "UP");
    assert_eq!(view["statuses"][job.id.to_string()]["state"], "RUNNING");

    agent.stop().await.unwrap();

    let (status, body) = cluster.undeploy("h1", &job).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");

    // Nobody is processing the tombstone; it must stay visible.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (status, body) = cluster.deployment("h1", &job).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["goal"], "UNDEPLOY");

    let view = cluster.host_status("h1").await;
    assert_eq!(view["status"], "DOWN");
    assert_eq!(view["jobs"][job.id.to_string()]["goal"], "UNDEPLOY");
    assert!(view["statuses"].get(job.id.to_string()).is_some());
}

#[tokio::test]
async fn restarted_agent_converges_on_tombstone() {
    let cluster = Cluster::new();
    let job = foo();
    cluster.create_job(&job).await;

    let agent = cluster.start_agent("h1");
    eventually("h1 registered", || !cluster.model.list_hosts().unwrap().is_empty()).await;
    cluster.deploy("h1", &job).await;
    eventually("running", || cluster.task_state("h1", &job) == Some(TaskState::Running)).await;
    agent.stop().await.unwrap();

    cluster.undeploy("h1", &job).await;
    assert_eq!(cluster.driver.running(&job.id).len(), 1);

    let agent = cluster.start_agent("h1");
    eventually("tombstone removed", || {
        cluster.model.get_deployment("h1", &job.id).unwrap().is_none()
    })
    .await;
    assert!(cluster.task_state("h1", &job).is_none());
    assert!(cluster.driver.running(&job.id).is_empty());
    assert_eq!(cluster.driver.start_count(), 1);

    let (status, _) = cluster.deployment("h1", &job).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn job_removal_waits_for_teardown() {
    let cluster = Cluster::new();
    let job = foo();
    cluster.create_job(&job).await;
    let agent = cluster.start_agent("h1");
    eventually("h1 registered", || !cluster.model.list_hosts().unwrap().is_empty()).await;
    cluster.deploy("h1", &job).await;

    let job_uri = format!("/api/v1/jobs/{}", job.id);
    let (status, body) = cluster.send("DELETE", &job_uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["status"], "STILL_IN_USE");

    cluster.undeploy("h1", &job).await;
    // Still in use until the agent has torn the deployment down.
    eventually("tombstone removed", || {
        cluster.model.get_deployment("h1", &job.id).unwrap().is_none()
    })
    .await;

    let (status, body) = cluster.send("DELETE", &job_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn deploy_to_registered_but_offline_host_waits_for_agent() {
    let cluster = Cluster::new();
    let job = foo();
    cluster.create_job(&job).await;
    cluster.send("PUT", "/api/v1/agents/h2", None).await;

    let (status, _) = cluster.deploy("h2", &job).await;
    assert_eq!(status, StatusCode::OK);
    let view = cluster.host_status("h2").await;
    assert_eq!(view["status"], "DOWN");
    assert_eq!(view["statuses"][job.id.to_string()]["state"], "UNKNOWN");

    let agent = cluster.start_agent("h2");
    eventually("running", || cluster.task_state("h2", &job) == Some(TaskState::Running)).await;
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn one_job_on_several_hosts() {
    let cluster = Cluster::new();
    let job = foo();
    cluster.create_job(&job).await;
    let agents: Vec<_> = ["h1", "h2", "h3"]
        .into_iter()
        .map(|host| cluster.start_agent(host))
        .collect();
    eventually("hosts registered", || cluster.model.list_hosts().unwrap().len() == 3).await;

    for host in ["h1", "h2", "h3"] {
        let (status, _) = cluster.deploy(host, &job).await;
        assert_eq!(status, StatusCode::OK);
    }
    eventually("all running", || {
        ["h1", "h2", "h3"]
            .iter()
            .all(|host| cluster.task_state(host, &job) == Some(TaskState::Running))
    })
    .await;

    let (status, body) = cluster
        .send("GET", &format!("/api/v1/jobs/{}/status", job.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    for host in ["h1", "h2", "h3"] {
        assert_eq!(body["task_statuses"][host]["state"], "RUNNING");
    }

    cluster.undeploy("h2", &job).await;
    eventually("h2 torn down", || {
        cluster.model.get_deployment("h2", &job.id).unwrap().is_none()
    })
    .await;
    let status = cluster.model.get_job_status(&job.id).unwrap();
    assert_eq!(status.deployments.len(), 2);
    assert_eq!(cluster.driver.running(&job.id).len(), 2);

    for agent in agents {
        agent.stop().await.unwrap();
    }
}

#[tokio::test]
async fn concurrent_deploys_have_one_winner() {
    let cluster = Cluster::new();
    let job = foo();
    cluster.create_job(&job).await;
    cluster.model.add_host("h1").unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let model = cluster.model.clone();
        let job = job.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            model.deploy_job("h1", &armada_core::Deployment::of(job.id.clone(), Goal::Start))
        }));
    }
    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => ok += 1,
            Err(MasterError::AlreadyDeployed { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn mismatched_job_id_is_rejected_before_anything_else() {
    let cluster = Cluster::new();
    let job = foo();
    let other = Job::builder("bar", "1.0", "busybox").build().unwrap();

    // Neither job exists; the mismatch is still what gets reported.
    let (status, body) = cluster
        .send("PUT", &format!("/api/v1/jobs/{}", other.id), Some(json!(job)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "ID_MISMATCH");
    assert!(cluster.model.get_jobs().unwrap().is_empty());

    let (status, body) = cluster
        .send(
            "PUT",
            &format!("/api/v1/agents/ghost/jobs/{}", other.id),
            Some(json!({"job_id": job.id.to_string(), "goal": "START"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "ID_MISMATCH");
}
