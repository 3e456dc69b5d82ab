//! REST API handlers.
//!
//! Domain errors from the model become a specific HTTP status plus detail
//! enum; store failures become a 500 and are logged.

use armada_core::protocol::{
    AgentDeleteResponse, AgentDeleteStatus, AgentPutResponse, AgentPutStatus, CreateJobResponse,
    CreateJobStatus, ErrorBody, JobDeleteResponse, JobDeleteStatus, JobDeployResponse,
    JobDeployStatus, JobUndeployResponse, JobUndeployStatus, SetGoalResponse, SetGoalStatus,
};
use armada_core::{Deployment, Job, JobId};
use armada_master::MasterError;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::ApiState;

fn reply<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    reply(status, ErrorBody::new(msg))
}

fn server_error(e: &MasterError) -> Response {
    error!(error = %e, "request failed");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "rejecting malformed body");
        error_response(&format!("invalid request body: {e}"), StatusCode::BAD_REQUEST)
    })
}

/// Job id from a request path. Deploy operations need the hash too.
fn parse_job_id(raw: &str, fully_qualified: bool) -> Option<JobId> {
    JobId::parse(raw)
        .ok()
        .filter(|id| !fully_qualified || id.is_fully_qualified())
}

// ── Jobs ───────────────────────────────────────────────────────

/// GET /api/v1/jobs/
pub async fn list_jobs(State(state): State<ApiState>) -> Response {
    match state.model.get_jobs() {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => server_error(&e),
    }
}

/// PUT /api/v1/jobs/{id}
pub async fn put_job(State(state): State<ApiState>, Path(id): Path<String>, body: Bytes) -> Response {
    let job: Job = match parse_body(&body) {
        Ok(job) => job,
        Err(resp) => return resp,
    };
    let created = |status| CreateJobResponse { status };

    let Some(path_id) = parse_job_id(&id, false) else {
        return reply(StatusCode::BAD_REQUEST, created(CreateJobStatus::InvalidId));
    };
    if job.id != path_id {
        return reply(StatusCode::BAD_REQUEST, created(CreateJobStatus::IdMismatch));
    }

    match state.model.add_job(&job) {
        Ok(()) => reply(StatusCode::OK, created(CreateJobStatus::Ok)),
        Err(MasterError::JobAlreadyExists(_)) => {
            reply(StatusCode::BAD_REQUEST, created(CreateJobStatus::JobAlreadyExists))
        }
        Err(MasterError::InvalidIdentifier(_)) => {
            reply(StatusCode::BAD_REQUEST, created(CreateJobStatus::InvalidId))
        }
        Err(e) => server_error(&e),
    }
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let Some(id) = parse_job_id(&id, false) else {
        return error_response("invalid job id", StatusCode::BAD_REQUEST);
    };
    match state.model.get_job(&id) {
        Ok(job) => Json(job).into_response(),
        Err(MasterError::JobNotFound(_)) => error_response("job not found", StatusCode::NOT_FOUND),
        Err(e) => server_error(&e),
    }
}

/// DELETE /api/v1/jobs/{id}
pub async fn delete_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let Some(id) = parse_job_id(&id, false) else {
        return error_response("invalid job id", StatusCode::BAD_REQUEST);
    };
    let deleted = |status| JobDeleteResponse { status };
    match state.model.remove_job(&id) {
        Ok(()) => reply(StatusCode::OK, deleted(JobDeleteStatus::Ok)),
        Err(MasterError::JobNotFound(_)) => {
            reply(StatusCode::NOT_FOUND, deleted(JobDeleteStatus::JobNotFound))
        }
        Err(MasterError::JobInUse(_)) => {
            reply(StatusCode::FORBIDDEN, deleted(JobDeleteStatus::StillInUse))
        }
        Err(e) => server_error(&e),
    }
}

/// GET /api/v1/jobs/{id}/status
pub async fn job_status(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let Some(id) = parse_job_id(&id, false) else {
        return error_response("invalid job id", StatusCode::BAD_REQUEST);
    };
    match state.model.get_job_status(&id) {
        Ok(status) => Json(status).into_response(),
        Err(MasterError::JobNotFound(_)) => error_response("job not found", StatusCode::NOT_FOUND),
        Err(e) => server_error(&e),
    }
}

// ── Agents ─────────────────────────────────────────────────────

/// GET /api/v1/agents/
pub async fn list_agents(State(state): State<ApiState>) -> Response {
    match state.model.list_hosts() {
        Ok(hosts) => Json(hosts).into_response(),
        Err(e) => server_error(&e),
    }
}

/// PUT /api/v1/agents/{host}
pub async fn put_agent(State(state): State<ApiState>, Path(host): Path<String>) -> Response {
    match state.model.add_host(&host) {
        Ok(()) => reply(
            StatusCode::OK,
            AgentPutResponse {
                status: AgentPutStatus::Ok,
                host,
            },
        ),
        Err(MasterError::InvalidIdentifier(_)) => reply(
            StatusCode::BAD_REQUEST,
            AgentPutResponse {
                status: AgentPutStatus::InvalidHost,
                host,
            },
        ),
        Err(e) => server_error(&e),
    }
}

/// DELETE /api/v1/agents/{host}
pub async fn delete_agent(State(state): State<ApiState>, Path(host): Path<String>) -> Response {
    match state.model.remove_host(&host) {
        Ok(()) => reply(
            StatusCode::OK,
            AgentDeleteResponse {
                status: AgentDeleteStatus::Ok,
                host,
            },
        ),
        Err(MasterError::HostNotFound(_)) => reply(
            StatusCode::NOT_FOUND,
            AgentDeleteResponse {
                status: AgentDeleteStatus::NotFound,
                host,
            },
        ),
        Err(e) => server_error(&e),
    }
}

/// GET /api/v1/agents/{host}/status
pub async fn agent_status(State(state): State<ApiState>, Path(host): Path<String>) -> Response {
    match state.model.get_host_status(&host) {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => error_response("host not found", StatusCode::NOT_FOUND),
        Err(e) => server_error(&e),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// PUT /api/v1/agents/{host}/jobs/{id}
pub async fn deploy_job(
    State(state): State<ApiState>,
    Path((host, id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let deployment: Deployment = match parse_body(&body) {
        Ok(deployment) => deployment,
        Err(resp) => return resp,
    };
    let respond = |code, status| {
        reply(
            code,
            JobDeployResponse {
                status,
                host: host.clone(),
                job: id.clone(),
            },
        )
    };

    let Some(job_id) = parse_job_id(&id, true) else {
        return respond(StatusCode::BAD_REQUEST, JobDeployStatus::InvalidId);
    };
    if deployment.job_id != job_id {
        return respond(StatusCode::BAD_REQUEST, JobDeployStatus::IdMismatch);
    }

    match state.model.deploy_job(&host, &deployment) {
        Ok(()) => respond(StatusCode::OK, JobDeployStatus::Ok),
        Err(MasterError::JobNotFound(_)) => {
            respond(StatusCode::NOT_FOUND, JobDeployStatus::JobNotFound)
        }
        Err(MasterError::HostNotFound(_)) => {
            respond(StatusCode::NOT_FOUND, JobDeployStatus::AgentNotFound)
        }
        Err(MasterError::AlreadyDeployed { .. }) => {
            respond(StatusCode::METHOD_NOT_ALLOWED, JobDeployStatus::JobAlreadyDeployed)
        }
        Err(MasterError::InvalidGoal(_)) => {
            respond(StatusCode::BAD_REQUEST, JobDeployStatus::InvalidGoal)
        }
        Err(MasterError::InvalidIdentifier(_)) => {
            respond(StatusCode::BAD_REQUEST, JobDeployStatus::InvalidId)
        }
        Err(e) => server_error(&e),
    }
}

/// PATCH /api/v1/agents/{host}/jobs/{id}
pub async fn set_goal(
    State(state): State<ApiState>,
    Path((host, id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let deployment: Deployment = match parse_body(&body) {
        Ok(deployment) => deployment,
        Err(resp) => return resp,
    };
    let respond = |code, status| {
        reply(
            code,
            SetGoalResponse {
                status,
                host: host.clone(),
                job: id.clone(),
            },
        )
    };

    let Some(job_id) = parse_job_id(&id, true) else {
        return respond(StatusCode::BAD_REQUEST, SetGoalStatus::InvalidId);
    };
    if deployment.job_id != job_id {
        return respond(StatusCode::BAD_REQUEST, SetGoalStatus::IdMismatch);
    }

    match state.model.update_deployment(&host, &deployment) {
        Ok(()) => respond(StatusCode::OK, SetGoalStatus::Ok),
        Err(MasterError::JobNotFound(_)) => respond(StatusCode::NOT_FOUND, SetGoalStatus::JobNotFound),
        Err(MasterError::HostNotFound(_)) => {
            respond(StatusCode::NOT_FOUND, SetGoalStatus::AgentNotFound)
        }
        Err(MasterError::NotDeployed { .. }) => {
            respond(StatusCode::NOT_FOUND, SetGoalStatus::JobNotDeployed)
        }
        Err(e) => server_error(&e),
    }
}

/// GET /api/v1/agents/{host}/jobs/{id}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path((host, id)): Path<(String, String)>,
) -> Response {
    let Some(id) = parse_job_id(&id, false) else {
        return error_response("invalid job id", StatusCode::BAD_REQUEST);
    };
    if armada_core::validate_host(&host).is_err() {
        return error_response("deployment not found", StatusCode::NOT_FOUND);
    }
    match state.model.get_deployment(&host, &id) {
        Ok(Some(deployment)) => Json(deployment).into_response(),
        Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND),
        Err(e) => server_error(&e),
    }
}

/// DELETE /api/v1/agents/{host}/jobs/{id}
///
/// Only tombstones the deployment; the agent removes it after teardown.
pub async fn undeploy_job(
    State(state): State<ApiState>,
    Path((host, id)): Path<(String, String)>,
) -> Response {
    let respond = |code, status| {
        reply(
            code,
            JobUndeployResponse {
                status,
                host: host.clone(),
                job: id.clone(),
            },
        )
    };
    let Some(job_id) = parse_job_id(&id, true) else {
        return respond(StatusCode::BAD_REQUEST, JobUndeployStatus::InvalidId);
    };

    match state.model.undeploy_job(&host, &job_id) {
        Ok(()) => respond(StatusCode::OK, JobUndeployStatus::Ok),
        Err(MasterError::HostNotFound(_)) => {
            respond(StatusCode::NOT_FOUND, JobUndeployStatus::AgentNotFound)
        }
        Err(MasterError::JobNotFound(_)) => {
            respond(StatusCode::NOT_FOUND, JobUndeployStatus::JobNotFound)
        }
        Err(e) => server_error(&e),
    }
}

// ── Masters ────────────────────────────────────────────────────

/// GET /api/v1/masters/
pub async fn list_masters(State(state): State<ApiState>) -> Response {
    match state.model.get_running_masters() {
        Ok(masters) => Json(masters).into_response(),
        Err(e) => server_error(&e),
    }
}
