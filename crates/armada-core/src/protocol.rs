//! Wire payloads for the master API.
//!
//! Every mutating endpoint answers with a response carrying an
//! operation-specific status enum alongside the HTTP status code, so clients
//! can tell `JOB_NOT_FOUND` from `AGENT_NOT_FOUND` behind the same 404.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateJobStatus {
    Ok,
    IdMismatch,
    InvalidId,
    JobAlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub status: CreateJobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobDeleteStatus {
    Ok,
    JobNotFound,
    StillInUse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDeleteResponse {
    pub status: JobDeleteStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobDeployStatus {
    Ok,
    InvalidId,
    IdMismatch,
    InvalidGoal,
    JobNotFound,
    AgentNotFound,
    JobAlreadyDeployed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDeployResponse {
    pub status: JobDeployStatus,
    pub host: String,
    /// Job id as it appeared in the request path.
    pub job: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetGoalStatus {
    Ok,
    InvalidId,
    IdMismatch,
    JobNotFound,
    AgentNotFound,
    JobNotDeployed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetGoalResponse {
    pub status: SetGoalStatus,
    pub host: String,
    pub job: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobUndeployStatus {
    Ok,
    InvalidId,
    AgentNotFound,
    JobNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUndeployResponse {
    pub status: JobUndeployStatus,
    pub host: String,
    pub job: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentPutStatus {
    Ok,
    InvalidHost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPutResponse {
    pub status: AgentPutStatus,
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentDeleteStatus {
    Ok,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDeleteResponse {
    pub status: AgentDeleteStatus,
    pub host: String,
}

/// Body of a failed request that has no operation-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
