//! armada-api — REST surface of the Armada master.
//!
//! A thin transport over [`MasterModel`]: every route parses its inputs,
//! calls one model operation and maps the outcome onto an HTTP status plus
//! an operation-specific status enum from [`armada_core::protocol`].
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/jobs/` | List all jobs |
//! | PUT | `/api/v1/jobs/{id}` | Create a job |
//! | GET | `/api/v1/jobs/{id}` | Get a job |
//! | DELETE | `/api/v1/jobs/{id}` | Delete an unreferenced job |
//! | GET | `/api/v1/jobs/{id}/status` | Job status across hosts |
//! | GET | `/api/v1/agents/` | List registered hosts |
//! | PUT | `/api/v1/agents/{host}` | Register a host |
//! | DELETE | `/api/v1/agents/{host}` | Deregister a host |
//! | GET | `/api/v1/agents/{host}/status` | Host status |
//! | PUT | `/api/v1/agents/{host}/jobs/{id}` | Deploy a job |
//! | PATCH | `/api/v1/agents/{host}/jobs/{id}` | Change a deployment's goal |
//! | GET | `/api/v1/agents/{host}/jobs/{id}` | Get a deployment |
//! | DELETE | `/api/v1/agents/{host}/jobs/{id}` | Undeploy (tombstone) |
//! | GET | `/api/v1/masters/` | Running masters |

pub mod handlers;

use armada_master::MasterModel;
use axum::Router;
use axum::routing::get;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub model: MasterModel,
}

/// Build the master API router.
pub fn build_router(model: MasterModel) -> Router {
    let state = ApiState { model };

    let api_routes = Router::new()
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/", get(handlers::list_jobs))
        .route(
            "/jobs/{id}",
            get(handlers::get_job).put(handlers::put_job).delete(handlers::delete_job),
        )
        .route("/jobs/{id}/status", get(handlers::job_status))
        .route("/agents", get(handlers::list_agents))
        .route("/agents/", get(handlers::list_agents))
        .route(
            "/agents/{host}",
            axum::routing::put(handlers::put_agent).delete(handlers::delete_agent),
        )
        .route("/agents/{host}/status", get(handlers::agent_status))
        .route(
            "/agents/{host}/jobs/{id}",
            get(handlers::get_deployment)
                .put(handlers::deploy_job)
                .patch(handlers::set_goal)
                .delete(handlers::undeploy_job),
        )
        .route("/masters", get(handlers::list_masters))
        .route("/masters/", get(handlers::list_masters))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
