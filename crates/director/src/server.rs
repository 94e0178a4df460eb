//! Director HTTP control surface
//!
//! `POST /dataflow/setup` and `POST /orchestrate/teardown` mirror the
//! command-bus operations; `GET /healthz` reports the derived state. Setup
//! answers 200 only when every desired resource reports exists or created;
//! a partial failure surfaces the first blocker.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use stratoflow_core::command::DataflowSelector;
use stratoflow_core::error::{DomainError, Result};
use stratoflow_core::health::{HealthCheck, HealthStatus};
use stratoflow_core::provisioning::ProvisionReport;

use crate::director::{Director, DirectorState};

#[derive(Clone)]
pub struct DirectorApiState {
    pub director: Arc<Director>,
}

/// Request body for setup and teardown; absent body means "all".
#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    #[serde(default = "default_dataflow")]
    pub dataflow_name: String,
}

fn default_dataflow() -> String {
    "all".to_string()
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    state: String,
    #[serde(flatten)]
    check: HealthCheck,
}

pub fn director_routes(state: DirectorApiState) -> Router {
    Router::new()
        .route("/dataflow/setup", post(setup_handler))
        .route("/orchestrate/teardown", post(teardown_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// Bind and serve on `addr`; returns the bound address (port 0 supported)
/// and the serve task.
pub async fn start_server(
    director: Arc<Director>,
    addr: SocketAddr,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("failed to bind {addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| DomainError::Infrastructure(format!("no local addr: {e}")))?;
    let app = director_routes(DirectorApiState { director });
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "director server stopped");
        }
    });
    info!(addr = %local_addr, "director control surface listening");
    Ok((local_addr, handle))
}

async fn setup_handler(
    State(state): State<DirectorApiState>,
    body: Option<Json<OrchestrateRequest>>,
) -> std::result::Result<Json<ProvisionReport>, (StatusCode, String)> {
    let selector = selector_from(body);
    info!(dataflow = %selector, "setup requested over HTTP");
    let report = state
        .director
        .setup(&selector)
        .await
        .map_err(map_director_error)?;
    match report.first_failure() {
        None => Ok(Json(report)),
        Some(blocker) => Err((
            StatusCode::CONFLICT,
            format!("{} {}: {}", blocker.kind, blocker.name, blocker.outcome),
        )),
    }
}

async fn teardown_handler(
    State(state): State<DirectorApiState>,
    body: Option<Json<OrchestrateRequest>>,
) -> std::result::Result<Json<ProvisionReport>, (StatusCode, String)> {
    let selector = selector_from(body);
    info!(dataflow = %selector, "teardown requested over HTTP");
    let report = state
        .director
        .teardown(&selector)
        .await
        .map_err(map_director_error)?;
    match report.first_failure() {
        None => Ok(Json(report)),
        Some(blocker) => Err((
            StatusCode::CONFLICT,
            format!("{} {}: {}", blocker.kind, blocker.name, blocker.outcome),
        )),
    }
}

async fn healthz_handler(State(state): State<DirectorApiState>) -> Json<HealthzResponse> {
    let director_state = state.director.state();
    let check = match director_state {
        DirectorState::Shutdown => HealthCheck::unhealthy("director", "shut down"),
        DirectorState::Init => HealthCheck {
            status: HealthStatus::Degraded,
            ..HealthCheck::healthy("director")
        },
        _ => HealthCheck::healthy("director"),
    };
    Json(HealthzResponse {
        state: director_state.to_string(),
        check,
    })
}

fn selector_from(body: Option<Json<OrchestrateRequest>>) -> DataflowSelector {
    let name = body
        .map(|Json(req)| req.dataflow_name)
        .unwrap_or_else(default_dataflow);
    DataflowSelector::from(name)
}

fn map_director_error(e: DomainError) -> (StatusCode, String) {
    let status = match &e {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::Precondition(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
