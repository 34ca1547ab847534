use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::coordinator::{RunCoordinator, VerificationError};
use super::domain::{RunId, SourceHit, VerificationRun};

/// Router builder exposing the verification endpoints.
pub fn verification_router(coordinator: Arc<RunCoordinator>) -> Router {
    Router::new()
        .route("/api/v1/verifications", post(start_handler))
        .route("/api/v1/verifications/:run_id", get(run_handler))
        .route("/api/v1/verifications/:run_id/retry", post(retry_handler))
        .route(
            "/api/v1/applications/:application_id/verifications",
            get(application_runs_handler),
        )
        .route(
            "/api/v1/applications/:application_id/verifications/active",
            get(active_run_handler),
        )
        .with_state(coordinator)
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartRequest {
    #[serde(default)]
    application_id: String,
    #[serde(default)]
    actor_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RetryRequest {
    #[serde(default)]
    actor_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunDetail {
    run: VerificationRun,
    hits: Vec<SourceHit>,
}

pub(crate) async fn start_handler(
    State(coordinator): State<Arc<RunCoordinator>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<StartRequest>,
) -> Response {
    match coordinator
        .start(&request.application_id, request.actor_id, client_ip(&headers))
        .await
    {
        Ok(run) => (StatusCode::CREATED, axum::Json(run.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn run_handler(
    State(coordinator): State<Arc<RunCoordinator>>,
    Path(run_id): Path<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let run = match coordinator.get_run(run_id).await {
        Ok(run) => run,
        Err(error) => return error_response(error),
    };
    match coordinator.list_hits(run_id).await {
        Ok(hits) => (StatusCode::OK, axum::Json(RunDetail { run, hits })).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn retry_handler(
    State(coordinator): State<Arc<RunCoordinator>>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    body: Option<axum::Json<RetryRequest>>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    // The body is optional; a bare POST retries as the system actor.
    let request = body.map(|axum::Json(request)| request).unwrap_or_default();
    match coordinator
        .retry(run_id, request.actor_id, client_ip(&headers))
        .await
    {
        Ok(run) => (StatusCode::ACCEPTED, axum::Json(run.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn application_runs_handler(
    State(coordinator): State<Arc<RunCoordinator>>,
    Path(application_id): Path<String>,
) -> Response {
    match coordinator.list_runs_by_application(&application_id).await {
        Ok(runs) => (StatusCode::OK, axum::Json(runs)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn active_run_handler(
    State(coordinator): State<Arc<RunCoordinator>>,
    Path(application_id): Path<String>,
) -> Response {
    match coordinator.get_active_run(&application_id).await {
        Ok(Some(run)) => (StatusCode::OK, axum::Json(run)).into_response(),
        Ok(None) => {
            let payload = json!({
                "error": "no active verification",
                "application_id": application_id,
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

fn parse_run_id(raw: &str) -> Result<RunId, Response> {
    RunId::parse(raw).ok_or_else(|| {
        let payload = json!({ "error": "run_id must be a UUID" });
        (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
    })
}

/// First hop of `x-forwarded-for`, if the request carried one.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn error_response(error: VerificationError) -> Response {
    let status = match &error {
        VerificationError::Validation(_) => StatusCode::BAD_REQUEST,
        VerificationError::NotFound(_) => StatusCode::NOT_FOUND,
        VerificationError::Conflict(_) => StatusCode::CONFLICT,
        VerificationError::Orchestration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
