use crate::infra::{AppState, ApplicationIntake, Platform};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use std::sync::Arc;
use verifly::verification::{verification_router, RunCoordinator};

/// Verification API plus the operational endpoints and the intake route that
/// feeds the in-memory platform.
pub(crate) fn service_router(coordinator: Arc<RunCoordinator>, platform: Platform) -> Router {
    verification_router(coordinator)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/applications", post(register_application))
        .layer(Extension(platform))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn register_application(
    Extension(platform): Extension<Platform>,
    Json(intake): Json<ApplicationIntake>,
) -> Response {
    match platform.applications.register(intake) {
        Ok(summary) => {
            let payload = json!({
                "application_id": summary.id,
                "applicant_id": summary.applicant_id,
                "destination_country": summary.destination_country,
            });
            (StatusCode::CREATED, Json(payload)).into_response()
        }
        Err(err) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response()
        }
    }
}
