//! REST API handlers.
//!
//! Read endpoints go straight to `StateStore`; anything that changes a
//! rollout goes through `RolloutController` so identity locks and
//! counters are honored.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use rollgate_controller::ControllerError;
use rollgate_state::{MetricSample, Phase, RolloutRecord, RolloutSpec};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn controller_error(err: &ControllerError) -> axum::response::Response {
    let status = match err {
        ControllerError::InvalidSpec(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ControllerError::NotFound(_) => StatusCode::NOT_FOUND,
        ControllerError::AlreadyActive(_) => StatusCode::CONFLICT,
        ControllerError::ReconcileInProgress(_) => StatusCode::CONFLICT,
        ControllerError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&err.to_string(), status).into_response()
}

// ── Rollouts ───────────────────────────────────────────────────

/// Condensed per-rollout view for list responses.
#[derive(serde::Serialize)]
pub struct RolloutSummary {
    pub id: String,
    pub phase: Phase,
    pub step_index: u32,
    pub stable_weight: u8,
    pub canary_weight: u8,
    pub canary_revision: String,
}

impl From<&RolloutRecord> for RolloutSummary {
    fn from(r: &RolloutRecord) -> Self {
        Self {
            id: r.spec.id.clone(),
            phase: r.status.phase,
            step_index: r.status.step_index,
            stable_weight: r.status.stable_weight,
            canary_weight: r.status.canary_weight,
            canary_revision: r.status.canary_revision.clone(),
        }
    }
}

/// GET /api/v1/rollouts
pub async fn list_rollouts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_rollouts() {
        Ok(records) => {
            let summaries: Vec<RolloutSummary> = records.iter().map(RolloutSummary::from).collect();
            ApiResponse::ok(summaries).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/rollouts
pub async fn submit_rollout(
    State(state): State<ApiState>,
    Json(spec): Json<RolloutSpec>,
) -> impl IntoResponse {
    match state.controller.submit(spec).await {
        Ok(id) => (
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({ "id": id })),
        )
            .into_response(),
        Err(e) => controller_error(&e),
    }
}

/// GET /api/v1/rollouts/{id}
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_rollout(&id) {
        Ok(Some(record)) => ApiResponse::ok(record.status).into_response(),
        Ok(None) => error_response("rollout not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/rollouts/{id}/promote
pub async fn promote_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.promote_now(&id).await {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => controller_error(&e),
    }
}

/// Request body for an abort.
#[derive(serde::Deserialize)]
pub struct AbortRequest {
    pub reason: Option<String>,
}

/// POST /api/v1/rollouts/{id}/abort
pub async fn abort_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<AbortRequest>,
) -> impl IntoResponse {
    let reason = req.reason.as_deref().unwrap_or("operator-requested");
    match state.controller.abort_now(&id, reason).await {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => controller_error(&e),
    }
}

// ── Analysis and history ───────────────────────────────────────

/// GET /api/v1/rollouts/{id}/analysis
pub async fn list_analysis_runs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_analysis_records(&id, 50) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/rollouts/{id}/revisions
pub async fn list_revisions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.list_revisions(&id, 50) {
        Ok(revisions) => ApiResponse::ok(revisions).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Metric ingestion ───────────────────────────────────────────

/// POST /api/v1/metrics/samples
pub async fn ingest_samples(
    State(state): State<ApiState>,
    Json(samples): Json<Vec<MetricSample>>,
) -> impl IntoResponse {
    for sample in &samples {
        if let Err(e) = state.store.put_metric_sample(sample) {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }
    state
        .controller
        .counters()
        .record_samples(samples.len() as u64);
    tracing::debug!(count = samples.len(), "ingested metric samples");
    ApiResponse::ok(serde_json::json!({ "ingested": samples.len() })).into_response()
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = state.controller.counters().render_prometheus();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
