//! rollgate-api — REST API for Rollgate.
//!
//! Provides axum route handlers for submitting rollout documents,
//! inspecting rollout state, issuing operator commands, and ingesting
//! metric samples.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/rollouts` | List rollout summaries |
//! | POST | `/api/v1/rollouts` | Submit a rollout document |
//! | GET | `/api/v1/rollouts/{id}` | Get rollout status |
//! | POST | `/api/v1/rollouts/{id}/promote` | Skip the current pause or analysis gate |
//! | POST | `/api/v1/rollouts/{id}/abort` | Abort and restore stable traffic |
//! | GET | `/api/v1/rollouts/{id}/analysis` | Recent analysis run records |
//! | GET | `/api/v1/rollouts/{id}/revisions` | Promoted revision history |
//! | POST | `/api/v1/metrics/samples` | Ingest a batch of metric samples |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use rollgate_controller::RolloutController;
use rollgate_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub controller: RolloutController,
}

/// Build the complete API router (REST + metrics exposition).
pub fn build_router(store: StateStore, controller: RolloutController) -> Router {
    let state = ApiState { store, controller };

    let api_routes = Router::new()
        .route("/rollouts", get(handlers::list_rollouts).post(handlers::submit_rollout))
        .route("/rollouts/{id}", get(handlers::get_rollout))
        .route("/rollouts/{id}/promote", post(handlers::promote_rollout))
        .route("/rollouts/{id}/abort", post(handlers::abort_rollout))
        .route("/rollouts/{id}/analysis", get(handlers::list_analysis_runs))
        .route("/rollouts/{id}/revisions", get(handlers::list_revisions))
        .route("/metrics/samples", post(handlers::ingest_samples))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
