//! Standalone regression tests.
//!
//! Validates the assembled control plane over the wire format: router,
//! JSON envelopes, status codes, and the controller wiring behind the
//! mutating endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use rollgate_api::build_router;
use rollgate_controller::{ControllerConfig, ManualClock, RolloutController};
use rollgate_metrics::StoreMetricProvider;
use rollgate_state::*;
use rollgate_traffic::LocalTrafficManager;

fn test_router() -> (Router, StateStore) {
    let store = StateStore::open_in_memory().unwrap();
    let controller = RolloutController::new(
        store.clone(),
        Arc::new(LocalTrafficManager::new()),
        Arc::new(StoreMetricProvider::new(store.clone())),
        Arc::new(ManualClock::new(1_000)),
        ControllerConfig::default(),
    );
    (build_router(store.clone(), controller), store)
}

fn test_spec(ns: &str, name: &str) -> RolloutSpec {
    RolloutSpec {
        id: format!("{ns}/{name}"),
        namespace: ns.to_string(),
        name: name.to_string(),
        stable_revision: Revision {
            id: "v1".to_string(),
            image: "registry/app:v1".to_string(),
            created_at: 500,
        },
        canary_revision: Revision {
            id: "v2".to_string(),
            image: "registry/app:v2".to_string(),
            created_at: 900,
        },
        replicas: 3,
        steps: vec![
            Step::SetWeight { percent: 10 },
            Step::Pause { duration_secs: None },
        ],
        analysis_templates: HashMap::new(),
        created_at: 1_000,
    }
}

#[tokio::test]
async fn standalone_api_list_rollouts_empty() {
    let (router, _store) = test_router();

    let req = Request::builder()
        .uri("/api/v1/rollouts")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_api_submit_and_get_rollout() {
    let (router, _store) = test_router();

    let spec = test_spec("prod", "gateway");
    let body = serde_json::to_vec(&spec).unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/rollouts")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Get the rollout back.
    let req = Request::builder()
        .uri("/api/v1/rollouts/prod%2Fgateway")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_api_submit_invalid_spec() {
    let (router, _store) = test_router();

    let mut spec = test_spec("prod", "gateway");
    spec.steps.clear();
    let body = serde_json::to_vec(&spec).unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/rollouts")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn standalone_api_duplicate_rollout_conflicts() {
    let (router, _store) = test_router();
    let body = serde_json::to_vec(&test_spec("prod", "gateway")).unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/rollouts")
        .header("content-type", "application/json")
        .body(Body::from(body.clone()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/rollouts")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn standalone_api_get_missing_rollout() {
    let (router, _store) = test_router();

    let req = Request::builder()
        .uri("/api/v1/rollouts/nope%2Fmissing")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_api_promote_missing_rollout() {
    let (router, _store) = test_router();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/rollouts/nope%2Fmissing/promote")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_api_abort_rollout() {
    let (router, store) = test_router();

    let body = serde_json::to_vec(&test_spec("prod", "gateway")).unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/rollouts")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    router.clone().oneshot(req).await.unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/rollouts/prod%2Fgateway/abort")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"reason":"bad deploy"}"#))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // The restore is instant on the local manager, so the rollout is
    // already terminal.
    let record = store.get_rollout("prod/gateway").unwrap().unwrap();
    assert_eq!(record.status.phase, Phase::RolledBack);
    assert_eq!(record.status.abort_reason.as_deref(), Some("bad deploy"));
}

#[tokio::test]
async fn standalone_api_analysis_log_endpoint() {
    let (router, _store) = test_router();

    let req = Request::builder()
        .uri("/api/v1/rollouts/prod%2Fgateway/analysis")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_api_revisions_endpoint() {
    let (router, store) = test_router();
    let revision = Revision {
        id: "v0".to_string(),
        image: "registry/app:v0".to_string(),
        created_at: 100,
    };
    store.push_revision("prod/gateway", &revision, 10).unwrap();

    let req = Request::builder()
        .uri("/api/v1/rollouts/prod%2Fgateway/revisions")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_api_ingest_samples() {
    let (router, store) = test_router();

    let body = r#"[{"revision":"v2","metric":"critical_vuln_count","at":1000,"value":0.0}]"#;
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/metrics/samples")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let found = store
        .latest_metric_in_window("v2", "critical_vuln_count", 900, 1_100)
        .unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn standalone_api_metrics_endpoint() {
    let (router, _store) = test_router();

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
