//! Route-level tests against the in-process router.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use zone_common::config::Config;
use zone_engine::zones::{MemoryZoneStore, Zone, ZoneKind, ZoneStore};
use zone_engine::{router, MitigationState};

async fn state() -> Arc<MitigationState> {
    let store = Arc::new(MemoryZoneStore::new());
    store
        .upsert_zone(
            ZoneKind::OrderBlock,
            Zone::new("INFY", date(2024, 5, 20), 110.0, 100.0),
        )
        .await
        .unwrap();

    let history = Arc::new(StubHistory::new());
    history.set("INFY", vec![candle("INFY", 118.0, 105.0, 115.0, "21 May 2024")]);

    let engine = default_engine(
        Arc::new(SpyScanner::new(&["INFY", "TCS"])),
        history,
        store,
        vec![margin("INFY", 5.0), margin("TCS", 3.0)],
    )
    .await;

    Arc::new(MitigationState::with_engine(Config::default(), Arc::new(engine)))
}

async fn send(state: &Arc<MitigationState>, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router(Arc::clone(state)).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let state = state().await;
    let (status, body) = send(&state, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "zone-engine");
}

#[tokio::test]
async fn test_scan_route() {
    let state = state().await;

    let (status, body) = send(&state, Method::GET, "/api/v1/scans/swing-reclaim?refresh=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["candidates"][0]["symbol"], "INFY");

    let (status, body) = send(&state, Method::GET, "/api/v1/scans/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_evaluate_then_read_cached_mitigations() {
    let state = state().await;

    let (status, _) = send(&state, Method::GET, "/api/v1/mitigations/daily", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &state,
        Method::POST,
        "/api/v1/mitigations",
        Some(json!({"strategy": STRATEGY, "cache_key": "daily", "kind": "order_block"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["zone_date"], "2024-05-20");

    let (status, body) = send(&state, Method::GET, "/api/v1/mitigations/daily", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["symbol"], "INFY");
}

#[tokio::test]
async fn test_zone_routes() {
    let state = state().await;

    let (status, body) = send(&state, Method::GET, "/api/v1/zones/INFY", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_blocks"][0]["high"], 110.0);

    let (status, _) = send(&state, Method::GET, "/api/v1/zones/TCS", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&state, Method::DELETE, "/api/v1/zones/INFY/supply/2024-05-20", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&state, Method::DELETE, "/api/v1/zones/INFY/order_block/20-05-2024", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&state, Method::DELETE, "/api/v1/zones/INFY/order_block/2024-05-20", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&state, Method::DELETE, "/api/v1/zones/INFY/order_block/2024-05-20", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_automation_trigger_and_reload() {
    let state = state().await;

    let (status, _) = send(&state, Method::POST, "/api/v1/automation/supply", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&state, Method::POST, "/api/v1/automation/fvg", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["kind"], "fair_value_gap");

    let (status, body) = send(&state, Method::POST, "/api/v1/reference/reload", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["margins"], 2);
    assert_eq!(body["strategies"], 1);
}
