// tests/api_http.rs
//
// HTTP-level tests for the read API without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /api/snapshot, /api/snapshot/{source}
// - GET /api/status
// - POST /api/refresh (200 / 409 / 503)

mod common;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use std::time::Duration;
use tower::ServiceExt as _; // for `oneshot`

use common::*;
use oi_monitor::orchestrator::RefreshState;

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, json)
}

#[tokio::test]
async fn health_returns_ok() {
    let app = oi_monitor::app(orchestrator(&test_config(), ScriptedTransport::new()));
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn snapshot_before_first_load_is_empty_and_disconnected() {
    let app = oi_monitor::app(orchestrator(&test_config(), ScriptedTransport::new()));

    let (status, json) = call(&app, "GET", "/api/snapshot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["connection"], "disconnected");
    assert!(json["last_successful_update"].is_null());
    assert_eq!(json["sources"], serde_json::json!({}));

    let (status, json) = call(&app, "GET", "/api/snapshot/hourly").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "never_loaded");
    assert!(json["value"].is_null());
    assert_eq!(json["consecutive_failures"], 0);
}

#[tokio::test(start_paused = true)]
async fn snapshot_after_refresh_carries_values_and_overview() {
    let transport = ScriptedTransport::new();
    healthy(&transport);
    let orch = orchestrator(&test_config(), transport);
    orch.refresh_all().await.unwrap();
    let app = oi_monitor::app(orch);

    let (status, json) = call(&app, "GET", "/api/snapshot").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["connection"], "connected");
    assert_eq!(json["last_update_age"], "just now");
    assert_eq!(json["degraded_sources"], serde_json::json!([]));

    let summary = &json["sources"]["summary"];
    assert_eq!(summary["status"], "fresh");
    assert_eq!(summary["value"]["kind"], "summary");
    assert_eq!(summary["value"]["data"]["symbols"]["ETHUSDT"]["volume_change"], -4.5);

    let overview = &json["hourly_overview"];
    assert_eq!(overview["bullish"], 1);
    assert_eq!(overview["bearish"], 1);
    assert_eq!(overview["avg_price_change"], 1.0);

    let (_, btc) = call(&app, "GET", "/api/snapshot/symbol:BTCUSDT").await;
    assert_eq!(btc["value"]["kind"], "series");
    assert_eq!(btc["value"]["data"]["klines"]["1h"][0]["close"], 84210.5);
}

#[tokio::test(start_paused = true)]
async fn status_reports_last_cycle() {
    let transport = ScriptedTransport::new();
    healthy(&transport);
    transport.route("hourly_24h_summary.json", vec![Step::http(503)]);
    let orch = orchestrator(&test_config(), transport);
    orch.refresh_all().await.unwrap();
    let app = oi_monitor::app(orch);

    let (status, json) = call(&app, "GET", "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "idle");
    assert_eq!(json["cycles_started"], 1);
    assert_eq!(json["skipped_ticks"], 0);
    assert_eq!(json["sources"][1], "symbol:BTCUSDT");

    let last = &json["last_cycle"];
    assert_eq!(last["status"], "partial_success");
    assert_eq!(last["ok"], 3);
    assert_eq!(last["total"], 4);
    assert_eq!(last["failed_sources"], serde_json::json!(["hourly"]));
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_returns_the_cycle() {
    let transport = ScriptedTransport::new();
    healthy(&transport);
    let app = oi_monitor::app(orchestrator(&test_config(), transport.clone()));

    let (status, json) = call(&app, "POST", "/api/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "full_success");
    assert_eq!(json["message"], "loaded 4/4 sources");
    assert_eq!(transport.calls_to("BTCUSDT.json"), 1);
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_with_every_source_down_is_503() {
    let mut cfg = test_config();
    propagate_everything(&mut cfg);
    let app = oi_monitor::app(orchestrator(&cfg, ScriptedTransport::new()));

    let (status, json) = call(&app, "POST", "/api/refresh").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "every source failed");
    assert_eq!(json["failures"].as_array().unwrap().len(), 4);
    assert_eq!(json["failures"][0]["kind"], "transport");
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_during_a_cycle_is_409() {
    let transport = ScriptedTransport::new();
    healthy(&transport);
    transport.route(
        "daily_summary.json",
        vec![Step::ok(SUMMARY).after(Duration::from_secs(10))],
    );
    let orch = orchestrator(&test_config(), transport);
    let app = oi_monitor::app(orch.clone());

    let mut state = orch.subscribe_state();
    let running = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.refresh_all().await })
    };
    state
        .wait_for(|s| *s == RefreshState::Refreshing)
        .await
        .unwrap();

    let (status, json) = call(&app, "POST", "/api/refresh").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "a refresh cycle is already in progress");
    assert!(json.get("failures").is_none());

    let (_, st) = call(&app, "GET", "/api/status").await;
    assert_eq!(st["state"], "refreshing");

    running.await.unwrap().unwrap();
}
