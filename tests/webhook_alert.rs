// tests/webhook_alert.rs
// Degraded-source webhook: fires on persistent failures, once per cooldown.

mod common;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use common::*;
use oi_monitor::notify::webhook::WebhookAlerter;
use oi_monitor::RetryPolicy;

async fn hook(State(tx): State<mpsc::UnboundedSender<Value>>, Json(body): Json<Value>) -> StatusCode {
    let _ = tx.send(body);
    StatusCode::NO_CONTENT
}

async fn webhook_server() -> (String, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().route("/hook", post(hook)).with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), rx)
}

#[tokio::test]
async fn persistent_failure_posts_one_alert_per_cooldown() {
    let (url, mut rx) = webhook_server().await;

    let transport = ScriptedTransport::new();
    healthy(&transport);
    transport.route("hourly_24h_summary.json", vec![Step::http(503)]);
    let mut cfg = test_config();
    cfg.failure_warning_threshold = 2;
    cfg.retry = RetryPolicy::once(1_000);
    let orch = orchestrator(&cfg, transport);

    let _sub = WebhookAlerter::new(url)
        .with_timeout(2)
        .attach(orch.notifier(), 3_600);

    orch.refresh_all().await.unwrap();
    let second = orch.refresh_all().await.unwrap();
    assert_eq!(second.persistent_failures, vec!["hourly"]);

    let body = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("alert within 5s")
        .expect("channel open");
    assert_eq!(body["embeds"][0]["title"], "Dashboard data degraded");
    let description = body["embeds"][0]["description"].as_str().unwrap();
    assert!(description.contains("hourly"), "{description}");

    // still failing, but inside the cooldown
    orch.refresh_all().await.unwrap();
    let extra = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(extra.is_err(), "second alert leaked through cooldown");
}

#[tokio::test]
async fn healthy_cycles_send_nothing() {
    let (url, mut rx) = webhook_server().await;
    let transport = ScriptedTransport::new();
    healthy(&transport);
    let orch = orchestrator(&test_config(), transport);
    let _sub = WebhookAlerter::new(url).attach(orch.notifier(), 60);

    orch.refresh_all().await.unwrap();
    orch.refresh_all().await.unwrap();

    let got = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(got.is_err());
}
