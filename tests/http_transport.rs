// tests/http_transport.rs
// ReqwestTransport against an in-process axum server on 127.0.0.1:0.

mod common;

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use oi_monitor::fetch::RequestOptions;
use oi_monitor::{CycleStatus, FetchError, ReqwestTransport, ResilientFetcher, RetryPolicy, SourceStatus};

type Hits = Arc<Mutex<Vec<(String, Option<String>)>>>;

async fn data_file(
    State(hits): State<Hits>,
    Path(file): Path<String>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    hits.lock().unwrap().push((file.clone(), query));
    let body = match file.as_str() {
        "daily_summary.json" => common::SUMMARY,
        "BTCUSDT.json" => common::BTC,
        "anomalies.json" => common::ANOMALIES,
        "hourly_24h_summary.json" => common::HOURLY,
        "slow.json" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            "{}"
        }
        "down.json" => return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response(),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn serve() -> (SocketAddr, Hits) {
    let hits: Hits = Arc::default();
    let app = Router::new()
        .route("/assets/data/{file}", get(data_file))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

fn fetcher() -> ResilientFetcher {
    ResilientFetcher::new(Arc::new(ReqwestTransport::new()))
}

#[tokio::test]
async fn full_refresh_over_http() {
    let (addr, hits) = serve().await;
    let mut cfg = common::test_config();
    cfg.base_url = format!("http://{addr}/assets/data/");
    let orch = oi_monitor::build_orchestrator(&cfg);

    let cycle = orch.refresh_all().await.unwrap();

    assert_eq!(cycle.status(), CycleStatus::FullSuccess);
    assert_eq!(orch.store().read("hourly").status, SourceStatus::Fresh);

    let hits = hits.lock().unwrap();
    assert_eq!(hits.len(), 4);
    for (file, query) in hits.iter() {
        let query = query.as_deref().unwrap_or_default();
        assert!(query.starts_with("_t="), "{file} requested without cache buster");
    }
}

#[tokio::test]
async fn non_2xx_is_retried_then_reported() {
    let (addr, hits) = serve().await;
    let url = format!("http://{addr}/assets/data/down.json");
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 10,
        timeout_ms: 2_000,
    };

    let err = fetcher()
        .fetch(&url, &RequestOptions::default(), &policy)
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::HttpStatus { status: 503 });
    assert_eq!(hits.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_file_is_http_status_404() {
    let (addr, _) = serve().await;
    let url = format!("http://{addr}/assets/data/XRPUSDT.json");

    let err = fetcher()
        .fetch_json(&url, &RequestOptions::default(), &RetryPolicy::once(2_000))
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::HttpStatus { status: 404 });
}

#[tokio::test]
async fn slow_server_hits_the_attempt_deadline() {
    let (addr, _) = serve().await;
    let url = format!("http://{addr}/assets/data/slow.json");

    let err = fetcher()
        .fetch(&url, &RequestOptions::default(), &RetryPolicy::once(100))
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::Timeout { after_ms: 100 });
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher()
        .fetch(
            &format!("http://{addr}/assets/data/daily_summary.json"),
            &RequestOptions::default(),
            &RetryPolicy::once(2_000),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Transport(_)), "got {err:?}");
}
