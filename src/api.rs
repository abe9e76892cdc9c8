// src/api.rs
//! Read side for renderers: snapshot, per-source state, orchestrator status,
//! and a forced-refresh trigger.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::{RefreshError, SourceFailure};
use crate::orchestrator::{ConnectionStatus, CycleStatus, RefreshCycle, RefreshOrchestrator, RefreshState};
use crate::snapshot::{format_age, Snapshot, SourceState};
use crate::sources::types::HourlyOverview;
use crate::sources::HOURLY_KEY;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<RefreshOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/snapshot", get(snapshot))
        .route("/api/snapshot/{source}", get(source_state))
        .route("/api/status", get(status))
        .route("/api/refresh", post(force_refresh))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct SnapshotResp {
    connection: ConnectionStatus,
    last_successful_update: Option<DateTime<Utc>>,
    last_update_age: Option<String>,
    degraded_sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hourly_overview: Option<HourlyOverview>,
    sources: Snapshot,
}

async fn snapshot(State(state): State<AppState>) -> Json<SnapshotResp> {
    let orch = &state.orchestrator;
    let store = orch.store();
    let last = store.last_successful_update();
    let hourly_overview = store
        .value(HOURLY_KEY)
        .and_then(|v| v.as_hourly().and_then(|h| h.overview()));

    Json(SnapshotResp {
        connection: orch.connection_status(),
        last_successful_update: last,
        last_update_age: last.map(|t| format_age(Utc::now() - t)),
        degraded_sources: store.degraded_sources(),
        hourly_overview,
        sources: store.read_all(),
    })
}

async fn source_state(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Json<SourceState> {
    Json(state.orchestrator.store().read(&source))
}

#[derive(Serialize)]
struct CycleSummary {
    status: CycleStatus,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    ok: usize,
    total: usize,
    failed_sources: Vec<String>,
    persistent_failures: Vec<String>,
    message: String,
}

impl From<&RefreshCycle> for CycleSummary {
    fn from(c: &RefreshCycle) -> Self {
        Self {
            status: c.status(),
            started_at: c.started_at,
            finished_at: c.finished_at,
            ok: c.ok_count(),
            total: c.outcomes.len(),
            failed_sources: c.failed_sources().into_iter().map(String::from).collect(),
            persistent_failures: c.persistent_failures.clone(),
            message: c.message(),
        }
    }
}

#[derive(Serialize)]
struct StatusResp {
    state: RefreshState,
    connection: ConnectionStatus,
    sources: Vec<String>,
    cycles_started: u64,
    skipped_ticks: u64,
    last_cycle: Option<CycleSummary>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResp> {
    let orch = &state.orchestrator;
    Json(StatusResp {
        state: orch.state(),
        connection: orch.connection_status(),
        sources: orch.source_keys(),
        cycles_started: orch.cycles_started(),
        skipped_ticks: orch.skipped_ticks(),
        last_cycle: orch.last_cycle().as_ref().map(CycleSummary::from),
    })
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<SourceFailure>,
}

async fn force_refresh(State(state): State<AppState>) -> Response {
    match state.orchestrator.force_refresh().await {
        Ok(cycle) => Json(CycleSummary::from(&cycle)).into_response(),
        Err(e @ RefreshError::AlreadyRefreshing) => (
            StatusCode::CONFLICT,
            Json(ErrorResp {
                error: e.to_string(),
                failures: vec![],
            }),
        )
            .into_response(),
        Err(RefreshError::TotalFailure { failures }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResp {
                error: "every source failed".to_string(),
                failures,
            }),
        )
            .into_response(),
    }
}
