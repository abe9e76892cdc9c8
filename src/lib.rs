// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod snapshot;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::config::RefreshConfig;
pub use crate::error::{ErrorKind, FetchError, RefreshError};
pub use crate::fetch::{http::ReqwestTransport, ResilientFetcher, RetryPolicy, Transport};
pub use crate::notify::{ChangeNotifier, Subscription};
pub use crate::orchestrator::scheduler::Schedule;
pub use crate::orchestrator::{CycleStatus, RefreshCycle, RefreshOrchestrator, RefreshPlan};
pub use crate::snapshot::{SnapshotStore, SourceState, SourceStatus};

use std::sync::Arc;

/// Router the binary serves (without `/metrics`, which needs a recorder).
pub fn app(orchestrator: Arc<RefreshOrchestrator>) -> axum::Router {
    api::router(api::AppState::new(orchestrator))
}

/// Construct store, notifier and orchestrator from config, wired to HTTP.
pub fn build_orchestrator(cfg: &RefreshConfig) -> Arc<RefreshOrchestrator> {
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new());
    Arc::new(RefreshOrchestrator::from_config(
        cfg,
        transport,
        Arc::new(SnapshotStore::new()),
        Arc::new(ChangeNotifier::new()),
    ))
}

/// Startup load, then install the light and full schedules.
/// Call from inside a tokio runtime.
pub fn spawn_refresh_loops(orchestrator: Arc<RefreshOrchestrator>, cfg: &RefreshConfig) {
    let delay = cfg.startup_retry_delay();
    let max_attempts = cfg.startup_max_attempts;
    let light = Schedule::light(cfg.light_interval());
    let full = Schedule::full(cfg.full_interval());

    tokio::spawn(async move {
        match orchestrator.initial_load(delay, max_attempts).await {
            Ok(cycle) => tracing::info!(target: "refresh", "{}", cycle.message()),
            Err(e) => tracing::warn!(target: "refresh", error = %e, "startup load gave up; schedules will keep trying"),
        }
        orchestrator.schedule_periodic(light);
        orchestrator.schedule_periodic(full);
    });
}
