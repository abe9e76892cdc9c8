use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("refresh_cycles_total", "Completed refresh cycles by status.");
        describe_counter!(
            "refresh_skipped_total",
            "Periodic ticks skipped because a cycle was in flight."
        );
        describe_histogram!("refresh_cycle_duration_ms", "Refresh cycle wall time in milliseconds.");
        describe_counter!("fetch_attempts_total", "HTTP attempts made by the resilient fetcher.");
        describe_counter!("fetch_failures_total", "Failed fetch attempts by error kind.");
        describe_counter!("source_fallback_total", "Fallback values served, by source.");
        describe_counter!(
            "notify_subscriber_errors_total",
            "Change subscribers that errored or panicked."
        );
        describe_gauge!(
            "snapshot_last_refresh_ts",
            "Unix ts of the last committed refresh cycle."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder for this process.
    pub fn init() -> Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
