//! OI Monitor binary entrypoint.
//! Boots the Axum HTTP server over the snapshot store and starts the refresh loops.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oi_monitor::metrics::Metrics;
use oi_monitor::notify::webhook::WebhookAlerter;
use oi_monitor::RefreshConfig;

/// Compact tracing logs. Shuttle may already have installed a subscriber,
/// in which case this is a no-op.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oi_monitor=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = RefreshConfig::load_default()?;
    let metrics = Metrics::init()?;

    let orchestrator = oi_monitor::build_orchestrator(&cfg);
    if let Some(url) = cfg.degraded_webhook_url.clone() {
        // subscription lives as long as the notifier
        let _ = WebhookAlerter::new(url).attach(orchestrator.notifier(), cfg.alert_cooldown_secs);
    }
    oi_monitor::spawn_refresh_loops(orchestrator.clone(), &cfg);

    let router = oi_monitor::app(orchestrator).merge(metrics.router());
    Ok(router.into())
}
