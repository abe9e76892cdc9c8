//! Demo that runs a couple of refresh cycles against the configured base URL
//! and prints what a renderer would see.

use oi_monitor::snapshot::format_age;
use oi_monitor::RefreshConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = RefreshConfig::load_default()?;
    let orch = oi_monitor::build_orchestrator(&cfg);
    let _sub = orch.notifier().subscribe(|cycle| {
        println!("cycle {}: {}", cycle.status().as_str(), cycle.message());
        Ok(())
    });

    for round in 0..2 {
        match orch.refresh_all().await {
            Ok(_) => {}
            Err(e) => println!("round {round} failed: {e}"),
        }
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    }

    for (source, state) in orch.store().read_all() {
        let age = state
            .last_success_at
            .map(|t| format_age(chrono::Utc::now() - t))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{source:<20} {:?} failures={} updated={age}",
            state.status, state.consecutive_failures
        );
    }

    println!("refresh-demo done");
    Ok(())
}
