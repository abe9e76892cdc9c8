// tests/common/mod.rs
// Scripted in-memory transport and fixture helpers shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use oi_monitor::config::{FallbackSetting, RefreshConfig};
use oi_monitor::fetch::{FetchResponse, RequestOptions};
use oi_monitor::{ChangeNotifier, FetchError, RefreshOrchestrator, RetryPolicy, SnapshotStore, Transport};

pub const BASE: &str = "http://data.test/assets/data";

pub const SUMMARY: &str = include_str!("../fixtures/daily_summary.json");
pub const SUMMARY_WITH_ANOMALIES: &str = include_str!("../fixtures/daily_summary_with_anomalies.json");
pub const BTC: &str = include_str!("../fixtures/BTCUSDT.json");
pub const ANOMALIES: &str = include_str!("../fixtures/anomalies.json");
pub const HOURLY: &str = include_str!("../fixtures/hourly_24h_summary.json");

#[derive(Debug, Clone)]
pub enum Action {
    Body(u16, String),
    Fail(FetchError),
    Hang,
}

/// One scripted reply, optionally delayed.
#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Duration,
    pub action: Action,
}

impl Step {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(code: u16, body: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            action: Action::Body(code, body.to_string()),
        }
    }

    pub fn http(code: u16) -> Self {
        Self::status(code, "")
    }

    pub fn fail(err: FetchError) -> Self {
        Self {
            delay: Duration::ZERO,
            action: Action::Fail(err),
        }
    }

    pub fn hang() -> Self {
        Self {
            delay: Duration::ZERO,
            action: Action::Hang,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Replies per file name; the last step of a script repeats forever.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, file: &str, steps: Vec<Step>) {
        self.routes
            .lock()
            .unwrap()
            .insert(file.to_string(), steps.into_iter().collect());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn calls_to(&self, file: &str) -> usize {
        self.call_times(file).len()
    }

    pub fn call_times(&self, file: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| file_of(u) == file)
            .map(|(_, t)| *t)
            .collect()
    }

    fn next_step(&self, file: &str) -> Option<Step> {
        let mut routes = self.routes.lock().unwrap();
        let script = routes.get_mut(file)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

/// `http://h/a/b.json?_t=1` -> `b.json`
pub fn file_of(url: &str) -> &str {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, url: &str, _options: &RequestOptions) -> Result<FetchResponse, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        let Some(step) = self.next_step(file_of(url)) else {
            return Err(FetchError::Transport(format!("no route for {url}")));
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        match step.action {
            Action::Body(status, body) => Ok(FetchResponse {
                status,
                body: body.into_bytes(),
            }),
            Action::Fail(e) => Err(e),
            Action::Hang => std::future::pending().await,
        }
    }
}

/// Config over the fixture host: one symbol, fast retries.
pub fn test_config() -> RefreshConfig {
    let mut cfg = RefreshConfig::default();
    cfg.base_url = BASE.to_string();
    cfg.symbols = vec!["BTCUSDT".to_string()];
    cfg.retry = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 100,
        timeout_ms: 1_000,
    };
    cfg
}

/// Every source propagates its failures.
pub fn propagate_everything(cfg: &mut RefreshConfig) {
    cfg.fallback.summary = FallbackSetting::propagate();
    cfg.fallback.symbols = FallbackSetting::propagate();
    cfg.fallback.anomalies = FallbackSetting::propagate();
    cfg.fallback.hourly = FallbackSetting::propagate();
}

pub fn orchestrator(cfg: &RefreshConfig, transport: Arc<ScriptedTransport>) -> Arc<RefreshOrchestrator> {
    Arc::new(RefreshOrchestrator::from_config(
        cfg,
        transport,
        Arc::new(SnapshotStore::new()),
        Arc::new(ChangeNotifier::new()),
    ))
}

/// All four feeds answer with their fixtures.
pub fn healthy(transport: &ScriptedTransport) {
    transport.route("daily_summary.json", vec![Step::ok(SUMMARY)]);
    transport.route("BTCUSDT.json", vec![Step::ok(BTC)]);
    transport.route("anomalies.json", vec![Step::ok(ANOMALIES)]);
    transport.route("hourly_24h_summary.json", vec![Step::ok(HOURLY)]);
}
