// src/sources/mod.rs
//! Source loaders: one per data feed, each owning its URL, validator and
//! fallback strategy.

pub mod types;

use chrono::Utc;
use tokio::sync::watch;

use crate::error::{ErrorKind, LoadError};
use crate::fetch::{RequestOptions, ResilientFetcher, RetryPolicy};
use crate::snapshot::{SnapshotStore, SourceStatus};
pub use types::SourceValue;
use types::{Anomaly, DailySummary, HourlySummary, SymbolSeries};

pub const SUMMARY_KEY: &str = "summary";
pub const ANOMALIES_KEY: &str = "anomalies";
pub const HOURLY_KEY: &str = "hourly";
pub const SYMBOL_KEY_PREFIX: &str = "symbol:";

/// Which feed a loader reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Summary,
    Symbol(String),
    Anomalies,
    Hourly,
}

impl SourceKind {
    /// Snapshot key, e.g. `summary` or `symbol:BTCUSDT`.
    pub fn key(&self) -> String {
        match self {
            SourceKind::Summary => SUMMARY_KEY.to_string(),
            SourceKind::Symbol(sym) => format!("{SYMBOL_KEY_PREFIX}{sym}"),
            SourceKind::Anomalies => ANOMALIES_KEY.to_string(),
            SourceKind::Hourly => HOURLY_KEY.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            SourceKind::Summary => "daily_summary.json".to_string(),
            SourceKind::Symbol(sym) => format!("{sym}.json"),
            SourceKind::Anomalies => "anomalies.json".to_string(),
            SourceKind::Hourly => "hourly_24h_summary.json".to_string(),
        }
    }

    /// Shape validation: parse into the typed contract plus semantic checks.
    pub fn validate(&self, body: serde_json::Value) -> Result<SourceValue, LoadError> {
        let shape = |e: serde_json::Error| LoadError::InvalidShape(e.to_string());
        match self {
            SourceKind::Summary => {
                let s: DailySummary = serde_json::from_value(body).map_err(shape)?;
                if !types::is_iso8601(&s.timestamp) {
                    return Err(LoadError::InvalidShape(format!(
                        "summary timestamp is not ISO-8601: {}",
                        s.timestamp
                    )));
                }
                Ok(SourceValue::Summary(s))
            }
            SourceKind::Symbol(_) => {
                let s: SymbolSeries = serde_json::from_value(body).map_err(shape)?;
                Ok(SourceValue::Series(s))
            }
            SourceKind::Anomalies => {
                let a: Vec<Anomaly> = serde_json::from_value(body).map_err(shape)?;
                Ok(SourceValue::Anomalies(a))
            }
            SourceKind::Hourly => {
                let h: HourlySummary = serde_json::from_value(body).map_err(shape)?;
                if !types::is_iso8601(&h.timestamp) {
                    return Err(LoadError::InvalidShape(format!(
                        "hourly timestamp is not ISO-8601: {}",
                        h.timestamp
                    )));
                }
                Ok(SourceValue::Hourly(h))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackStrategy {
    UseLastGood,
    UseStaticDefault(SourceValue),
    PropagateFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackOrigin {
    LastGood,
    StaticDefault,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fallback {
    pub value: SourceValue,
    pub origin: FallbackOrigin,
}

impl Fallback {
    pub fn last_good(value: SourceValue) -> Self {
        Self {
            value,
            origin: FallbackOrigin::LastGood,
        }
    }

    pub fn static_default(value: SourceValue) -> Self {
        Self {
            value,
            origin: FallbackOrigin::StaticDefault,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceLoadResult {
    Loaded(SourceValue),
    Failed {
        error: ErrorKind,
        detail: String,
        fallback: Option<Fallback>,
    },
}

impl SourceLoadResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, SourceLoadResult::Loaded(_))
    }

    /// Fresh value or fallback value, whichever this load produced.
    pub fn value(&self) -> Option<&SourceValue> {
        match self {
            SourceLoadResult::Loaded(v) => Some(v),
            SourceLoadResult::Failed { fallback, .. } => fallback.as_ref().map(|f| &f.value),
        }
    }
}

/// Summary fetched by the current cycle: `None` while pending,
/// `Some(None)` once settled without a freshly loaded summary.
pub type SummarySlot = Option<Option<DailySummary>>;

/// What a loader may see while it runs.
pub struct LoadContext<'a> {
    pub fetcher: &'a ResilientFetcher,
    /// Previous values. `None` when the cycle resets the store, so nothing
    /// from before the reset can come back as a fallback.
    pub store: Option<&'a SnapshotStore>,
    /// Set when the summary loader runs in the same cycle.
    pub summary: Option<watch::Receiver<SummarySlot>>,
}

impl LoadContext<'_> {
    /// Summary known to be current: the one loaded by this cycle when the
    /// summary runs, else the stored one if it is still fresh.
    async fn current_summary(&self) -> Option<DailySummary> {
        if let Some(rx) = &self.summary {
            let mut rx = rx.clone();
            let slot = rx.wait_for(Option::is_some).await.ok()?;
            return slot.as_ref().and_then(|s| s.clone());
        }
        let state = self.store?.read(SUMMARY_KEY);
        if state.status != SourceStatus::Fresh {
            return None;
        }
        state.value.and_then(|v| v.as_summary().cloned())
    }
}

/// Append a cache-busting query parameter (the data host sends no cache headers).
pub fn cache_busted(url: &str, stamp_ms: i64) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}_t={stamp_ms}")
}

pub fn join_url(base: &str, file: &str) -> String {
    if base.is_empty() {
        return file.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), file)
}

#[derive(Debug, Clone)]
pub struct SourceLoader {
    kind: SourceKind,
    url: String,
    fallback: FallbackStrategy,
    policy: RetryPolicy,
    options: RequestOptions,
}

impl SourceLoader {
    pub fn new(kind: SourceKind, base_url: &str, fallback: FallbackStrategy, policy: RetryPolicy) -> Self {
        let url = join_url(base_url, &kind.file_name());
        Self {
            kind,
            url,
            fallback,
            policy,
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn key(&self) -> String {
        self.kind.key()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn fallback(&self) -> &FallbackStrategy {
        &self.fallback
    }

    /// Load this source. Errors never escape: they come back as `Failed`
    /// together with whatever the fallback strategy provides.
    pub async fn load(&self, ctx: &LoadContext<'_>) -> SourceLoadResult {
        // The one cross-source dependency: the summary may already embed anomalies.
        if self.kind == SourceKind::Anomalies {
            if let Some(embedded) = ctx
                .current_summary()
                .await
                .and_then(|s| s.embedded_anomalies().map(<[Anomaly]>::to_vec))
            {
                tracing::debug!(target: "refresh", count = embedded.len(), "anomalies taken from summary");
                return SourceLoadResult::Loaded(SourceValue::Anomalies(embedded));
            }
        }

        match self.fetch_validated(ctx.fetcher).await {
            Ok(value) => SourceLoadResult::Loaded(value),
            Err(err) => {
                let key = self.key();
                let fallback = self.fallback_value(ctx.store, &key);
                tracing::warn!(
                    target: "refresh",
                    source = %key, error = %err,
                    fallback = fallback.is_some(),
                    "source load failed"
                );
                SourceLoadResult::Failed {
                    error: err.kind(),
                    detail: err.to_string(),
                    fallback,
                }
            }
        }
    }

    async fn fetch_validated(&self, fetcher: &ResilientFetcher) -> Result<SourceValue, LoadError> {
        let url = cache_busted(&self.url, Utc::now().timestamp_millis());
        let body = fetcher.fetch_json(&url, &self.options, &self.policy).await?;
        self.kind.validate(body)
    }

    fn fallback_value(&self, store: Option<&SnapshotStore>, key: &str) -> Option<Fallback> {
        match &self.fallback {
            FallbackStrategy::UseLastGood => store?.value(key).map(Fallback::last_good),
            FallbackStrategy::UseStaticDefault(v) => Some(Fallback::static_default(v.clone())),
            FallbackStrategy::PropagateFailure => None,
        }
    }
}
