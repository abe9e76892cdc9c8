// src/config/refresh.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch::RetryPolicy;
use crate::sources::{FallbackStrategy, SourceKind};

pub const ENV_CONFIG_PATH: &str = "OI_MONITOR_CONFIG";
pub const ENV_BASE_URL: &str = "OI_MONITOR_BASE_URL";
pub const ENV_SYMBOLS: &str = "OI_MONITOR_SYMBOLS";
pub const ENV_MAX_ATTEMPTS: &str = "OI_MONITOR_MAX_ATTEMPTS";
pub const ENV_TIMEOUT_MS: &str = "OI_MONITOR_TIMEOUT_MS";
pub const ENV_WEBHOOK_URL: &str = "DEGRADED_WEBHOOK_URL";

pub const DEFAULT_TOML_PATH: &str = "config/refresh.toml";
pub const DEFAULT_JSON_PATH: &str = "config/refresh.json";

fn default_base_url() -> String {
    "http://127.0.0.1:8080/assets/data".to_string()
}
fn default_symbols() -> Vec<String> {
    ["BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "DOGEUSDT"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_light_interval_secs() -> u64 {
    5 * 60
}
fn default_full_interval_secs() -> u64 {
    30 * 60
}
fn default_failure_warning_threshold() -> u32 {
    3
}
fn default_alert_cooldown_secs() -> i64 {
    3_600
}
fn default_startup_retry_delay_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    #[default]
    LastGood,
    StaticDefault,
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FallbackSetting {
    #[serde(default)]
    pub strategy: FallbackKind,
    /// Placeholder for `static_default`; must pass the source's validator.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl FallbackSetting {
    pub fn last_good() -> Self {
        Self::default()
    }

    pub fn propagate() -> Self {
        Self {
            strategy: FallbackKind::Propagate,
            value: None,
        }
    }

    pub fn static_default(value: serde_json::Value) -> Self {
        Self {
            strategy: FallbackKind::StaticDefault,
            value: Some(value),
        }
    }

    pub fn resolve(&self, kind: &SourceKind) -> Result<FallbackStrategy> {
        match self.strategy {
            FallbackKind::LastGood => Ok(FallbackStrategy::UseLastGood),
            FallbackKind::Propagate => Ok(FallbackStrategy::PropagateFailure),
            FallbackKind::StaticDefault => {
                let raw = self
                    .value
                    .clone()
                    .ok_or_else(|| anyhow!("static_default for {} needs a value", kind.key()))?;
                let value = kind
                    .validate(raw)
                    .with_context(|| format!("static_default for {}", kind.key()))?;
                Ok(FallbackStrategy::UseStaticDefault(value))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallbackTable {
    #[serde(default)]
    pub summary: FallbackSetting,
    /// Shared by every `symbol:<SYMBOL>` source.
    #[serde(default)]
    pub symbols: FallbackSetting,
    #[serde(default = "default_anomalies_fallback")]
    pub anomalies: FallbackSetting,
    #[serde(default)]
    pub hourly: FallbackSetting,
}

fn default_anomalies_fallback() -> FallbackSetting {
    FallbackSetting::static_default(serde_json::json!([]))
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self {
            summary: FallbackSetting::last_good(),
            symbols: FallbackSetting::last_good(),
            anomalies: default_anomalies_fallback(),
            hourly: FallbackSetting::last_good(),
        }
    }
}

impl FallbackTable {
    pub fn setting(&self, kind: &SourceKind) -> &FallbackSetting {
        match kind {
            SourceKind::Summary => &self.summary,
            SourceKind::Symbol(_) => &self.symbols,
            SourceKind::Anomalies => &self.anomalies,
            SourceKind::Hourly => &self.hourly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_light_interval_secs")]
    pub light_interval_secs: u64,
    #[serde(default = "default_full_interval_secs")]
    pub full_interval_secs: u64,
    #[serde(default = "default_failure_warning_threshold")]
    pub failure_warning_threshold: u32,
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: i64,
    #[serde(default = "default_startup_retry_delay_secs")]
    pub startup_retry_delay_secs: u64,
    /// 0 = retry the startup load until it succeeds.
    #[serde(default)]
    pub startup_max_attempts: u32,
    #[serde(default)]
    pub degraded_webhook_url: Option<String>,
    #[serde(default)]
    pub fallback: FallbackTable,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            symbols: default_symbols(),
            retry: RetryPolicy::default(),
            light_interval_secs: default_light_interval_secs(),
            full_interval_secs: default_full_interval_secs(),
            failure_warning_threshold: default_failure_warning_threshold(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            startup_retry_delay_secs: default_startup_retry_delay_secs(),
            startup_max_attempts: 0,
            degraded_webhook_url: None,
            fallback: FallbackTable::default(),
        }
    }
}

impl RefreshConfig {
    /// Load from an explicit path (TOML or JSON), then env overrides, then validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading refresh config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, &ext)?;
        cfg.apply_env_overrides();
        cfg.validate()
    }

    /// Load using env var + fallbacks:
    /// 1) $OI_MONITOR_CONFIG
    /// 2) config/refresh.toml
    /// 3) config/refresh.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from(&pb);
        }
        for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.validate()
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|k| std::env::var(k).ok());
    }

    /// Apply overrides from any key lookup. Unparsable numbers are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = v.trim().to_string();
        }
        if let Some(v) = lookup(ENV_SYMBOLS) {
            self.symbols = v.split(',').map(str::to_string).collect();
        }
        if let Some(n) = lookup(ENV_MAX_ATTEMPTS).and_then(|v| v.trim().parse().ok()) {
            self.retry.max_attempts = n;
        }
        if let Some(n) = lookup(ENV_TIMEOUT_MS).and_then(|v| v.trim().parse().ok()) {
            self.retry.timeout_ms = n;
        }
        if let Some(v) = lookup(ENV_WEBHOOK_URL).filter(|v| !v.trim().is_empty()) {
            self.degraded_webhook_url = Some(v.trim().to_string());
        }
    }

    /// Normalize symbols and reject settings the refresh loop cannot run with.
    pub fn validate(mut self) -> Result<Self> {
        self.symbols = clean_symbols(std::mem::take(&mut self.symbols));
        if self.symbols.is_empty() {
            bail!("refresh config lists no symbols");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.timeout_ms == 0 {
            bail!("retry.timeout_ms must be positive: one hung source would stall the cycle");
        }
        if self.light_interval_secs == 0 || self.full_interval_secs == 0 {
            bail!("refresh intervals must be positive");
        }
        if self.base_url.trim().is_empty() {
            bail!("base_url is empty");
        }
        self.fallback.summary.resolve(&SourceKind::Summary)?;
        self.fallback
            .symbols
            .resolve(&SourceKind::Symbol(self.symbols[0].clone()))?;
        self.fallback.anomalies.resolve(&SourceKind::Anomalies)?;
        self.fallback.hourly.resolve(&SourceKind::Hourly)?;
        Ok(self)
    }

    /// Strategy for one source. Invalid settings degrade to last-good.
    pub fn fallback_for(&self, kind: &SourceKind) -> FallbackStrategy {
        self.fallback.setting(kind).resolve(kind).unwrap_or_else(|e| {
            tracing::warn!(source = %kind.key(), error = %e, "invalid fallback setting, using last_good");
            FallbackStrategy::UseLastGood
        })
    }

    pub fn light_interval(&self) -> Duration {
        Duration::from_secs(self.light_interval_secs)
    }

    pub fn full_interval(&self) -> Duration {
        Duration::from_secs(self.full_interval_secs)
    }

    pub fn startup_retry_delay(&self) -> Duration {
        Duration::from_secs(self.startup_retry_delay_secs)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<RefreshConfig> {
    match hint_ext {
        "toml" => return toml::from_str(s).context("parsing refresh config as TOML"),
        "json" => return serde_json::from_str(s).context("parsing refresh config as JSON"),
        _ => {}
    }
    if let Ok(cfg) = toml::from_str::<RefreshConfig>(s) {
        return Ok(cfg);
    }
    serde_json::from_str(s).map_err(|_| anyhow!("unsupported refresh config format"))
}

fn clean_symbols(items: Vec<String>) -> Vec<String> {
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_ascii_uppercase());
        }
    }
    set.into_iter().collect()
}
