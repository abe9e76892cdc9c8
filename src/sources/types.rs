// src/sources/types.rs
//! Typed data contracts for every source, validated at the loader boundary.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Accepts `1.5` as well as `"1.5"` (exchange payloads often quote numbers).
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Num {
        F(f64),
        S(String),
    }
    match Num::deserialize(d)? {
        Num::F(v) => Ok(v),
        Num::S(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// ISO-8601 with or without an offset (the producer writes naive local timestamps).
pub(crate) fn is_iso8601(ts: &str) -> bool {
    let ts = ts.trim();
    DateTime::parse_from_rfc3339(ts).is_ok()
        || NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sentiment {
    Score(f64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSummary {
    #[serde(deserialize_with = "lenient_f64")]
    pub price_change: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub volume_change: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub oi_change: f64,
    pub sentiment: Sentiment,
}

/// `daily_summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub timestamp: String,
    pub symbols: BTreeMap<String, SymbolSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomalies: Option<Vec<Anomaly>>,
}

impl DailySummary {
    /// Embedded anomalies, only when present and non-empty.
    pub fn embedded_anomalies(&self) -> Option<&[Anomaly]> {
        self.anomalies.as_deref().filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub symbol: String,
    pub timestamp: String,
    pub data_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
}

/// Kline/OI timestamps come either as epoch millis or as ISO strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimePoint {
    Millis(i64),
    Iso(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: TimePoint,
    #[serde(deserialize_with = "lenient_f64")]
    pub close: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestPoint {
    pub timestamp: TimePoint,
    #[serde(deserialize_with = "lenient_f64")]
    pub open_interest: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hourly24hSeries {
    #[serde(default)]
    pub klines: Vec<Kline>,
    #[serde(default)]
    pub open_interest: Vec<OpenInterestPoint>,
}

/// `<SYMBOL>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSeries {
    /// timeframe ("1h", "4h", "1d") -> candles
    pub klines: BTreeMap<String, Vec<Kline>>,
    pub open_interest: Vec<OpenInterestPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_24h: Option<Hourly24hSeries>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HourlySymbol {
    #[serde(default)]
    pub price_change_24h: Option<f64>,
    #[serde(default)]
    pub volume_change_24h: Option<f64>,
    #[serde(default)]
    pub oi_change_24h: Option<f64>,
    #[serde(default)]
    pub hourly_price_changes: Vec<f64>,
    #[serde(default)]
    pub hourly_volume_changes: Vec<f64>,
    #[serde(default)]
    pub hourly_oi_changes: Vec<f64>,
}

/// `hourly_24h_summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySummary {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_type: Option<String>,
    pub symbols: BTreeMap<String, HourlySymbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_data: Option<serde_json::Value>,
}

/// Aggregate 24h figures across all symbols of an [`HourlySummary`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HourlyOverview {
    pub avg_price_change: f64,
    pub avg_volume_change: f64,
    pub avg_oi_change: f64,
    pub bullish: usize,
    pub bearish: usize,
}

impl HourlySummary {
    /// Missing per-symbol values count as 0. `None` when there are no symbols.
    pub fn overview(&self) -> Option<HourlyOverview> {
        if self.symbols.is_empty() {
            return None;
        }
        let n = self.symbols.len() as f64;
        let mut out = HourlyOverview::default();
        for s in self.symbols.values() {
            let price = s.price_change_24h.unwrap_or(0.0);
            out.avg_price_change += price;
            out.avg_volume_change += s.volume_change_24h.unwrap_or(0.0);
            out.avg_oi_change += s.oi_change_24h.unwrap_or(0.0);
            if price > 0.0 {
                out.bullish += 1;
            } else if price < 0.0 {
                out.bearish += 1;
            }
        }
        out.avg_price_change /= n;
        out.avg_volume_change /= n;
        out.avg_oi_change /= n;
        Some(out)
    }
}

/// Value held by a snapshot entry, tagged by source family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SourceValue {
    Summary(DailySummary),
    Series(SymbolSeries),
    Anomalies(Vec<Anomaly>),
    Hourly(HourlySummary),
}

impl SourceValue {
    pub fn as_summary(&self) -> Option<&DailySummary> {
        match self {
            SourceValue::Summary(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&SymbolSeries> {
        match self {
            SourceValue::Series(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_anomalies(&self) -> Option<&[Anomaly]> {
        match self {
            SourceValue::Anomalies(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_hourly(&self) -> Option<&HourlySummary> {
        match self {
            SourceValue::Hourly(h) => Some(h),
            _ => None,
        }
    }
}
