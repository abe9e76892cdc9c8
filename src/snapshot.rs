// src/snapshot.rs
//! Snapshot store: last-known value per source plus freshness bookkeeping.
//!
//! - One `RwLock` guards the whole map, so `reset()` is observed atomically.
//! - Reads clone out of the lock and never fail (poisoning is recovered).
//! - Entries are created on first write and never removed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::sources::{FallbackOrigin, SourceLoadResult, SourceValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Value came from the most recent successful fetch.
    Fresh,
    /// Value is an older last-good fallback.
    Stale,
    /// Value is a configured placeholder substituted after a failure.
    Synthetic,
    /// No value.
    NeverLoaded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceState {
    pub value: Option<SourceValue>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub status: SourceStatus,
}

impl SourceState {
    pub fn never_loaded() -> Self {
        Self {
            value: None,
            last_success_at: None,
            consecutive_failures: 0,
            status: SourceStatus::NeverLoaded,
        }
    }

    /// Stale, synthetic and never-loaded entries are shown as degraded.
    pub fn is_degraded(&self) -> bool {
        self.status != SourceStatus::Fresh
    }
}

impl Default for SourceState {
    fn default() -> Self {
        Self::never_loaded()
    }
}

pub type Snapshot = BTreeMap<String, SourceState>;

#[derive(Debug, Default)]
pub struct SnapshotStore {
    entries: RwLock<HashMap<String, SourceState>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, HashMap<String, SourceState>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, HashMap<String, SourceState>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one load outcome. The only mutator besides `reset`.
    pub fn write(&self, source: &str, result: &SourceLoadResult) {
        self.write_at(source, result, Utc::now());
    }

    pub(crate) fn write_at(&self, source: &str, result: &SourceLoadResult, now: DateTime<Utc>) {
        let mut map = self.write_guard();
        apply(map.entry(source.to_string()).or_default(), result, now);
    }

    /// Apply a whole cycle under one lock, optionally clearing the store first.
    /// Readers see either the previous snapshot or the committed one.
    pub fn commit(&self, reset: bool, results: &[(String, SourceLoadResult)]) {
        let now = Utc::now();
        let mut map = self.write_guard();
        if reset {
            for state in map.values_mut() {
                *state = SourceState::never_loaded();
            }
        }
        for (source, result) in results {
            apply(map.entry(source.clone()).or_default(), result, now);
        }
    }

    /// A source that was never written reads as never-loaded.
    pub fn read(&self, source: &str) -> SourceState {
        self.read_guard().get(source).cloned().unwrap_or_default()
    }

    pub fn read_all(&self) -> Snapshot {
        self.read_guard()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Current value of a source, whatever its freshness.
    pub fn value(&self, source: &str) -> Option<SourceValue> {
        self.read_guard().get(source).and_then(|s| s.value.clone())
    }

    /// Every entry back to never-loaded, in one critical section.
    pub fn reset(&self) {
        let mut map = self.write_guard();
        for state in map.values_mut() {
            *state = SourceState::never_loaded();
        }
    }

    /// Most recent `last_success_at` across all sources.
    pub fn last_successful_update(&self) -> Option<DateTime<Utc>> {
        self.read_guard()
            .values()
            .filter_map(|s| s.last_success_at)
            .max()
    }

    pub fn degraded_sources(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .read_guard()
            .iter()
            .filter(|(_, s)| s.is_degraded())
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        out
    }
}

fn apply(entry: &mut SourceState, result: &SourceLoadResult, now: DateTime<Utc>) {
    match result {
        SourceLoadResult::Loaded(value) => {
            entry.value = Some(value.clone());
            entry.last_success_at = Some(now);
            entry.consecutive_failures = 0;
            entry.status = SourceStatus::Fresh;
        }
        SourceLoadResult::Failed { fallback, .. } => {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            match fallback {
                Some(fb) => {
                    entry.value = Some(fb.value.clone());
                    entry.status = match fb.origin {
                        FallbackOrigin::LastGood => SourceStatus::Stale,
                        FallbackOrigin::StaticDefault => SourceStatus::Synthetic,
                    };
                }
                // keep whatever we had; it is no longer current
                None if entry.value.is_some() => entry.status = SourceStatus::Stale,
                None => entry.status = SourceStatus::NeverLoaded,
            }
        }
    }
}

/// Human "time since" used by status displays.
pub fn format_age(age: chrono::Duration) -> String {
    let mins = age.num_minutes();
    if mins < 1 {
        return "just now".to_string();
    }
    if mins < 60 {
        return plural(mins, "minute");
    }
    let hours = age.num_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }
    plural(age.num_days(), "day")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}
