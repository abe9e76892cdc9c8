// src/orchestrator/mod.rs
//! Refresh orchestrator: runs every source loader of a plan concurrently,
//! commits the outcomes to the snapshot store and notifies subscribers.
//!
//! State machine is `Idle -> Refreshing -> Idle`. A second call while a cycle
//! is in flight is rejected with `RefreshError::AlreadyRefreshing`.

pub mod scheduler;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;

use crate::config::RefreshConfig;
use crate::error::{ErrorKind, RefreshError, SourceFailure};
use crate::fetch::{ResilientFetcher, Transport};
use crate::notify::ChangeNotifier;
use crate::snapshot::SnapshotStore;
use crate::sources::{LoadContext, SourceKind, SourceLoadResult, SourceLoader, SummarySlot, SUMMARY_KEY};
use scheduler::ScheduleHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Coarse connectivity indicator for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    FullSuccess,
    PartialSuccess,
    TotalFailure,
}

impl CycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::FullSuccess => "full_success",
            CycleStatus::PartialSuccess => "partial_success",
            CycleStatus::TotalFailure => "total_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// A fallback value was served instead of fresh data.
    pub fallback: bool,
}

impl SourceOutcome {
    fn from_result(result: &SourceLoadResult) -> Self {
        match result {
            SourceLoadResult::Loaded(_) => Self {
                ok: true,
                error: None,
                detail: None,
                fallback: false,
            },
            SourceLoadResult::Failed {
                error,
                detail,
                fallback,
            } => Self {
                ok: false,
                error: Some(*error),
                detail: Some(detail.clone()),
                fallback: fallback.is_some(),
            },
        }
    }

    /// Failed with nothing to show.
    pub fn is_hard_failure(&self) -> bool {
        !self.ok && !self.fallback
    }
}

/// One orchestration pass. Ephemeral; kept only as "last cycle" for status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshCycle {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: BTreeMap<String, SourceOutcome>,
    /// Sources whose consecutive failures reached the warning threshold.
    pub persistent_failures: Vec<String>,
}

impl RefreshCycle {
    /// Fallback values are not fresh data: a cycle with nothing loaded is a
    /// total failure even when every source had something to fall back on.
    pub fn status(&self) -> CycleStatus {
        if self.ok_count() == 0 {
            CycleStatus::TotalFailure
        } else if self.outcomes.values().all(|o| o.ok) {
            CycleStatus::FullSuccess
        } else {
            CycleStatus::PartialSuccess
        }
    }

    pub fn ok_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.ok).count()
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.ok)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn failures(&self) -> Vec<SourceFailure> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.ok)
            .map(|(k, o)| SourceFailure {
                source: k.clone(),
                kind: o.error.unwrap_or(ErrorKind::Transport),
                detail: o.detail.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Short line for a "partial data" indicator.
    pub fn message(&self) -> String {
        let total = self.outcomes.len();
        match self.status() {
            CycleStatus::FullSuccess => format!("loaded {total}/{total} sources"),
            CycleStatus::PartialSuccess => format!(
                "loaded {}/{} sources; degraded: {}",
                self.ok_count(),
                total,
                self.failed_sources().join(", ")
            ),
            CycleStatus::TotalFailure => "no source could be loaded".to_string(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Which sources a cycle touches and whether the store is reset first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    pub reset_first: bool,
    /// `None` means every registered source.
    pub only: Option<BTreeSet<String>>,
}

impl RefreshPlan {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn full_reset() -> Self {
        Self {
            reset_first: true,
            only: None,
        }
    }

    /// Live-price refresh: the summary source only.
    pub fn light() -> Self {
        Self::only([SUMMARY_KEY])
    }

    pub fn only<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reset_first: false,
            only: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    fn includes(&self, key: &str) -> bool {
        self.only.as_ref().map_or(true, |set| set.contains(key))
    }
}

/// Puts the orchestrator back to `Idle` however the cycle ends.
struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
    state: &'a watch::Sender<RefreshState>,
}

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool, state: &'a watch::Sender<RefreshState>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        state.send_replace(RefreshState::Refreshing);
        Some(Self { flag, state })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.state.send_replace(RefreshState::Idle);
    }
}

pub struct RefreshOrchestrator {
    fetcher: ResilientFetcher,
    loaders: Vec<SourceLoader>,
    store: Arc<SnapshotStore>,
    notifier: Arc<ChangeNotifier>,
    refreshing: AtomicBool,
    state_tx: watch::Sender<RefreshState>,
    cycles_started: AtomicU64,
    skipped_ticks: AtomicU64,
    connection: RwLock<ConnectionStatus>,
    last_cycle: RwLock<Option<RefreshCycle>>,
    failure_warning_threshold: u32,
    schedules: Mutex<Vec<ScheduleHandle>>,
}

impl RefreshOrchestrator {
    pub fn new(
        fetcher: ResilientFetcher,
        store: Arc<SnapshotStore>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RefreshState::Idle);
        Self {
            fetcher,
            loaders: Vec::new(),
            store,
            notifier,
            refreshing: AtomicBool::new(false),
            state_tx,
            cycles_started: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            connection: RwLock::new(ConnectionStatus::Disconnected),
            last_cycle: RwLock::new(None),
            failure_warning_threshold: 3,
            schedules: Mutex::new(Vec::new()),
        }
    }

    /// Wire every configured source: summary, one per symbol, anomalies, hourly.
    pub fn from_config(
        cfg: &RefreshConfig,
        transport: Arc<dyn Transport>,
        store: Arc<SnapshotStore>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        let mut orch = Self::new(ResilientFetcher::new(transport), store, notifier)
            .with_failure_warning_threshold(cfg.failure_warning_threshold);

        let mut kinds = vec![SourceKind::Summary];
        kinds.extend(cfg.symbols.iter().cloned().map(SourceKind::Symbol));
        kinds.push(SourceKind::Anomalies);
        kinds.push(SourceKind::Hourly);

        for kind in kinds {
            let fallback = cfg.fallback_for(&kind);
            orch = orch.with_loader(SourceLoader::new(kind, &cfg.base_url, fallback, cfg.retry));
        }
        orch
    }

    /// Loaders start in registration order.
    pub fn with_loader(mut self, loader: SourceLoader) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_failure_warning_threshold(mut self, threshold: u32) -> Self {
        self.failure_warning_threshold = threshold.max(1);
        self
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn source_keys(&self) -> Vec<String> {
        self.loaders.iter().map(SourceLoader::key).collect()
    }

    pub fn state(&self) -> RefreshState {
        *self.state_tx.borrow()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Observe `Idle`/`Refreshing` transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RefreshState> {
        self.state_tx.subscribe()
    }

    /// Number of cycles that entered `Refreshing`.
    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::Relaxed)
    }

    /// Number of periodic ticks skipped because a cycle was in flight.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.connection.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_cycle(&self) -> Option<RefreshCycle> {
        self.last_cycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every source, no reset.
    pub async fn refresh_all(&self) -> Result<RefreshCycle, RefreshError> {
        self.refresh(&RefreshPlan::all()).await
    }

    /// Reload every source and replace the whole snapshot with the result.
    pub async fn force_refresh(&self) -> Result<RefreshCycle, RefreshError> {
        self.refresh(&RefreshPlan::full_reset()).await
    }

    /// Live-price source only.
    pub async fn refresh_light(&self) -> Result<RefreshCycle, RefreshError> {
        self.refresh(&RefreshPlan::light()).await
    }

    pub async fn refresh(&self, plan: &RefreshPlan) -> Result<RefreshCycle, RefreshError> {
        crate::metrics::ensure_metrics_described();
        let Some(guard) = RefreshGuard::acquire(&self.refreshing, &self.state_tx) else {
            tracing::debug!(target: "refresh", "refresh rejected: cycle already in flight");
            return Err(RefreshError::AlreadyRefreshing);
        };
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: "refresh", reset = plan.reset_first, "refresh cycle started");

        if matches!(
            self.connection_status(),
            ConnectionStatus::Disconnected | ConnectionStatus::Error
        ) {
            self.set_connection(ConnectionStatus::Connecting);
        }

        let started_at = Utc::now();
        let results = self.run_loaders(plan).await;
        let finished_at = Utc::now();

        let mut cycle = RefreshCycle {
            started_at,
            finished_at,
            outcomes: results
                .iter()
                .map(|(k, r)| (k.clone(), SourceOutcome::from_result(r)))
                .collect(),
            persistent_failures: Vec::new(),
        };
        let status = cycle.status();
        let elapsed_ms = cycle.duration().num_milliseconds().max(0) as f64;
        histogram!("refresh_cycle_duration_ms").record(elapsed_ms);
        counter!("refresh_cycles_total", "status" => status.as_str()).increment(1);

        if status == CycleStatus::TotalFailure {
            // nothing is written, not even the reset: the store keeps what it had
            let failures = cycle.failures();
            tracing::warn!(target: "refresh", failed = failures.len(), "refresh cycle failed for every source");
            self.set_connection(ConnectionStatus::Error);
            self.set_last_cycle(cycle);
            drop(guard);
            return Err(RefreshError::TotalFailure { failures });
        }

        self.store.commit(plan.reset_first, &results);
        for (key, result) in &results {
            if let SourceLoadResult::Failed { fallback: Some(_), .. } = result {
                counter!("source_fallback_total", "source" => key.clone()).increment(1);
            }
        }
        cycle.persistent_failures = self.persistent_failures(&cycle);
        for source in &cycle.persistent_failures {
            tracing::warn!(
                target: "refresh",
                %source,
                threshold = self.failure_warning_threshold,
                "many consecutive errors, check connection"
            );
        }

        gauge!("snapshot_last_refresh_ts").set(finished_at.timestamp() as f64);
        self.set_connection(ConnectionStatus::Connected);
        self.set_last_cycle(cycle.clone());
        drop(guard);

        let fallback = cycle.outcomes.values().filter(|o| o.fallback).count();
        tracing::info!(
            target: "refresh",
            status = status.as_str(),
            ok = cycle.ok_count(),
            fallback,
            failed = cycle.outcomes.len() - cycle.ok_count() - fallback,
            "refresh cycle finished"
        );
        self.notifier.notify(&cycle);
        Ok(cycle)
    }

    /// Full refresh at startup, retried after `delay` while nothing loads.
    /// `max_attempts == 0` retries until success.
    pub async fn initial_load(
        &self,
        delay: Duration,
        max_attempts: u32,
    ) -> Result<RefreshCycle, RefreshError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.force_refresh().await {
                Ok(cycle) => return Ok(cycle),
                Err(e) => e,
            };
            if max_attempts != 0 && attempt >= max_attempts {
                return Err(err);
            }
            tracing::warn!(target: "refresh", attempt, error = %err, "initial load failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_loaders(&self, plan: &RefreshPlan) -> Vec<(String, SourceLoadResult)> {
        let selected: Vec<&SourceLoader> = self
            .loaders
            .iter()
            .filter(|l| plan.includes(&l.key()))
            .collect();

        let runs_summary = selected.iter().any(|l| *l.kind() == SourceKind::Summary);
        let (summary_tx, summary_rx) = watch::channel::<SummarySlot>(None);
        let ctx = LoadContext {
            fetcher: &self.fetcher,
            // a resetting cycle must not resurrect pre-reset values
            store: (!plan.reset_first).then_some(self.store.as_ref()),
            summary: runs_summary.then_some(summary_rx),
        };

        let ctx = &ctx;
        let summary_tx = &summary_tx;
        let runs = selected.into_iter().map(|loader| async move {
            let result = loader.load(ctx).await;
            if *loader.kind() == SourceKind::Summary {
                let summary = match &result {
                    SourceLoadResult::Loaded(v) => v.as_summary().cloned(),
                    SourceLoadResult::Failed { .. } => None,
                };
                summary_tx.send_replace(Some(summary));
            }
            (loader.key(), result)
        });
        join_all(runs).await
    }

    fn persistent_failures(&self, cycle: &RefreshCycle) -> Vec<String> {
        cycle
            .failed_sources()
            .into_iter()
            .filter(|k| self.store.read(k).consecutive_failures >= self.failure_warning_threshold)
            .map(str::to_string)
            .collect()
    }

    fn set_connection(&self, status: ConnectionStatus) {
        *self.connection.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn set_last_cycle(&self, cycle: RefreshCycle) {
        *self.last_cycle.write().unwrap_or_else(PoisonError::into_inner) = Some(cycle);
    }
}

impl Drop for RefreshOrchestrator {
    fn drop(&mut self) {
        self.cancel_periodic();
    }
}
