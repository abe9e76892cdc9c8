// src/orchestrator/scheduler.rs
//! Periodic refresh schedules.
//!
//! Each schedule is a tokio task holding a `Weak` handle to the orchestrator.
//! Ticks that land while a cycle is still in flight are skipped, never queued.
//! Cycles run on their own task, so cancelling stops future ticks only and a
//! cycle already running completes. `shutdown` waits for it.

use metrics::counter;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{RefreshOrchestrator, RefreshPlan};
use crate::error::RefreshError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub name: &'static str,
    pub interval: Duration,
    pub plan: RefreshPlan,
}

impl Schedule {
    /// Minutes-scale live-price refresh (summary only).
    pub fn light(interval: Duration) -> Self {
        Self {
            name: "light",
            interval,
            plan: RefreshPlan::light(),
        }
    }

    /// Tens-of-minutes full reload; resets first so stale fallbacks expire.
    pub fn full(interval: Duration) -> Self {
        Self {
            name: "full",
            interval,
            plan: RefreshPlan::full_reset(),
        }
    }

    /// Every source, no reset.
    pub fn every(interval: Duration) -> Self {
        Self {
            name: "all",
            interval,
            plan: RefreshPlan::all(),
        }
    }
}

pub(crate) struct ScheduleHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshOrchestrator {
    /// Install a recurring refresh. The first tick fires one interval from now.
    pub fn schedule_periodic(self: &Arc<Self>, schedule: Schedule) {
        let period = schedule.interval.max(Duration::from_millis(1));
        let (cancel, mut cancel_rx) = watch::channel(false);
        let weak: Weak<Self> = Arc::downgrade(self);

        tracing::info!(
            target: "refresh",
            schedule = schedule.name,
            interval_ms = period.as_millis() as u64,
            "periodic refresh installed"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the ticker keeps running while a cycle is in flight
            let mut in_flight: Option<JoinHandle<()>> = None;
            loop {
                tokio::select! {
                    biased;
                    // fires on cancel and when the sender is dropped
                    _ = cancel_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(orch) = weak.upgrade() else { break };
                if orch.is_refreshing() {
                    orch.note_skipped(&schedule);
                    continue;
                }
                let tick = schedule.clone();
                in_flight = Some(tokio::spawn(async move { orch.run_tick(&tick).await }));
            }
            if let Some(cycle) = in_flight {
                let _ = cycle.await;
            }
            tracing::debug!(target: "refresh", schedule = schedule.name, "periodic refresh stopped");
        });

        self.schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScheduleHandle { cancel, task });
    }

    /// Stop every schedule. Idempotent; in-flight cycles are not aborted.
    pub fn cancel_periodic(&self) {
        let handles: Vec<ScheduleHandle> = self
            .schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for h in handles {
            let _ = h.cancel.send(true);
        }
    }

    /// Cancel schedules and wait for their tasks, including any cycle they started.
    pub async fn shutdown(&self) {
        let handles: Vec<ScheduleHandle> = self
            .schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for h in &handles {
            let _ = h.cancel.send(true);
        }
        for h in handles {
            let _ = h.task.await;
        }
    }

    pub fn scheduled_count(&self) -> usize {
        self.schedules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn run_tick(&self, schedule: &Schedule) {
        match self.refresh(&schedule.plan).await {
            Ok(cycle) => {
                tracing::debug!(target: "refresh", schedule = schedule.name, status = cycle.status().as_str(), "periodic refresh done");
            }
            Err(RefreshError::AlreadyRefreshing) => self.note_skipped(schedule),
            Err(e) => {
                tracing::warn!(target: "refresh", schedule = schedule.name, error = %e, "periodic refresh failed");
            }
        }
    }

    fn note_skipped(&self, schedule: &Schedule) {
        self.skipped_ticks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        counter!("refresh_skipped_total").increment(1);
        tracing::debug!(target: "refresh", schedule = schedule.name, "tick skipped: refresh in flight");
    }
}
