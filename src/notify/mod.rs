// src/notify/mod.rs
//! Change notifier: synchronous fan-out of completed refresh cycles.
//!
//! Subscribers run in subscription order on the refreshing task. A subscriber
//! that errors or panics is logged and skipped; the rest still run.

pub mod antiflutter;
pub mod webhook;

use metrics::counter;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::orchestrator::RefreshCycle;

type Callback = Arc<dyn Fn(&RefreshCycle) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

#[derive(Default, Clone)]
pub struct ChangeNotifier {
    inner: Arc<Registry>,
}

/// Handle returned by [`ChangeNotifier::subscribe`]. Dropping it keeps the
/// subscription alive; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(reg) = self.registry.upgrade() {
            reg.subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RefreshCycle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `cycle` to every subscriber. Returns how many succeeded.
    pub fn notify(&self, cycle: &RefreshCycle) -> usize {
        // Copy out so callbacks may (un)subscribe without deadlocking.
        let subscribers: Vec<(u64, Callback)> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for (id, cb) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| cb(cycle))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    counter!("notify_subscriber_errors_total").increment(1);
                    tracing::warn!(target: "notify", subscriber = id, error = %e, "subscriber failed");
                }
                Err(_) => {
                    counter!("notify_subscriber_errors_total").increment(1);
                    tracing::warn!(target: "notify", subscriber = id, "subscriber panicked");
                }
            }
        }
        delivered
    }
}
