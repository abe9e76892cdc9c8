// src/notify/webhook.rs
//! Discord-compatible webhook alert for sources that keep failing.

use anyhow::{anyhow, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::antiflutter::AntiFlutter;
use super::{ChangeNotifier, Subscription};
use crate::orchestrator::RefreshCycle;

#[derive(Debug, Clone, PartialEq)]
pub struct DegradedAlert {
    pub sources: Vec<String>,
    pub message: String,
    pub timestamp_iso: String,
}

impl DegradedAlert {
    pub fn from_cycle(cycle: &RefreshCycle, sources: Vec<String>) -> Self {
        Self {
            sources,
            message: cycle.message(),
            timestamp_iso: cycle.finished_at.to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub struct WebhookAlerter {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookAlerter {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub async fn send_alert(&self, alert: &DegradedAlert) -> Result<()> {
        let payload = WebhookPayload::embed(
            "Dashboard data degraded",
            &format!(
                "**Sources:** {}\n**Status:** {}\n**Time (UTC):** {}",
                alert.sources.join(" · "),
                alert.message,
                alert.timestamp_iso
            ),
        );

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }

    /// Subscribe to `notifier`: cycles with persistent failures post an alert,
    /// at most once per source per cooldown. Sending happens on a spawned task.
    pub fn attach(self, notifier: &ChangeNotifier, cooldown_secs: i64) -> Subscription {
        let gate = Arc::new(Mutex::new(AntiFlutter::new(cooldown_secs)));
        let alerter = Arc::new(self);
        notifier.subscribe(move |cycle| {
            if cycle.persistent_failures.is_empty() {
                return Ok(());
            }
            let admitted = gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .admit(cycle.persistent_failures.iter().map(String::as_str), Utc::now());
            if admitted.is_empty() {
                tracing::debug!(target: "notify", "degraded alert suppressed by cooldown");
                return Ok(());
            }

            let handle = tokio::runtime::Handle::try_current()
                .map_err(|e| anyhow!("no tokio runtime for webhook send: {e}"))?;
            let alert = DegradedAlert::from_cycle(cycle, admitted);
            let alerter = alerter.clone();
            handle.spawn(async move {
                if let Err(e) = alerter.send_alert(&alert).await {
                    tracing::warn!(target: "notify", error = %e, "degraded alert not delivered");
                }
            });
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct WebhookEmbed {
    title: String,
    description: String,
}

#[derive(Serialize)]
struct WebhookPayload {
    content: Option<String>,
    embeds: Vec<WebhookEmbed>,
}

impl WebhookPayload {
    fn embed(title: &str, description: &str) -> Self {
        Self {
            content: None,
            embeds: vec![WebhookEmbed {
                title: title.to_string(),
                description: description.to_string(),
            }],
        }
    }
}
