// src/notify/antiflutter.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

/// Per-source cooldown gate to prevent degraded-data alert spam.
/// - First alert for a source always allowed.
/// - Inside that source's cooldown, alerts are suppressed.
/// - State is updated explicitly via `record_alert` after a send is queued.
#[derive(Debug, Clone, Default)]
pub struct AntiFlutter {
    cooldown: ChronoDuration,
    last_alert: HashMap<String, DateTime<Utc>>,
}

impl AntiFlutter {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last_alert: HashMap::new(),
        }
    }

    /// Check if we may alert at `now` for `source`. Does NOT mutate state.
    pub fn should_alert(&self, source: &str, now: DateTime<Utc>) -> bool {
        match self.last_alert.get(source) {
            None => true,
            Some(ts) => now.signed_duration_since(*ts) >= self.cooldown,
        }
    }

    pub fn record_alert(&mut self, source: &str, now: DateTime<Utc>) {
        self.last_alert.insert(source.to_string(), now);
    }

    /// Keep the sources that may alert now and record them in one step.
    pub fn admit<'a, I>(&mut self, sources: I, now: DateTime<Utc>) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Vec::new();
        for s in sources {
            if self.should_alert(s, now) {
                self.record_alert(s, now);
                out.push(s.to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn first_alert_passes() {
        let af = AntiFlutter::new(3_600);
        let now = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        assert!(af.should_alert("hourly", now));
    }

    #[test]
    fn inside_cooldown_blocked_per_source() {
        let mut af = AntiFlutter::new(3_600);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        af.record_alert("hourly", t0);
        let t1 = t0 + ChronoDuration::seconds(120);
        assert!(!af.should_alert("hourly", t1));
        assert!(af.should_alert("summary", t1));
    }

    #[test]
    fn admit_records_and_filters() {
        let mut af = AntiFlutter::new(3_600);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        assert_eq!(af.admit(["hourly", "anomalies"], t0), vec!["hourly", "anomalies"]);
        let t1 = t0 + ChronoDuration::seconds(60);
        assert!(af.admit(["hourly"], t1).is_empty());
        let t2 = t0 + ChronoDuration::seconds(3_600 + 5);
        assert_eq!(af.admit(["hourly"], t2), vec!["hourly"]);
    }
}
