//! # Healthcheck Pinger - Outward HTTP Liveness
//!
//! Periodically GETs a configured endpoint (a dead-man's-switch service) so
//! an external system notices when this host disappears. A 2xx answer is a
//! success; any other status or transport error is a failure. The first
//! failure after a success opens a downtime event, the first success after a
//! failure closes it with its duration and optionally tells the operator.
//!
//! The counters and the bounded downtime ledger (at most 50 events, oldest
//! dropped) are part of the durable state; every 10th ping persists them so
//! statistics survive restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::context::AppContext;
use crate::events::EventLevel;
use crate::format::format_duration;
use crate::logging::{log_info, log_warn, LogCategory};

/// Downtime events retained
pub const MAX_DOWNTIME_EVENTS: usize = 50;

/// Deadline for one ping request
const PING_DEADLINE: Duration = Duration::from_secs(10);

/// Pings between persistence points
const PERSIST_EVERY: u64 = 10;

/// One contiguous interval of failed pings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowntimeEvent {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    pub reason: String,
}

/// Healthcheck counters and downtime ledger; durable across restarts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthcheckState {
    pub total_pings: u64,
    pub successful_pings: u64,
    pub failed_pings: u64,
    pub last_ping_time: Option<DateTime<Utc>>,
    pub last_ping_success: bool,
    pub last_failure: Option<DateTime<Utc>>,
    pub downtime_events: Vec<DowntimeEvent>,
}

impl HealthcheckState {
    fn open_event_mut(&mut self) -> Option<&mut DowntimeEvent> {
        self.downtime_events
            .last_mut()
            .filter(|event| event.end.is_none())
    }

    /// Record a successful ping; returns the closed downtime duration when
    /// this success ends an outage
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.total_pings += 1;
        self.successful_pings += 1;
        self.last_ping_time = Some(now);
        self.last_ping_success = true;

        let closed = self.open_event_mut().map(|event| {
            event.end = Some(now);
            let duration = (now - event.start).to_std().unwrap_or_default();
            event.duration_secs = Some(duration.as_secs());
            duration
        });
        closed
    }

    /// Record a failed ping; returns true when this failure opened a new
    /// downtime event
    pub fn record_failure(&mut self, now: DateTime<Utc>, reason: &str) -> bool {
        self.total_pings += 1;
        self.failed_pings += 1;
        self.last_ping_time = Some(now);
        self.last_ping_success = false;
        self.last_failure = Some(now);

        if self.open_event_mut().is_some() {
            return false;
        }
        self.downtime_events.push(DowntimeEvent {
            start: now,
            end: None,
            duration_secs: None,
            reason: reason.to_string(),
        });
        if self.downtime_events.len() > MAX_DOWNTIME_EVENTS {
            let drop = self.downtime_events.len() - MAX_DOWNTIME_EVENTS;
            self.downtime_events.drain(0..drop);
        }
        true
    }

    /// Share of successful pings, 100 when none were sent yet
    pub fn uptime_percent(&self) -> f64 {
        if self.total_pings == 0 {
            return 100.0;
        }
        self.successful_pings as f64 / self.total_pings as f64 * 100.0
    }
}

/// Outcome of one HTTP probe
enum PingOutcome {
    Success,
    Failure(String),
}

async fn ping_once(client: &reqwest::Client, url: &str) -> PingOutcome {
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => PingOutcome::Success,
        Ok(response) => PingOutcome::Failure(format!("status {}", response.status())),
        Err(e) => PingOutcome::Failure(format!("transport: {e}")),
    }
}

/// Healthcheck worker
pub async fn run(ctx: Arc<AppContext>) {
    let (enabled, url, period) = {
        let config = ctx.config.read();
        let hc = &config.healthchecks;
        (
            hc.enabled && !hc.ping_url.is_empty(),
            hc.ping_url.clone(),
            Duration::from_secs(hc.period_seconds.max(10)),
        )
    };
    if !enabled {
        return;
    }

    let client = match reqwest::Client::builder().timeout(PING_DEADLINE).build() {
        Ok(client) => client,
        Err(e) => {
            log_warn(LogCategory::Healthcheck, &format!("http client unavailable: {e}"));
            return;
        }
    };

    let mut ticker = tokio::time::interval(period);
    log_info(LogCategory::Healthcheck, "healthcheck pinger started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancel.cancelled() => return,
        }

        let outcome = ping_once(&client, &url).await;
        let now = Utc::now();

        let (closed, opened, total) = {
            let mut health = ctx.health.lock();
            match &outcome {
                PingOutcome::Success => {
                    let closed = health.record_success(now);
                    (closed, false, health.total_pings)
                }
                PingOutcome::Failure(reason) => {
                    let opened = health.record_failure(now, reason);
                    (None, opened, health.total_pings)
                }
            }
        };

        if opened {
            if let PingOutcome::Failure(reason) = &outcome {
                let message = format!("Healthcheck ping failing: {reason}");
                ctx.events.append(EventLevel::Warning, message.clone());
                log_warn(LogCategory::Healthcheck, &message);
            }
        }
        if let Some(duration) = closed {
            let message = format!("Healthcheck recovered after {}", format_duration(duration));
            ctx.events.append(EventLevel::Info, message.clone());
            ctx.notify_user(&message).await;
        }

        if total % PERSIST_EVERY == 0 {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.save_durable();
            });
        }
        ctx.mark_tick("healthcheck");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_opens_one_event_success_closes_it() {
        let mut state = HealthcheckState::default();
        let t0 = Utc::now();

        assert!(state.record_failure(t0, "status 500"));
        // further failures extend the same event
        assert!(!state.record_failure(t0 + chrono::Duration::seconds(60), "status 500"));
        assert_eq!(state.downtime_events.len(), 1);

        let closed = state.record_success(t0 + chrono::Duration::seconds(120));
        assert_eq!(closed, Some(Duration::from_secs(120)));
        let event = state.downtime_events.last().unwrap();
        assert_eq!(event.duration_secs, Some(120));
        assert!(event.end.is_some());

        // a success with no open event closes nothing
        assert_eq!(state.record_success(t0 + chrono::Duration::seconds(180)), None);
    }

    #[test]
    fn downtime_ledger_is_bounded() {
        let mut state = HealthcheckState::default();
        let t0 = Utc::now();
        for i in 0..(MAX_DOWNTIME_EVENTS + 5) {
            let at = t0 + chrono::Duration::seconds(i as i64 * 10);
            state.record_failure(at, "x");
            state.record_success(at + chrono::Duration::seconds(5));
        }
        assert_eq!(state.downtime_events.len(), MAX_DOWNTIME_EVENTS);
    }

    #[test]
    fn uptime_percent_tracks_counters() {
        let mut state = HealthcheckState::default();
        assert_eq!(state.uptime_percent(), 100.0);

        let t0 = Utc::now();
        state.record_success(t0);
        state.record_success(t0);
        state.record_success(t0);
        state.record_failure(t0, "x");
        assert_eq!(state.uptime_percent(), 75.0);
    }
}
