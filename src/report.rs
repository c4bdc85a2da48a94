//! # Reports - Scheduling, Rendering, Best-Effort Summarising
//!
//! The scheduler evaluates absolute wall-clock targets in the configured
//! timezone on every tick instead of precomputing long sleeps, so DST and
//! NTP jumps cannot strand a slot. A slot fires when `now` falls inside
//! `[slot, slot + grace]` and the durable `last_sent` does not already cover
//! it; after sending, `last_sent` is persisted before the next loop
//! iteration, which makes a double fire across restarts impossible.
//!
//! The renderer is deterministic and complete on its own: snapshot overview,
//! stress summary, the event window, container counts, healthcheck state and
//! disk forecasts. When an external summariser is wired it may replace the
//! plain header, under a hard per-attempt deadline and an overall budget;
//! any failure silently falls back to the deterministic text.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ReportSettings, REPORT_MODE_MORNING, REPORT_MODE_OFF, REPORT_MODE_TWICE};
use crate::context::AppContext;
use crate::events::EventLevel;
use crate::format::{format_bytes, format_duration, format_percent};
use crate::logging::{log_info, log_warn, LogCategory};
use crate::{Result, SentinelError};

/// Tolerance for firing a slot that was missed while the process was down
pub fn grace_window() -> ChronoDuration {
    ChronoDuration::minutes(5)
}

/// Cadence of the scheduler loop
const SCHEDULER_TICK: Duration = Duration::from_secs(30);

/// Per-attempt summariser deadline
const SUMMARIZER_ATTEMPT_DEADLINE: Duration = Duration::from_secs(25);

/// Overall summariser budget across the fallback list
const SUMMARIZER_TOTAL_BUDGET: Duration = Duration::from_secs(60);

/// Event age pruned from the ledger after each report
fn event_retention() -> ChronoDuration {
    ChronoDuration::hours(24)
}

/// The two scheduled slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSlot {
    Morning,
    Evening,
}

/// Mutable report bookkeeping on the context
#[derive(Debug, Clone, Default)]
pub struct ReportState {
    /// Instant of the last emitted report (scheduled or manual); monotonic
    pub last_sent: Option<DateTime<Utc>>,
}

/// External summariser seam; callers provide a model fallback sequence
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Try each model in order under the per-attempt and total deadlines
pub async fn summarize_with_fallback(
    summarizer: &Arc<dyn Summarizer>,
    models: &[String],
    prompt: &str,
) -> Result<String> {
    let started = Instant::now();
    let mut last_error = SentinelError::Summarizer("no models configured".into());

    for model in models {
        if started.elapsed() >= SUMMARIZER_TOTAL_BUDGET {
            return Err(SentinelError::Summarizer("total budget exhausted".into()));
        }
        let attempt = tokio::time::timeout(
            SUMMARIZER_ATTEMPT_DEADLINE,
            summarizer.summarize(model, prompt),
        )
        .await;
        match attempt {
            Ok(Ok(text)) if !text.trim().is_empty() => return Ok(text),
            Ok(Ok(_)) => {
                last_error = SentinelError::Summarizer(format!("{model} returned empty text"));
            }
            Ok(Err(e)) => last_error = e,
            Err(_) => {
                last_error = SentinelError::Summarizer(format!("{model} attempt timed out"));
            }
        }
    }
    Err(last_error)
}

/// Which slot, if any, is due right now
///
/// A slot is due when `now` lies inside `[slot, slot + grace]`, the mode
/// enables it, and `last_sent` does not already cover it (no two scheduled
/// reports in the same `(day, slot)`).
pub fn due_slot(
    now_local: DateTime<Tz>,
    settings: &ReportSettings,
    last_sent_utc: Option<DateTime<Utc>>,
    grace: ChronoDuration,
) -> Option<ReportSlot> {
    if settings.mode == REPORT_MODE_OFF {
        return None;
    }

    let tz = now_local.timezone();
    let last_sent_local = last_sent_utc.map(|last| last.with_timezone(&tz));

    let mut candidates = vec![(ReportSlot::Morning, settings.morning)];
    if settings.mode == REPORT_MODE_TWICE {
        candidates.push((ReportSlot::Evening, settings.evening));
    }

    for (slot, time) in candidates {
        let Some(slot_local) = tz
            .from_local_datetime(&now_local.date_naive().and_time(time.as_naive()))
            .earliest()
        else {
            continue;
        };
        if now_local < slot_local || now_local - slot_local > grace {
            continue;
        }
        let already_sent = last_sent_local
            .map(|last| last >= slot_local)
            .unwrap_or(false);
        if !already_sent {
            return Some(slot);
        }
    }
    None
}

/// Deterministic report body; complete without any external dependency
pub async fn render_report(ctx: &Arc<AppContext>, manual: bool) -> String {
    let tz = ctx.config.read().tz();
    let now_local = Utc::now().with_timezone(&tz);
    let lang = ctx.settings.read().language.clone();

    // manual reports cover the day so far; scheduled ones the window since
    // the last report
    let window_start = if manual {
        let midnight = now_local
            .with_hour(0)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .unwrap_or(now_local);
        midnight.with_timezone(&Utc)
    } else {
        ctx.report
            .lock()
            .last_sent
            .unwrap_or_else(|| (now_local - ChronoDuration::hours(24)).with_timezone(&Utc))
    };

    let snapshot = ctx.snapshot.read().clone();
    let mut body = format!(
        "{} — {}\n",
        crate::chat::tr(&lang, "report_title"),
        now_local.format("%Y-%m-%d %H:%M")
    );

    if snapshot.ready {
        body.push_str(&format!(
            "\nCPU {} · RAM {} ({} free) · Swap {}\n",
            format_percent(snapshot.cpu_percent),
            format_percent(snapshot.ram_percent),
            format_bytes(snapshot.ram_free_mib * 1024 * 1024),
            format_percent(snapshot.swap_percent),
        ));
        for (label, volume) in &snapshot.volumes {
            body.push_str(&format!(
                "{} {} used, {} free\n",
                label.to_uppercase(),
                format_percent(volume.used_percent),
                format_bytes(volume.free_bytes),
            ));
        }
        body.push_str(&format!(
            "Load {:.2}/{:.2}/{:.2} · up {}\n",
            snapshot.load_1,
            snapshot.load_5,
            snapshot.load_15,
            format_duration(Duration::from_secs(snapshot.uptime_seconds)),
        ));
    } else {
        body.push_str("\nNo sample collected yet\n");
    }

    // stress summary for the closing window
    let stress = ctx.stress.lock().summary();
    let stressed: Vec<String> = stress
        .iter()
        .filter(|(_, record)| record.stress_count > 0 || record.current_start.is_some())
        .map(|(resource, record)| {
            format!(
                "{resource}: {}× stressed, longest {}, total {}",
                record.stress_count,
                format_duration(Duration::from_secs(record.longest_stress_secs)),
                format_duration(Duration::from_secs(record.total_stress_secs)),
            )
        })
        .collect();
    if !stressed.is_empty() {
        body.push_str("\nStress:\n");
        for line in stressed {
            body.push_str(&format!("• {line}\n"));
        }
    }

    // events inside the window
    let events = ctx.events.since(window_start);
    if events.is_empty() {
        body.push_str(&format!("\n{}\n", crate::chat::tr(&lang, "no_events")));
    } else {
        body.push_str(&format!("\nEvents since {}:\n", window_start.with_timezone(&tz).format("%H:%M")));
        for event in events.iter().rev().take(20).rev() {
            body.push_str(&format!(
                "{} {} {}\n",
                event.timestamp.with_timezone(&tz).format("%H:%M"),
                event.level.glyph(),
                event.message
            ));
        }
    }

    // containers
    if let Ok(list) = ctx.containers.list(&ctx.runner).await {
        let running = list.iter().filter(|container| container.running).count();
        body.push_str(&format!("\nContainers: {running}/{} running\n", list.len()));
    }

    // healthcheck
    let health = ctx.health.lock().clone();
    if health.total_pings > 0 {
        body.push_str(&format!(
            "Healthcheck: {} of {} pings ok ({})\n",
            health.successful_pings,
            health.total_pings,
            format_percent(health.uptime_percent()),
        ));
    }

    // disk forecasts
    for (volume, prediction) in ctx.disk_history.lock().predictions() {
        if prediction.is_meaningful() {
            body.push_str(&format!(
                "{} full in ~{:.0} days at {:.1} GB/day\n",
                volume.to_uppercase(),
                prediction.days_until_full,
                prediction.gb_per_day,
            ));
        }
    }

    body.push_str(&format!(
        "\nSentinel up {}, {} events in ledger",
        format_duration(ctx.started_at.elapsed()),
        ctx.events.len(),
    ));
    let stale: Vec<String> = ctx
        .loop_health()
        .into_iter()
        .filter(|(_, age_secs)| *age_secs > 600)
        .map(|(worker, age_secs)| {
            format!("{worker} silent for {}", format_duration(Duration::from_secs(age_secs)))
        })
        .collect();
    if !stale.is_empty() {
        body.push_str(&format!("\n⚠️ Loops: {}", stale.join(", ")));
    }

    body
}

/// Render, optionally decorate with the summariser, and return the final text
async fn compose_report(ctx: &Arc<AppContext>, manual: bool) -> String {
    let body = render_report(ctx, manual).await;

    let Some(summarizer) = ctx.summarizer.clone() else {
        return body;
    };
    let models = ctx.summarizer_models.clone();
    let prompt = format!(
        "Summarise the following NAS status report in two friendly sentences, \
         keeping every number that matters:\n\n{body}"
    );
    match summarize_with_fallback(&summarizer, &models, &prompt).await {
        Ok(summary) => format!("{}\n\n{body}", summary.trim()),
        Err(e) => {
            log_warn(LogCategory::Report, &format!("summariser unavailable: {e}"));
            body
        }
    }
}

/// Post-send bookkeeping shared by scheduled and manual reports
fn finish_report(ctx: &Arc<AppContext>, sent_at: DateTime<Utc>) {
    {
        let mut report = ctx.report.lock();
        // last_sent is monotonic
        if report.last_sent.map(|last| sent_at > last).unwrap_or(true) {
            report.last_sent = Some(sent_at);
        }
    }
    ctx.save_durable();
    ctx.stress.lock().reset_counters();
    ctx.events.prune_older_than(event_retention());
}

/// Emit one scheduled report
pub async fn send_scheduled_report(ctx: &Arc<AppContext>, slot: ReportSlot) {
    log_info(LogCategory::Report, &format!("sending scheduled report ({slot:?})"));
    let text = compose_report(ctx, false).await;
    ctx.send_direct(&text).await;
    ctx.events
        .append(EventLevel::Info, format!("Scheduled report sent ({slot:?})"));
    finish_report(ctx, Utc::now());
}

/// Emit one operator-requested report (window: since local midnight)
pub async fn send_manual_report(ctx: &Arc<AppContext>) {
    let text = compose_report(ctx, true).await;
    ctx.send_direct(&text).await;
    finish_report(ctx, Utc::now());
}

/// Report scheduler worker
pub async fn run(ctx: Arc<AppContext>) {
    let mut ticker = tokio::time::interval(SCHEDULER_TICK);
    log_info(LogCategory::Report, "report scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancel.cancelled() => return,
        }

        let tz = ctx.config.read().tz();
        let settings = ctx.settings.read().report.clone();
        let last_sent = ctx.report.lock().last_sent;
        let now_local = Utc::now().with_timezone(&tz);

        if let Some(slot) = due_slot(now_local, &settings, last_sent, grace_window()) {
            send_scheduled_report(&ctx, slot).await;
        }
        ctx.mark_tick("report_scheduler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeOfDay;

    fn settings(mode: u8) -> ReportSettings {
        ReportSettings {
            mode,
            morning: TimeOfDay::new(7, 30),
            evening: TimeOfDay::new(20, 0),
        }
    }

    fn rome_at(hour: u32, minute: u32) -> DateTime<Tz> {
        chrono_tz::Europe::Rome
            .with_ymd_and_hms(2024, 6, 10, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn slot_fires_inside_grace_window() {
        // process starts at 07:32 with a 07:30 slot and no prior send
        let now = rome_at(7, 32);
        assert_eq!(
            due_slot(now, &settings(REPORT_MODE_TWICE), None, grace_window()),
            Some(ReportSlot::Morning)
        );
    }

    #[test]
    fn slot_expires_past_grace_window() {
        // 07:36 is past the 5-minute grace: wait for the evening slot
        let now = rome_at(7, 36);
        assert_eq!(
            due_slot(now, &settings(REPORT_MODE_TWICE), None, grace_window()),
            None
        );
    }

    #[test]
    fn sent_slot_does_not_refire_same_day() {
        let now = rome_at(7, 33);
        let sent_at = rome_at(7, 31).with_timezone(&Utc);
        assert_eq!(
            due_slot(now, &settings(REPORT_MODE_TWICE), Some(sent_at), grace_window()),
            None
        );
    }

    #[test]
    fn yesterdays_send_does_not_block_today() {
        let now = rome_at(7, 31);
        let yesterday = chrono_tz::Europe::Rome
            .with_ymd_and_hms(2024, 6, 9, 7, 31, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            due_slot(now, &settings(REPORT_MODE_TWICE), Some(yesterday), grace_window()),
            Some(ReportSlot::Morning)
        );
    }

    #[test]
    fn evening_slot_requires_twice_mode() {
        let now = rome_at(20, 1);
        assert_eq!(
            due_slot(now, &settings(REPORT_MODE_TWICE), None, grace_window()),
            Some(ReportSlot::Evening)
        );
        assert_eq!(
            due_slot(now, &settings(REPORT_MODE_MORNING), None, grace_window()),
            None
        );
        assert_eq!(due_slot(now, &settings(REPORT_MODE_OFF), None, grace_window()), None);
    }

    #[test]
    fn before_slot_nothing_is_due() {
        let now = rome_at(7, 29);
        assert_eq!(
            due_slot(now, &settings(REPORT_MODE_TWICE), None, grace_window()),
            None
        );
    }

    struct FlakySummarizer {
        fail_models: Vec<String>,
    }

    #[async_trait]
    impl Summarizer for FlakySummarizer {
        async fn summarize(&self, model: &str, _prompt: &str) -> Result<String> {
            if self.fail_models.iter().any(|m| m == model) {
                Err(SentinelError::Summarizer(format!("{model} down")))
            } else {
                Ok(format!("summary from {model}"))
            }
        }
    }

    #[tokio::test]
    async fn summariser_walks_the_fallback_list() {
        let summarizer: Arc<dyn Summarizer> = Arc::new(FlakySummarizer {
            fail_models: vec!["primary".to_string()],
        });
        let models = vec!["primary".to_string(), "backup".to_string()];
        let text = summarize_with_fallback(&summarizer, &models, "prompt")
            .await
            .unwrap();
        assert_eq!(text, "summary from backup");
    }

    #[tokio::test]
    async fn summariser_total_failure_is_an_error() {
        let summarizer: Arc<dyn Summarizer> = Arc::new(FlakySummarizer {
            fail_models: vec!["a".to_string(), "b".to_string()],
        });
        let models = vec!["a".to_string(), "b".to_string()];
        assert!(summarize_with_fallback(&summarizer, &models, "prompt")
            .await
            .is_err());
    }
}
