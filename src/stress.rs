//! # Stress Tracker - Duration-Weighted Resource Pressure
//!
//! Tracks how long each resource (CPU, RAM, swap, SSD, HDD) stays above its
//! warning threshold. Short excursions are recorded in the counters but never
//! notified; only pressure sustained past the configured duration threshold
//! produces an "under stress" message, and a matching recovery message once
//! the value drops again. This is the significant-stress filter that keeps a
//! busy box from chattering.
//!
//! Counters (count, longest, total) accumulate per reporting window; the
//! report renderer resets them after emitting a report. An open stress
//! interval survives the reset.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::AppContext;
use crate::events::EventLevel;
use crate::format::{format_duration, format_percent};
use crate::logging::{log_info, LogCategory};

/// Resources under observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StressResource {
    Cpu,
    Ram,
    Swap,
    Ssd,
    Hdd,
}

impl StressResource {
    pub const ALL: [StressResource; 5] = [
        StressResource::Cpu,
        StressResource::Ram,
        StressResource::Swap,
        StressResource::Ssd,
        StressResource::Hdd,
    ];
}

impl std::fmt::Display for StressResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StressResource::Cpu => write!(f, "CPU"),
            StressResource::Ram => write!(f, "RAM"),
            StressResource::Swap => write!(f, "Swap"),
            StressResource::Ssd => write!(f, "SSD"),
            StressResource::Hdd => write!(f, "HDD"),
        }
    }
}

/// Per-resource stress record
///
/// `current_start` is Some iff the resource is currently stressed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceStress {
    pub current_start: Option<DateTime<Utc>>,
    pub notified: bool,
    pub stress_count: u32,
    pub longest_stress_secs: u64,
    pub total_stress_secs: u64,
}

/// Something the caller may want to tell the operator about
#[derive(Debug, Clone, PartialEq)]
pub enum StressEvent {
    /// Pressure has been sustained past the duration threshold and the
    /// operator has not been told yet
    Sustained { since: DateTime<Utc> },
    /// Pressure ended; `announced` is true when a stress message had been
    /// sent for this interval
    Recovered {
        duration: ChronoDuration,
        announced: bool,
    },
}

/// All per-resource records
#[derive(Debug, Clone, Default)]
pub struct StressState {
    records: BTreeMap<StressResource, ResourceStress>,
}

impl StressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one resource's state machine
    ///
    /// Does not mark the resource notified: callers decide whether the
    /// notification actually goes out (quiet hours) and then call
    /// [`StressState::mark_notified`].
    pub fn update(
        &mut self,
        resource: StressResource,
        value: f64,
        warning_threshold: f64,
        duration_threshold: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Option<StressEvent> {
        let record = self.records.entry(resource).or_default();

        if value >= warning_threshold {
            match record.current_start {
                None => {
                    record.current_start = Some(now);
                    record.notified = false;
                    None
                }
                Some(start) => {
                    if !record.notified && now - start >= duration_threshold {
                        Some(StressEvent::Sustained { since: start })
                    } else {
                        None
                    }
                }
            }
        } else {
            let start = record.current_start.take()?;
            let duration = now - start;
            let announced = record.notified;
            record.notified = false;
            record.stress_count += 1;
            let secs = duration.num_seconds().max(0) as u64;
            record.total_stress_secs += secs;
            record.longest_stress_secs = record.longest_stress_secs.max(secs);
            Some(StressEvent::Recovered { duration, announced })
        }
    }

    /// Record that the sustained-stress message went out
    pub fn mark_notified(&mut self, resource: StressResource) {
        if let Some(record) = self.records.get_mut(&resource) {
            record.notified = true;
        }
    }

    /// Copy of all records for the report renderer
    pub fn summary(&self) -> Vec<(StressResource, ResourceStress)> {
        self.records
            .iter()
            .map(|(resource, record)| (*resource, record.clone()))
            .collect()
    }

    /// Zero the window counters after a report; open intervals survive
    pub fn reset_counters(&mut self) {
        for record in self.records.values_mut() {
            record.stress_count = 0;
            record.longest_stress_secs = 0;
            record.total_stress_secs = 0;
        }
    }
}

/// Pull the tracked value for one resource out of a snapshot
fn resource_value(snapshot: &crate::sampler::Snapshot, resource: StressResource) -> f64 {
    match resource {
        StressResource::Cpu => snapshot.cpu_percent,
        StressResource::Ram => snapshot.ram_percent,
        StressResource::Swap => snapshot.swap_percent,
        StressResource::Ssd => snapshot.volume_percent("ssd"),
        StressResource::Hdd => snapshot.volume_percent("hdd"),
    }
}

fn warning_threshold(
    config: &crate::config::SentinelConfig,
    resource: StressResource,
) -> f64 {
    match resource {
        StressResource::Cpu => config.notifications.cpu.warning_threshold,
        StressResource::Ram => config.notifications.ram.warning_threshold,
        StressResource::Swap => config.notifications.swap.warning_threshold,
        StressResource::Ssd => config.notifications.disk_ssd.warning_threshold,
        StressResource::Hdd => config.notifications.disk_hdd.warning_threshold,
    }
}

/// One tracker pass over the current snapshot; called by the actuator loop
pub async fn tick(ctx: &Arc<AppContext>) {
    let (enabled, duration_threshold) = {
        let config = ctx.config.read();
        (
            config.stress_tracking.enabled,
            ChronoDuration::minutes(config.stress_tracking.duration_threshold_minutes as i64),
        )
    };
    if !enabled {
        return;
    }

    let snapshot = ctx.snapshot.read().clone();
    if !snapshot.ready {
        return;
    }
    let now = Utc::now();
    let quiet = ctx.is_quiet_now();

    for resource in StressResource::ALL {
        let (value, threshold) = {
            let config = ctx.config.read();
            (
                resource_value(&snapshot, resource),
                warning_threshold(&config, resource),
            )
        };

        let event = ctx
            .stress
            .lock()
            .update(resource, value, threshold, duration_threshold, now);

        match event {
            Some(StressEvent::Sustained { since }) => {
                let elapsed = (now - since).to_std().unwrap_or_default();
                let message = format!(
                    "{resource} under stress for {}: {} (warning threshold {}%)",
                    format_duration(elapsed),
                    format_percent(value),
                    threshold,
                );
                // the episode is recorded once either way; quiet hours only
                // mute the send
                ctx.stress.lock().mark_notified(resource);
                ctx.events.append(EventLevel::Warning, message.clone());
                if !quiet {
                    ctx.notify_user(&message).await;
                }
            }
            Some(StressEvent::Recovered { duration, announced }) if announced => {
                let elapsed = duration.to_std().unwrap_or_default();
                let message = format!(
                    "{resource} back to normal after {}",
                    format_duration(elapsed)
                );
                ctx.events.append(EventLevel::Info, message.clone());
                if !quiet {
                    ctx.notify_user(&message).await;
                }
                log_info(LogCategory::Stress, &message);
            }
            _ => {}
        }
    }
}
