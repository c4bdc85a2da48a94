//! # Threshold Monitor - Batched Critical Alerting
//!
//! Every `intervals.monitor_seconds` (default 30 s) the monitor reads the
//! snapshot and evaluates each configured resource against its warning and
//! critical thresholds. Every crossing is appended to the event ledger with a
//! stable phrasing (the stress tracker and report filters match on it);
//! critical conditions are additionally batched into one user notification,
//! gated by the critical-alert cooldown (default 30 min) and quiet hours.
//!
//! SMART health is probed through the external tool at most once per device
//! per probe-spacing window and de-duplicated by per-device signature, so a
//! persistently failing drive alerts exactly once per state change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::Components;
use uuid::Uuid;

use crate::config::SentinelConfig;
use crate::context::AppContext;
use crate::events::EventLevel;
use crate::format::format_percent;
use crate::logging::{log_info, log_warn, LogCategory};
use crate::sampler::Snapshot;
use crate::watchdogs::WatchdogCounters;

/// Minimum spacing between SMART probes of one device
const SMART_PROBE_SPACING: Duration = Duration::from_secs(300);

/// Deadline for one smartctl invocation
const SMART_DEADLINE: Duration = Duration::from_secs(10);

/// Severity of a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Warning,
    Critical,
}

/// Classify a value against a warning/critical pair
pub fn classify(value: f64, warning: f64, critical: f64) -> Option<Level> {
    if value >= critical {
        Some(Level::Critical)
    } else if value >= warning {
        Some(Level::Warning)
    } else {
        None
    }
}

/// True when enough time has passed since the last critical batch
pub fn critical_alert_due(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    match last {
        None => true,
        Some(last) => now.duration_since(last) >= cooldown,
    }
}

/// SMART overall-health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartHealth {
    Passed,
    Failed,
    Unknown,
}

/// Parse smartctl -H output into a verdict
pub fn parse_smart_health(stdout: &str) -> SmartHealth {
    for line in stdout.lines() {
        let upper = line.to_ascii_uppercase();
        if upper.contains("SELF-ASSESSMENT") || upper.contains("SMART HEALTH STATUS") {
            if upper.contains("PASSED") || upper.contains("OK") {
                return SmartHealth::Passed;
            }
            if upper.contains("FAILED") {
                return SmartHealth::Failed;
            }
        }
    }
    SmartHealth::Unknown
}

/// Per-monitor mutable counters, one mutex for all of them
///
/// No outbound I/O ever happens while this lock is held: callers copy what
/// they need, release, then emit.
pub struct MonitorState {
    pub last_critical_alert: Option<Instant>,
    pub smart_last_probe: HashMap<String, Instant>,
    pub smart_signature: HashMap<String, String>,
    pub kernel: WatchdogCounters,
    pub network: WatchdogCounters,
    pub raid: WatchdogCounters,
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            last_critical_alert: None,
            smart_last_probe: HashMap::new(),
            smart_signature: HashMap::new(),
            kernel: WatchdogCounters::default(),
            network: WatchdogCounters::default(),
            raid: WatchdogCounters::default(),
        }
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

/// One evaluated resource
#[derive(Debug, Clone)]
pub struct Crossing {
    pub level: Level,
    pub message: String,
}

/// Evaluate the percent-valued resources of a snapshot
///
/// Stable phrasing: `"<name> <level>: <value> (threshold <t>%)"`.
pub fn evaluate_thresholds(snapshot: &Snapshot, config: &SentinelConfig) -> Vec<Crossing> {
    let mut crossings = Vec::new();

    let readings = [
        ("CPU", snapshot.cpu_percent, &config.notifications.cpu),
        ("RAM", snapshot.ram_percent, &config.notifications.ram),
        ("Swap", snapshot.swap_percent, &config.notifications.swap),
        (
            "SSD",
            snapshot.volume_percent("ssd"),
            &config.notifications.disk_ssd,
        ),
        (
            "HDD",
            snapshot.volume_percent("hdd"),
            &config.notifications.disk_hdd,
        ),
    ];

    for (name, value, threshold) in readings {
        if !threshold.enabled {
            continue;
        }
        match classify(value, threshold.warning_threshold, threshold.critical_threshold) {
            Some(Level::Critical) => crossings.push(Crossing {
                level: Level::Critical,
                message: format!(
                    "{name} critical: {} (threshold {}%)",
                    format_percent(value),
                    threshold.critical_threshold
                ),
            }),
            Some(Level::Warning) => crossings.push(Crossing {
                level: Level::Warning,
                message: format!(
                    "{name} warning: {} (threshold {}%)",
                    format_percent(value),
                    threshold.warning_threshold
                ),
            }),
            None => {}
        }
    }

    let io = &config.notifications.disk_io;
    if io.enabled && snapshot.max_disk_util_percent >= io.warning_threshold {
        crossings.push(Crossing {
            level: Level::Warning,
            message: format!(
                "Disk I/O warning: {} utilisation (threshold {}%)",
                format_percent(snapshot.max_disk_util_percent),
                io.warning_threshold
            ),
        });
    }

    crossings
}

/// Hottest sensor reading, if any sensors are exposed
fn max_temperature() -> Option<f64> {
    let components = Components::new_with_refreshed_list();
    components
        .iter()
        .map(|component| component.temperature() as f64)
        .filter(|temp| temp.is_finite() && *temp > 0.0)
        .fold(None, |acc: Option<f64>, temp| {
            Some(acc.map_or(temp, |max| max.max(temp)))
        })
}

/// One monitor pass: evaluate, record, maybe emit the batched alert
pub async fn check_once(ctx: &Arc<AppContext>) {
    let snapshot = ctx.snapshot.read().clone();
    if !snapshot.ready {
        return;
    }
    let config = ctx.config.read().clone();

    let mut crossings = evaluate_thresholds(&snapshot, &config);

    if config.temperature.enabled {
        if let Some(temp) = max_temperature() {
            match classify(
                temp,
                config.temperature.warning_threshold,
                config.temperature.critical_threshold,
            ) {
                Some(Level::Critical) => crossings.push(Crossing {
                    level: Level::Critical,
                    message: format!(
                        "Temperature critical: {temp:.1}°C (threshold {}°C)",
                        config.temperature.critical_threshold
                    ),
                }),
                Some(Level::Warning) => crossings.push(Crossing {
                    level: Level::Warning,
                    message: format!(
                        "Temperature warning: {temp:.1}°C (threshold {}°C)",
                        config.temperature.warning_threshold
                    ),
                }),
                None => {}
            }
        }
    }

    if config.notifications.smart.enabled {
        crossings.extend(check_smart(ctx, &config).await);
    }

    // every crossing lands in the ledger regardless of emission
    for crossing in &crossings {
        let level = match crossing.level {
            Level::Warning => EventLevel::Warning,
            Level::Critical => EventLevel::Critical,
        };
        ctx.events.append(level, crossing.message.clone());
    }

    let criticals: Vec<String> = crossings
        .iter()
        .filter(|crossing| crossing.level == Level::Critical)
        .map(|crossing| crossing.message.clone())
        .collect();
    if criticals.is_empty() {
        return;
    }

    let cooldown = Duration::from_secs(config.intervals.critical_alert_cooldown_minutes * 60);
    let now = Instant::now();
    let due = {
        let mut state = ctx.monitor.lock();
        if critical_alert_due(state.last_critical_alert, cooldown, now) {
            state.last_critical_alert = Some(now);
            true
        } else {
            false
        }
    };

    if due && !ctx.is_quiet_now() {
        let alert_id = Uuid::new_v4();
        let mut message = String::from("🚨 Critical conditions detected:\n");
        for critical in &criticals {
            message.push_str(&format!("• {critical}\n"));
        }
        log_warn(
            LogCategory::Monitor,
            &format!("critical batch {alert_id}: {} conditions", criticals.len()),
        );
        ctx.notify_user(message.trim_end()).await;
    }
}

/// Probe the configured SMART devices, signature-deduplicated per device
async fn check_smart(ctx: &Arc<AppContext>, config: &SentinelConfig) -> Vec<Crossing> {
    let mut crossings = Vec::new();

    for device in &config.notifications.smart.devices {
        let due = {
            let mut state = ctx.monitor.lock();
            let now = Instant::now();
            match state.smart_last_probe.get(device) {
                Some(last) if now.duration_since(*last) < SMART_PROBE_SPACING => false,
                _ => {
                    state.smart_last_probe.insert(device.clone(), now);
                    true
                }
            }
        };
        if !due {
            continue;
        }

        let device_path = format!("/dev/{device}");
        let output = match ctx
            .runner
            .run("smartctl", &["-H", &device_path], SMART_DEADLINE)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                log_warn(LogCategory::Monitor, &format!("smartctl {device}: {e}"));
                continue;
            }
        };

        let health = parse_smart_health(&output.stdout);
        let signature = format!("smart:{device}:{health:?}");
        let changed = {
            let mut state = ctx.monitor.lock();
            let changed = state.smart_signature.get(device) != Some(&signature);
            state.smart_signature.insert(device.clone(), signature);
            changed
        };
        if !changed {
            continue;
        }

        match health {
            SmartHealth::Failed => crossings.push(Crossing {
                level: Level::Critical,
                message: format!("SMART failure on {device_path}"),
            }),
            SmartHealth::Passed => {
                log_info(LogCategory::Monitor, &format!("SMART healthy on {device_path}"));
            }
            SmartHealth::Unknown => {
                log_warn(
                    LogCategory::Monitor,
                    &format!("SMART verdict unreadable for {device_path}"),
                );
            }
        }
    }

    crossings
}

/// Threshold monitor worker
pub async fn run(ctx: Arc<AppContext>) {
    let period = {
        let config = ctx.config.read();
        Duration::from_secs(config.intervals.monitor_seconds)
    };
    let mut ticker = tokio::time::interval(period);
    log_info(LogCategory::Monitor, "threshold monitor started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancel.cancelled() => return,
        }
        check_once(&ctx).await;
        ctx.mark_tick("monitor");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::VolumeUsage;

    fn snapshot_with(cpu: f64, ram: f64, ssd: f64) -> Snapshot {
        let mut snapshot = Snapshot {
            ready: true,
            cpu_percent: cpu,
            ram_percent: ram,
            ..Snapshot::default()
        };
        snapshot.volumes.insert(
            "ssd".to_string(),
            VolumeUsage {
                used_percent: ssd,
                free_bytes: 0,
                total_bytes: 0,
            },
        );
        snapshot
    }

    #[test]
    fn classify_orders_levels() {
        assert_eq!(classify(10.0, 80.0, 95.0), None);
        assert_eq!(classify(85.0, 80.0, 95.0), Some(Level::Warning));
        assert_eq!(classify(95.0, 80.0, 95.0), Some(Level::Critical));
        // equal thresholds: critical wins
        assert_eq!(classify(90.0, 90.0, 90.0), Some(Level::Critical));
    }

    #[test]
    fn evaluation_uses_stable_phrasing() {
        let config = SentinelConfig::default();
        let snapshot = snapshot_with(97.0, 50.0, 10.0);
        let crossings = evaluate_thresholds(&snapshot, &config);
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].level, Level::Critical);
        assert_eq!(crossings[0].message, "CPU critical: 97.0% (threshold 95%)");
    }

    #[test]
    fn disabled_resources_are_skipped() {
        let mut config = SentinelConfig::default();
        config.notifications.cpu.enabled = false;
        let snapshot = snapshot_with(99.0, 10.0, 10.0);
        assert!(evaluate_thresholds(&snapshot, &config).is_empty());
    }

    #[test]
    fn disk_io_only_warns() {
        let config = SentinelConfig::default();
        let snapshot = Snapshot {
            ready: true,
            max_disk_util_percent: 99.0,
            ..Snapshot::default()
        };
        let crossings = evaluate_thresholds(&snapshot, &config);
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].level, Level::Warning);
        assert!(crossings[0].message.starts_with("Disk I/O warning"));
    }

    #[test]
    fn cooldown_gates_critical_batches() {
        let cooldown = Duration::from_secs(1800);
        let now = Instant::now();
        assert!(critical_alert_due(None, cooldown, now));
        assert!(!critical_alert_due(Some(now), cooldown, now + Duration::from_secs(60)));
        assert!(critical_alert_due(Some(now), cooldown, now + Duration::from_secs(1800)));
    }

    #[test]
    fn smart_output_parses_both_formats() {
        let ata = "SMART overall-health self-assessment test result: PASSED\n";
        assert_eq!(parse_smart_health(ata), SmartHealth::Passed);

        let failed = "SMART overall-health self-assessment test result: FAILED!\n";
        assert_eq!(parse_smart_health(failed), SmartHealth::Failed);

        let scsi = "SMART Health Status: OK\n";
        assert_eq!(parse_smart_health(scsi), SmartHealth::Passed);

        assert_eq!(parse_smart_health("garbage"), SmartHealth::Unknown);
    }
}
