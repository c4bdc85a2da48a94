//! # Configuration - Document, Sanitisation and Runtime Settings
//!
//! The sentinel is configured by a single JSON document. Absent sections fall
//! back to production defaults; recoverable value errors are sanitised with a
//! report of corrections (critical thresholds are raised to at least the
//! warning threshold, percents clamped to [0, 100], times clamped to valid
//! HH:MM, unknown weekday names fall back to sunday). Unrecoverable fields
//! (missing bot token, missing allowed user id) abort start-up.
//!
//! Runtime-mutable operator settings ([`UserSettings`]: language, quiet
//! hours, report mode/times, prune schedule) are seeded from the document on
//! first run and persisted in the durable state afterwards; for those fields
//! the settings overlay wins over the document on subsequent starts.
//!
//! Configuration patches arriving over the chat surface go through
//! [`SentinelConfig::apply_patch`], which refuses to touch locked identity
//! fields and reports applied/ignored/corrected field lists back to the
//! operator.

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::{Result, SentinelError};

// -- field defaults ---------------------------------------------------------

fn default_true() -> bool {
    true
}
fn d_ssd_path() -> String {
    "/mnt/ssd".to_string()
}
fn d_hdd_path() -> String {
    "/mnt/hdd".to_string()
}
fn d_timezone() -> String {
    "UTC".to_string()
}
fn d_warn_80() -> f64 {
    80.0
}
fn d_crit_95() -> f64 {
    95.0
}
fn d_warn_60() -> f64 {
    60.0
}
fn d_crit_90() -> f64 {
    90.0
}
fn d_warn_85() -> f64 {
    85.0
}
fn d_temp_warn() -> f64 {
    70.0
}
fn d_temp_crit() -> f64 {
    85.0
}
fn d_smart_devices() -> Vec<String> {
    vec!["sda".to_string(), "sdb".to_string()]
}
fn d_morning_hour() -> u8 {
    8
}
fn d_evening_hour() -> u8 {
    20
}
fn d_zero_u8() -> u8 {
    0
}
fn d_stress_minutes() -> u64 {
    10
}
fn d_watchdog_timeout() -> u64 {
    5
}
fn d_prune_day() -> String {
    "sunday".to_string()
}
fn d_prune_hour() -> u8 {
    4
}
fn d_max_restarts() -> u32 {
    3
}
fn d_stats_seconds() -> u64 {
    5
}
fn d_monitor_seconds() -> u64 {
    30
}
fn d_cooldown_minutes() -> u64 {
    30
}
fn d_docker_ttl() -> u64 {
    10
}
fn d_fs_interval() -> u64 {
    15
}
fn d_top_n() -> usize {
    10
}
fn d_hc_period() -> u64 {
    300
}
fn d_hc_grace() -> u64 {
    60
}
fn d_kernel_interval() -> u64 {
    60
}
fn d_net_interval() -> u64 {
    30
}
fn d_net_targets() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}
fn d_dns_host() -> String {
    "example.com".to_string()
}
fn d_failure_threshold() -> u32 {
    3
}
fn d_net_cooldown() -> u64 {
    10
}
fn d_raid_interval() -> u64 {
    120
}
fn d_raid_cooldown() -> u64 {
    30
}

// -- document sections ------------------------------------------------------

/// Filesystem probe targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "d_ssd_path")]
    pub ssd: String,
    #[serde(default = "d_hdd_path")]
    pub hdd: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ssd: d_ssd_path(),
            hdd: d_hdd_path(),
        }
    }
}

/// One scheduled report slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSlotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_morning_hour")]
    pub hour: u8,
    #[serde(default = "d_zero_u8")]
    pub minute: u8,
}

/// Scheduled reports section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_morning_slot")]
    pub morning: ReportSlotConfig,
    #[serde(default = "d_evening_slot")]
    pub evening: ReportSlotConfig,
}

fn d_morning_slot() -> ReportSlotConfig {
    ReportSlotConfig {
        enabled: true,
        hour: d_morning_hour(),
        minute: 0,
    }
}

fn d_evening_slot() -> ReportSlotConfig {
    ReportSlotConfig {
        enabled: true,
        hour: d_evening_hour(),
        minute: 0,
    }
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            morning: d_morning_slot(),
            evening: d_evening_slot(),
        }
    }
}

/// Notification suppression window; wraps midnight when start > end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QuietHoursConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub start_hour: u8,
    #[serde(default)]
    pub start_minute: u8,
    #[serde(default)]
    pub end_hour: u8,
    #[serde(default)]
    pub end_minute: u8,
}

impl QuietHoursConfig {
    /// True when `time` falls inside the quiet window
    ///
    /// A window with start == end cannot match anything (it is disabled by
    /// sanitisation); start > end denotes an overnight window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }
        let start = NaiveTime::from_hms_opt(self.start_hour as u32, self.start_minute as u32, 0);
        let end = NaiveTime::from_hms_opt(self.end_hour as u32, self.end_minute as u32, 0);
        let (Some(start), Some(end)) = (start, end) else {
            return false;
        };
        if start == end {
            false
        } else if start < end {
            time >= start && time < end
        } else {
            // overnight wrap
            time >= start || time < end
        }
    }
}

/// Warning/critical pair for one percent-valued resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_warn_80")]
    pub warning_threshold: f64,
    #[serde(default = "d_crit_95")]
    pub critical_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_threshold: d_warn_80(),
            critical_threshold: d_crit_95(),
        }
    }
}

/// Disk I/O utilisation carries a warning level only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskIoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_warn_80")]
    pub warning_threshold: f64,
}

impl Default for DiskIoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_threshold: d_warn_80(),
        }
    }
}

/// SMART health probing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_smart_devices")]
    pub devices: Vec<String>,
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            devices: d_smart_devices(),
        }
    }
}

/// Per-resource notification thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub cpu: ThresholdConfig,
    #[serde(default)]
    pub ram: ThresholdConfig,
    #[serde(default = "d_swap_threshold")]
    pub swap: ThresholdConfig,
    #[serde(default = "d_disk_threshold")]
    pub disk_ssd: ThresholdConfig,
    #[serde(default = "d_disk_threshold")]
    pub disk_hdd: ThresholdConfig,
    #[serde(default)]
    pub disk_io: DiskIoConfig,
    #[serde(default)]
    pub smart: SmartConfig,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            cpu: ThresholdConfig::default(),
            ram: ThresholdConfig::default(),
            swap: d_swap_threshold(),
            disk_ssd: d_disk_threshold(),
            disk_hdd: d_disk_threshold(),
            disk_io: DiskIoConfig::default(),
            smart: SmartConfig::default(),
        }
    }
}

fn d_swap_threshold() -> ThresholdConfig {
    ThresholdConfig {
        enabled: true,
        warning_threshold: d_warn_60(),
        critical_threshold: d_crit_90(),
    }
}

fn d_disk_threshold() -> ThresholdConfig {
    ThresholdConfig {
        enabled: true,
        warning_threshold: d_warn_85(),
        critical_threshold: d_crit_95(),
    }
}

/// Temperature thresholds in °C
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_temp_warn")]
    pub warning_threshold: f64,
    #[serde(default = "d_temp_crit")]
    pub critical_threshold: f64,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_threshold: d_temp_warn(),
            critical_threshold: d_temp_crit(),
        }
    }
}

/// Sustained-pressure tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressTrackingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_stress_minutes")]
    pub duration_threshold_minutes: u64,
}

impl Default for StressTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_threshold_minutes: d_stress_minutes(),
        }
    }
}

/// Container daemon watchdog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerWatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_watchdog_timeout")]
    pub timeout_minutes: u64,
    #[serde(default)]
    pub auto_restart_service: bool,
}

impl Default for DockerWatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_minutes: d_watchdog_timeout(),
            auto_restart_service: false,
        }
    }
}

/// Weekly prune schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyPruneConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_prune_day")]
    pub day: String,
    #[serde(default = "d_prune_hour")]
    pub hour: u8,
}

impl Default for WeeklyPruneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            day: d_prune_day(),
            hour: d_prune_hour(),
        }
    }
}

/// RAM-critical auto-restart budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRestartConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_max_restarts")]
    pub max_restarts_per_hour: u32,
    #[serde(default = "d_crit_95")]
    pub ram_threshold: f64,
}

impl Default for AutoRestartConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_restarts_per_hour: d_max_restarts(),
            ram_threshold: d_crit_95(),
        }
    }
}

/// Container runtime supervision section
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DockerConfig {
    #[serde(default)]
    pub watchdog: DockerWatchdogConfig,
    #[serde(default)]
    pub weekly_prune: WeeklyPruneConfig,
    #[serde(default)]
    pub auto_restart_on_ram_critical: AutoRestartConfig,
}

/// Loop cadences and the critical alert cooldown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalsConfig {
    #[serde(default = "d_stats_seconds")]
    pub stats_seconds: u64,
    #[serde(default = "d_monitor_seconds")]
    pub monitor_seconds: u64,
    #[serde(default = "d_cooldown_minutes")]
    pub critical_alert_cooldown_minutes: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            stats_seconds: d_stats_seconds(),
            monitor_seconds: d_monitor_seconds(),
            critical_alert_cooldown_minutes: d_cooldown_minutes(),
        }
    }
}

/// Cache TTLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_docker_ttl")]
    pub docker_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            docker_ttl_seconds: d_docker_ttl(),
        }
    }
}

/// Lazy filesystem watchdog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsWatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_fs_interval")]
    pub check_interval_minutes: u64,
    #[serde(default = "d_warn_85")]
    pub warning_threshold: f64,
    #[serde(default = "d_crit_95")]
    pub critical_threshold: f64,
    #[serde(default)]
    pub deep_scan_paths: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "d_top_n")]
    pub top_n_files: usize,
}

impl Default for FsWatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_minutes: d_fs_interval(),
            warning_threshold: d_warn_85(),
            critical_threshold: d_crit_95(),
            deep_scan_paths: Vec::new(),
            exclude_patterns: Vec::new(),
            top_n_files: d_top_n(),
        }
    }
}

/// Outward healthcheck ping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthchecksConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ping_url: String,
    #[serde(default = "d_hc_period")]
    pub period_seconds: u64,
    #[serde(default = "d_hc_grace")]
    pub grace_seconds: u64,
}

impl Default for HealthchecksConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ping_url: String::new(),
            period_seconds: d_hc_period(),
            grace_seconds: d_hc_grace(),
        }
    }
}

/// Kernel ring buffer watchdog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelWatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_kernel_interval")]
    pub check_interval_seconds: u64,
}

impl Default for KernelWatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: d_kernel_interval(),
        }
    }
}

/// Network reachability watchdog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkWatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_net_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "d_net_targets")]
    pub targets: Vec<String>,
    #[serde(default = "d_dns_host")]
    pub dns_host: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "d_net_cooldown")]
    pub cooldown_minutes: u64,
    #[serde(default = "default_true")]
    pub recovery_notify: bool,
    #[serde(default)]
    pub force_reboot_on_down: bool,
    #[serde(default)]
    pub force_reboot_after_minutes: u64,
}

impl Default for NetworkWatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: d_net_interval(),
            targets: d_net_targets(),
            dns_host: d_dns_host(),
            gateway: None,
            failure_threshold: d_failure_threshold(),
            cooldown_minutes: d_net_cooldown(),
            recovery_notify: true,
            force_reboot_on_down: false,
            force_reboot_after_minutes: 0,
        }
    }
}

impl NetworkWatchdogConfig {
    /// How long a confirmed outage must persist before a forced reboot
    ///
    /// Zero when forced reboots are disabled; the configured minutes
    /// otherwise, with a 3-minute fallback when the knob was left at zero.
    pub fn force_reboot_after(&self) -> Duration {
        if !self.force_reboot_on_down {
            return Duration::ZERO;
        }
        let minutes = if self.force_reboot_after_minutes == 0 {
            3
        } else {
            self.force_reboot_after_minutes
        };
        Duration::from_secs(minutes * 60)
    }
}

/// Software RAID / ZFS watchdog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaidWatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "d_raid_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "d_raid_cooldown")]
    pub cooldown_minutes: u64,
    #[serde(default = "default_true")]
    pub recovery_notify: bool,
}

impl Default for RaidWatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: d_raid_interval(),
            cooldown_minutes: d_raid_cooldown(),
            recovery_notify: true,
        }
    }
}

/// Top-level configuration document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SentinelConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub allowed_user_id: i64,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default = "d_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub quiet_hours: QuietHoursConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub temperature: TemperatureConfig,
    #[serde(default)]
    pub critical_containers: Vec<String>,
    #[serde(default)]
    pub stress_tracking: StressTrackingConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fs_watchdog: FsWatchdogConfig,
    #[serde(default)]
    pub healthchecks: HealthchecksConfig,
    #[serde(default)]
    pub kernel_watchdog: KernelWatchdogConfig,
    #[serde(default)]
    pub network_watchdog: NetworkWatchdogConfig,
    #[serde(default)]
    pub raid_watchdog: RaidWatchdogConfig,
}

/// Identity fields a runtime patch may never change
const LOCKED_FIELDS: [&str; 2] = ["bot_token", "allowed_user_id"];

/// Top-level keys the patch path recognises
const KNOWN_FIELDS: [&str; 18] = [
    "bot_token",
    "allowed_user_id",
    "paths",
    "timezone",
    "reports",
    "quiet_hours",
    "notifications",
    "temperature",
    "critical_containers",
    "stress_tracking",
    "docker",
    "intervals",
    "cache",
    "fs_watchdog",
    "healthchecks",
    "kernel_watchdog",
    "network_watchdog",
    "raid_watchdog",
];

/// Outcome of a configuration patch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchOutcome {
    /// Top-level sections that were merged
    pub applied: Vec<String>,
    /// Locked or unknown keys that were refused
    pub ignored: Vec<String>,
    /// Field names adjusted by sanitisation
    pub corrected: Vec<String>,
}

impl SentinelConfig {
    /// Load and sanitise a configuration document
    ///
    /// Missing required identity fields abort start-up; every sanitisation
    /// correction is logged.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SentinelError::Config(format!("cannot read {path}: {e}")))?;
        let mut config: SentinelConfig = serde_json::from_str(&raw)
            .map_err(|e| SentinelError::Config(format!("cannot parse {path}: {e}")))?;

        if config.bot_token.is_empty() {
            return Err(SentinelError::Config("bot_token is required".into()));
        }
        if config.allowed_user_id == 0 {
            return Err(SentinelError::Config("allowed_user_id is required".into()));
        }

        let corrected = config.sanitize();
        for field in &corrected {
            warn!(field = %field, "configuration value corrected during load");
        }
        Ok(config)
    }

    /// The schedulers' timezone; unknown IANA names fall back to UTC
    pub fn tz(&self) -> Tz {
        if self.timezone.is_empty() {
            return Tz::UTC;
        }
        match self.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(timezone = %self.timezone, "unknown timezone, using UTC");
                Tz::UTC
            }
        }
    }

    /// Prune weekday; invalid names fall back to sunday
    pub fn prune_weekday(&self) -> Weekday {
        parse_weekday(&self.docker.weekly_prune.day).unwrap_or(Weekday::Sun)
    }

    /// Clamp out-of-range values and restore threshold ordering
    ///
    /// Returns the names of every corrected field.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut corrected = Vec::new();

        let pairs: [(&str, &mut ThresholdConfig); 5] = [
            ("notifications.cpu", &mut self.notifications.cpu),
            ("notifications.ram", &mut self.notifications.ram),
            ("notifications.swap", &mut self.notifications.swap),
            ("notifications.disk_ssd", &mut self.notifications.disk_ssd),
            ("notifications.disk_hdd", &mut self.notifications.disk_hdd),
        ];
        for (name, threshold) in pairs {
            sanitize_percent_pair(
                name,
                &mut threshold.warning_threshold,
                &mut threshold.critical_threshold,
                &mut corrected,
            );
        }

        let io = &mut self.notifications.disk_io.warning_threshold;
        if !(0.0..=100.0).contains(io) {
            *io = io.clamp(0.0, 100.0);
            corrected.push("notifications.disk_io.warning_threshold".to_string());
        }

        // temperatures are °C, not percent, so only ordering and a broad
        // physical range are enforced
        let temp = &mut self.temperature;
        if !(0.0..=150.0).contains(&temp.warning_threshold) {
            temp.warning_threshold = temp.warning_threshold.clamp(0.0, 150.0);
            corrected.push("temperature.warning_threshold".to_string());
        }
        if !(0.0..=150.0).contains(&temp.critical_threshold) {
            temp.critical_threshold = temp.critical_threshold.clamp(0.0, 150.0);
            corrected.push("temperature.critical_threshold".to_string());
        }
        if temp.critical_threshold < temp.warning_threshold {
            temp.critical_threshold = temp.warning_threshold;
            corrected.push("temperature.critical_threshold".to_string());
        }

        sanitize_percent_pair(
            "fs_watchdog",
            &mut self.fs_watchdog.warning_threshold,
            &mut self.fs_watchdog.critical_threshold,
            &mut corrected,
        );

        for (name, hour, minute) in [
            (
                "reports.morning",
                &mut self.reports.morning.hour,
                &mut self.reports.morning.minute,
            ),
            (
                "reports.evening",
                &mut self.reports.evening.hour,
                &mut self.reports.evening.minute,
            ),
        ] {
            if *hour > 23 {
                *hour = 23;
                corrected.push(format!("{name}.hour"));
            }
            if *minute > 59 {
                *minute = 59;
                corrected.push(format!("{name}.minute"));
            }
        }

        let quiet = &mut self.quiet_hours;
        if quiet.start_hour > 23 || quiet.end_hour > 23 || quiet.start_minute > 59 || quiet.end_minute > 59 {
            quiet.start_hour = quiet.start_hour.min(23);
            quiet.end_hour = quiet.end_hour.min(23);
            quiet.start_minute = quiet.start_minute.min(59);
            quiet.end_minute = quiet.end_minute.min(59);
            corrected.push("quiet_hours".to_string());
        }
        if quiet.enabled
            && quiet.start_hour == quiet.end_hour
            && quiet.start_minute == quiet.end_minute
        {
            // an empty window cannot suppress anything
            quiet.enabled = false;
            corrected.push("quiet_hours.enabled".to_string());
        }

        if parse_weekday(&self.docker.weekly_prune.day).is_none() {
            self.docker.weekly_prune.day = "sunday".to_string();
            corrected.push("docker.weekly_prune.day".to_string());
        }
        if self.docker.weekly_prune.hour > 23 {
            self.docker.weekly_prune.hour = 23;
            corrected.push("docker.weekly_prune.hour".to_string());
        }

        let restart = &mut self.docker.auto_restart_on_ram_critical;
        if !(0.0..=100.0).contains(&restart.ram_threshold) {
            restart.ram_threshold = restart.ram_threshold.clamp(0.0, 100.0);
            corrected.push("docker.auto_restart_on_ram_critical.ram_threshold".to_string());
        }

        if self.intervals.stats_seconds == 0 {
            self.intervals.stats_seconds = d_stats_seconds();
            corrected.push("intervals.stats_seconds".to_string());
        }
        if self.intervals.monitor_seconds == 0 {
            self.intervals.monitor_seconds = d_monitor_seconds();
            corrected.push("intervals.monitor_seconds".to_string());
        }

        corrected
    }

    /// Merge a JSON patch, refusing locked identity fields
    ///
    /// Unknown top-level keys and locked fields land in `ignored`; every
    /// merged section lands in `applied`; post-merge sanitisation corrections
    /// land in `corrected`. On any deserialisation failure the configuration
    /// is left untouched.
    pub fn apply_patch(&mut self, patch: &Value) -> Result<PatchOutcome> {
        let Value::Object(fields) = patch else {
            return Err(SentinelError::Config("patch must be a JSON object".into()));
        };

        let mut outcome = PatchOutcome::default();
        let mut merged = serde_json::to_value(&*self)
            .map_err(|e| SentinelError::Config(format!("cannot serialise config: {e}")))?;

        for (key, value) in fields {
            if LOCKED_FIELDS.contains(&key.as_str()) || !KNOWN_FIELDS.contains(&key.as_str()) {
                outcome.ignored.push(key.clone());
                continue;
            }
            deep_merge(&mut merged[key.as_str()], value);
            outcome.applied.push(key.clone());
        }

        let mut candidate: SentinelConfig = serde_json::from_value(merged)
            .map_err(|e| SentinelError::Config(format!("patch produced invalid config: {e}")))?;
        // identity fields stay locked even if serialisation round-tripped them
        candidate.bot_token = self.bot_token.clone();
        candidate.allowed_user_id = self.allowed_user_id;

        outcome.corrected = candidate.sanitize();
        *self = candidate;
        Ok(outcome)
    }
}

/// Recursive merge: objects merge key-wise, everything else replaces
fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                deep_merge(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

fn sanitize_percent_pair(
    name: &str,
    warning: &mut f64,
    critical: &mut f64,
    corrected: &mut Vec<String>,
) {
    if !(0.0..=100.0).contains(warning) {
        *warning = warning.clamp(0.0, 100.0);
        corrected.push(format!("{name}.warning_threshold"));
    }
    if !(0.0..=100.0).contains(critical) {
        *critical = critical.clamp(0.0, 100.0);
        corrected.push(format!("{name}.critical_threshold"));
    }
    if *critical < *warning {
        *critical = *warning;
        corrected.push(format!("{name}.critical_threshold"));
    }
}

/// Parse a lowercase english weekday name
pub fn parse_weekday(name: &str) -> Option<Weekday> {
    match name.to_ascii_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

// -- runtime-mutable operator settings --------------------------------------

/// Hour/minute pair used by report slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Self {
        Self {
            hour: hour.min(23),
            minute: minute.min(59),
        }
    }

    pub fn as_naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

/// Report emission mode
pub const REPORT_MODE_OFF: u8 = 0;
pub const REPORT_MODE_MORNING: u8 = 1;
pub const REPORT_MODE_TWICE: u8 = 2;

/// Scheduled report settings owned by the operator at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSettings {
    /// 0 = disabled, 1 = morning only, 2 = morning and evening
    pub mode: u8,
    pub morning: TimeOfDay,
    pub evening: TimeOfDay,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            mode: REPORT_MODE_TWICE,
            morning: TimeOfDay::new(d_morning_hour(), 0),
            evening: TimeOfDay::new(d_evening_hour(), 0),
        }
    }
}

/// Weekly prune settings owned by the operator at runtime
///
/// The durable settings overlay is the single source of truth for the prune
/// schedule; the configuration document only seeds it on first run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PruneSettings {
    pub enabled: bool,
    pub day: String,
    pub hour: u8,
}

impl PruneSettings {
    pub fn weekday(&self) -> Weekday {
        parse_weekday(&self.day).unwrap_or(Weekday::Sun)
    }
}

/// Operator settings persisted across restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    /// Message language code; unknown codes fall back to english
    pub language: String,
    pub quiet_hours: QuietHoursConfig,
    pub report: ReportSettings,
    pub prune: PruneSettings,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            quiet_hours: QuietHoursConfig::default(),
            report: ReportSettings::default(),
            prune: PruneSettings::default(),
        }
    }
}

impl UserSettings {
    /// First-run seeding from the configuration document
    pub fn seed_from(config: &SentinelConfig) -> Self {
        let mode = if !config.reports.enabled {
            REPORT_MODE_OFF
        } else {
            match (config.reports.morning.enabled, config.reports.evening.enabled) {
                (_, true) => REPORT_MODE_TWICE,
                (true, false) => REPORT_MODE_MORNING,
                (false, false) => REPORT_MODE_OFF,
            }
        };
        Self {
            language: "en".to_string(),
            quiet_hours: config.quiet_hours.clone(),
            report: ReportSettings {
                mode,
                morning: TimeOfDay::new(config.reports.morning.hour, config.reports.morning.minute),
                evening: TimeOfDay::new(config.reports.evening.hour, config.reports.evening.minute),
            },
            prune: PruneSettings {
                enabled: config.docker.weekly_prune.enabled,
                day: config.docker.weekly_prune.day.clone(),
                hour: config.docker.weekly_prune.hour,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults_fill_absent_sections() {
        let config: SentinelConfig = serde_json::from_str(r#"{"bot_token":"x","allowed_user_id":1}"#).unwrap();
        assert_eq!(config.intervals.stats_seconds, 5);
        assert_eq!(config.notifications.smart.devices, vec!["sda", "sdb"]);
        assert_eq!(config.network_watchdog.failure_threshold, 3);
        assert!(config.reports.morning.enabled);
    }

    #[test]
    fn sanitize_raises_critical_to_warning() {
        let mut config = SentinelConfig::default();
        config.notifications.cpu.warning_threshold = 90.0;
        config.notifications.cpu.critical_threshold = 50.0;
        let corrected = config.sanitize();
        assert_eq!(config.notifications.cpu.critical_threshold, 90.0);
        assert!(corrected.iter().any(|f| f == "notifications.cpu.critical_threshold"));
    }

    #[test]
    fn sanitize_falls_back_to_sunday_for_bad_day() {
        let mut config = SentinelConfig::default();
        config.docker.weekly_prune.day = "caturday".to_string();
        let corrected = config.sanitize();
        assert_eq!(config.docker.weekly_prune.day, "sunday");
        assert!(corrected.iter().any(|f| f == "docker.weekly_prune.day"));
        assert_eq!(config.prune_weekday(), Weekday::Sun);
    }

    #[test]
    fn quiet_hours_wrap_midnight() {
        let quiet = QuietHoursConfig {
            enabled: true,
            start_hour: 22,
            start_minute: 0,
            end_hour: 7,
            end_minute: 30,
        };
        assert!(quiet.contains(NaiveTime::from_hms_opt(23, 15, 0).unwrap()));
        assert!(quiet.contains(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(!quiet.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(!quiet.contains(NaiveTime::from_hms_opt(7, 30, 0).unwrap()));
    }

    #[test]
    fn quiet_hours_plain_window() {
        let quiet = QuietHoursConfig {
            enabled: true,
            start_hour: 9,
            start_minute: 0,
            end_hour: 17,
            end_minute: 0,
        };
        assert!(quiet.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(!quiet.contains(NaiveTime::from_hms_opt(18, 0, 0).unwrap()));
    }

    #[test]
    fn patch_locks_identity_and_sanitises() {
        let mut config = SentinelConfig {
            bot_token: "original".to_string(),
            allowed_user_id: 42,
            ..SentinelConfig::default()
        };
        let patch = serde_json::json!({
            "bot_token": "x",
            "quiet_hours": {"enabled": true, "start_hour": 7, "start_minute": 0, "end_hour": 7, "end_minute": 0},
            "notifications": {"cpu": {"warning_threshold": 90.0, "critical_threshold": 50.0}}
        });

        let outcome = config.apply_patch(&patch).unwrap();
        assert!(outcome.ignored.contains(&"bot_token".to_string()));
        assert_eq!(config.bot_token, "original");
        assert!(!config.quiet_hours.enabled, "empty quiet window must disable itself");
        assert!(outcome.corrected.iter().any(|f| f == "quiet_hours.enabled"));
        assert_eq!(config.notifications.cpu.critical_threshold, 90.0);
    }

    #[test]
    fn patch_ignores_unknown_sections() {
        let mut config = SentinelConfig::default();
        let outcome = config
            .apply_patch(&serde_json::json!({"flux_capacitor": {"enabled": true}}))
            .unwrap();
        assert_eq!(outcome.ignored, vec!["flux_capacitor".to_string()]);
        assert!(outcome.applied.is_empty());
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let config = SentinelConfig {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..SentinelConfig::default()
        };
        assert_eq!(config.tz(), Tz::UTC);
        let config = SentinelConfig {
            timezone: "Europe/Rome".to_string(),
            ..SentinelConfig::default()
        };
        assert_eq!(config.tz(), chrono_tz::Europe::Rome);
    }

    #[test]
    fn force_reboot_after_covers_all_modes() {
        let mut net = NetworkWatchdogConfig::default();
        assert_eq!(net.force_reboot_after(), Duration::ZERO);

        net.force_reboot_on_down = true;
        assert_eq!(net.force_reboot_after(), Duration::from_secs(3 * 60));

        net.force_reboot_after_minutes = 10;
        assert_eq!(net.force_reboot_after(), Duration::from_secs(10 * 60));
    }

    #[test]
    fn settings_seed_derives_report_mode() {
        let mut config = SentinelConfig::default();
        let settings = UserSettings::seed_from(&config);
        assert_eq!(settings.report.mode, REPORT_MODE_TWICE);

        config.reports.evening.enabled = false;
        assert_eq!(UserSettings::seed_from(&config).report.mode, REPORT_MODE_MORNING);

        config.reports.enabled = false;
        assert_eq!(UserSettings::seed_from(&config).report.mode, REPORT_MODE_OFF);
    }

    proptest! {
        #[test]
        fn sanitize_always_restores_threshold_order(warn in -50.0..150.0f64, crit in -50.0..150.0f64) {
            let mut config = SentinelConfig::default();
            config.notifications.ram.warning_threshold = warn;
            config.notifications.ram.critical_threshold = crit;
            config.sanitize();

            let ram = &config.notifications.ram;
            prop_assert!((0.0..=100.0).contains(&ram.warning_threshold));
            prop_assert!((0.0..=100.0).contains(&ram.critical_threshold));
            prop_assert!(ram.critical_threshold >= ram.warning_threshold);
        }

        #[test]
        fn quiet_hours_never_match_when_disabled(h in 0u8..24, m in 0u8..60) {
            let quiet = QuietHoursConfig { enabled: false, start_hour: 22, start_minute: 0, end_hour: 7, end_minute: 0 };
            prop_assert!(!quiet.contains(NaiveTime::from_hms_opt(h as u32, m as u32, 0).unwrap()));
        }
    }
}
