//! # Watchdogs - Kernel Ring, Network Reachability, RAID Health
//!
//! Three independent detectors sharing one de-duplication pattern: classify
//! the current reading into a short textual signature, suppress notifications
//! with an equal signature inside a per-watchdog cooldown, and optionally
//! emit a single "recovered after X" message once the condition clears.
//!
//! - **Kernel**: scans freshly appended kernel ring lines for OOM kills,
//!   filesystem errors, journal aborts and device I/O errors. OOM events feed
//!   an OOM-loop counter; enough kills inside the window force a reboot.
//! - **Network**: pings the configured targets (and optionally the gateway)
//!   and resolves a configured host. DNS-only failure warns on its own
//!   cooldown; full failure counts towards the down threshold, and a
//!   sustained outage can force a reboot when configured.
//! - **RAID**: parses `/proc/mdstat` and, when available, the ZFS status
//!   tool; degraded, rebuilding and unhealthy states alert on every
//!   signature change.
//!
//! None of the detectors hold the monitor lock across outbound I/O: state is
//! mutated under the lock, copied out, and only then are messages sent.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::AppContext;
use crate::events::EventLevel;
use crate::format::format_duration;
use crate::logging::{log_action, log_info, log_warn, LogCategory};

/// Deadline for one ping probe
const PING_DEADLINE: Duration = Duration::from_secs(4);

/// Deadline for DNS resolution
const DNS_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for dmesg / zpool invocations
const PROBE_DEADLINE: Duration = Duration::from_secs(10);

/// Kernel alert cooldown per signature
const KERNEL_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// OOM kills inside this window count towards the loop threshold
const OOM_LOOP_WINDOW_MINUTES: i64 = 30;

/// OOM kills within the window that force a reboot
pub const OOM_LOOP_THRESHOLD: usize = 3;

/// Shared per-watchdog counters
#[derive(Debug, Clone, Default)]
pub struct WatchdogCounters {
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub down_since: Option<DateTime<Utc>>,
    pub alert_last_sent: Option<Instant>,
    pub last_signature: Option<String>,
    /// Independent cooldown slot for a secondary alert kind (DNS-only)
    pub last_secondary_alert: Option<Instant>,
}

impl WatchdogCounters {
    /// Signature-deduplicated alert gate
    ///
    /// Fires when the signature changed, or when the cooldown elapsed for a
    /// repeated signature. Updates the stored signature and send time when it
    /// fires.
    pub fn should_alert(&mut self, signature: &str, cooldown: Duration, now: Instant) -> bool {
        let same = self.last_signature.as_deref() == Some(signature);
        let cooled = self
            .alert_last_sent
            .map(|sent| now.duration_since(sent) >= cooldown)
            .unwrap_or(true);
        if !same || cooled {
            self.last_signature = Some(signature.to_string());
            self.alert_last_sent = Some(now);
            true
        } else {
            false
        }
    }

    /// Secondary-alert gate with its own cooldown, no signature
    pub fn secondary_alert_due(&mut self, cooldown: Duration, now: Instant) -> bool {
        let due = self
            .last_secondary_alert
            .map(|sent| now.duration_since(sent) >= cooldown)
            .unwrap_or(true);
        if due {
            self.last_secondary_alert = Some(now);
        }
        due
    }

    /// Clear outage bookkeeping after recovery
    pub fn clear_down(&mut self) {
        self.consecutive_failures = 0;
        self.down_since = None;
        self.last_signature = None;
    }
}

/// Issue a forced reboot through the external CLI, persisting state first
pub async fn force_reboot(ctx: &Arc<AppContext>, reason: &str) {
    let message = format!("Forced reboot: {reason}");
    log_action(LogCategory::Action, &message);
    ctx.events.append(EventLevel::Action, message.clone());
    ctx.save_durable();
    ctx.notify_user(&message).await;

    if let Err(e) = ctx
        .runner
        .run("systemctl", &["reboot", "--force"], Duration::from_secs(30))
        .await
    {
        log_warn(LogCategory::Action, &format!("reboot command failed: {e}"));
    }
}

// -- kernel -----------------------------------------------------------------

/// Classified kernel ring issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelIssue {
    OomKill { process: String },
    FsError { detail: String },
    JournalAbort { detail: String },
    IoError { detail: String },
}

impl KernelIssue {
    /// Short fingerprint used for alert de-duplication
    pub fn signature(&self) -> String {
        match self {
            KernelIssue::OomKill { process } => format!("oom:{process}"),
            KernelIssue::FsError { detail } => {
                format!("fs:{}", detail.split_whitespace().next().unwrap_or("?"))
            }
            KernelIssue::JournalAbort { .. } => "journal".to_string(),
            KernelIssue::IoError { detail } => {
                format!("io:{}", detail.split_whitespace().next().unwrap_or("?"))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            KernelIssue::OomKill { process } => format!("Kernel OOM kill: {process}"),
            KernelIssue::FsError { detail } => format!("Kernel filesystem error: {detail}"),
            KernelIssue::JournalAbort { detail } => format!("Kernel journal abort: {detail}"),
            KernelIssue::IoError { detail } => format!("Kernel I/O error: {detail}"),
        }
    }
}

/// Classify one kernel ring line
pub fn classify_kernel_line(line: &str) -> Option<KernelIssue> {
    if let Some(index) = line.find("Out of memory: Killed process") {
        // "Out of memory: Killed process 1234 (name) ..."
        let rest = &line[index..];
        let process = rest
            .split('(')
            .nth(1)
            .and_then(|tail| tail.split(')').next())
            .unwrap_or("unknown")
            .to_string();
        return Some(KernelIssue::OomKill { process });
    }
    for marker in ["EXT4-fs error", "BTRFS error", "XFS ("] {
        if let Some(index) = line.find(marker) {
            return Some(KernelIssue::FsError {
                detail: line[index..].chars().take(120).collect(),
            });
        }
    }
    for marker in ["Aborting journal", "journal commit I/O error"] {
        if let Some(index) = line.find(marker) {
            return Some(KernelIssue::JournalAbort {
                detail: line[index..].chars().take(120).collect(),
            });
        }
    }
    if let Some(index) = line.find("I/O error, dev") {
        return Some(KernelIssue::IoError {
            detail: line[index..].chars().take(120).collect(),
        });
    }
    None
}

/// Kernel scan state: ring cursor and the OOM-loop window
#[derive(Debug, Clone, Default)]
pub struct KernelState {
    /// Last ring line already processed; lines before it are skipped
    cursor: Option<String>,
    /// True once the first scan anchored the cursor
    primed: bool,
    oom_times: Vec<DateTime<Utc>>,
}

/// Outcome of one kernel scan
#[derive(Debug, Clone, Default)]
pub struct KernelScanOutcome {
    pub issues: Vec<KernelIssue>,
    /// OOM loop threshold reached: the caller must force a reboot
    pub oom_loop: bool,
}

/// Process the ring lines that appeared since the previous scan
///
/// The first scan only anchors the cursor: pre-existing ring content must not
/// trigger actions on startup.
pub fn scan_kernel_lines(
    state: &mut KernelState,
    lines: &[&str],
    now: DateTime<Utc>,
    oom_threshold: usize,
) -> KernelScanOutcome {
    if !state.primed {
        state.primed = true;
        state.cursor = lines.last().map(|line| line.to_string());
        return KernelScanOutcome::default();
    }
    let fresh: Vec<&str> = match &state.cursor {
        Some(cursor) => match lines.iter().rposition(|line| *line == cursor.as_str()) {
            Some(position) => lines[position + 1..].to_vec(),
            None => lines.to_vec(),
        },
        None => lines.to_vec(),
    };
    if let Some(last) = lines.last() {
        state.cursor = Some(last.to_string());
    }

    let mut outcome = KernelScanOutcome::default();
    for line in fresh {
        let Some(issue) = classify_kernel_line(line) else {
            continue;
        };
        if matches!(issue, KernelIssue::OomKill { .. }) {
            state.oom_times.push(now);
        }
        outcome.issues.push(issue);
    }

    let window_start = now - ChronoDuration::minutes(OOM_LOOP_WINDOW_MINUTES);
    state.oom_times.retain(|stamp| *stamp > window_start);
    if state.oom_times.len() >= oom_threshold {
        outcome.oom_loop = true;
        state.oom_times.clear();
    }
    outcome
}

/// Kernel watchdog worker
pub async fn run_kernel(ctx: Arc<AppContext>) {
    let (enabled, interval) = {
        let config = ctx.config.read();
        (
            config.kernel_watchdog.enabled,
            Duration::from_secs(config.kernel_watchdog.check_interval_seconds.max(5)),
        )
    };
    if !enabled {
        return;
    }

    let mut state = KernelState::default();
    let mut ticker = tokio::time::interval(interval);
    log_info(LogCategory::Kernel, "kernel watchdog started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancel.cancelled() => return,
        }
        kernel_tick(&ctx, &mut state).await;
        ctx.mark_tick("kernel_watchdog");
    }
}

async fn kernel_tick(ctx: &Arc<AppContext>, state: &mut KernelState) {
    let output = match ctx
        .runner
        .run("dmesg", &["--level=err,crit,alert,emerg"], PROBE_DEADLINE)
        .await
    {
        Ok(output) if output.success() => output,
        Ok(output) => {
            log_warn(LogCategory::Kernel, &format!("dmesg exited {}", output.exit_code));
            return;
        }
        Err(e) => {
            log_warn(LogCategory::Kernel, &format!("dmesg failed: {e}"));
            return;
        }
    };

    let lines: Vec<&str> = output.stdout.lines().collect();
    let outcome = scan_kernel_lines(state, &lines, Utc::now(), OOM_LOOP_THRESHOLD);
    process_kernel_outcome(ctx, outcome).await;
}

/// Record and alert on a kernel scan outcome; shared with tests
pub async fn process_kernel_outcome(ctx: &Arc<AppContext>, outcome: KernelScanOutcome) {
    let quiet = ctx.is_quiet_now();

    for issue in &outcome.issues {
        let message = issue.describe();
        let level = match issue {
            KernelIssue::OomKill { .. } => EventLevel::Critical,
            _ => EventLevel::Warning,
        };
        ctx.events.append(level, message.clone());

        let due = {
            let mut monitor = ctx.monitor.lock();
            monitor
                .kernel
                .should_alert(&issue.signature(), KERNEL_COOLDOWN, Instant::now())
        };
        if due && !quiet {
            ctx.notify_user(&message).await;
        }
    }

    if outcome.oom_loop {
        force_reboot(ctx, "repeated OOM kills, machine is thrashing").await;
    }
}

// -- network ----------------------------------------------------------------

/// Result of one reachability round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetProbe {
    pub gateway_ok: Option<bool>,
    pub icmp_ok: bool,
    pub dns_ok: bool,
}

async fn ping(ctx: &Arc<AppContext>, target: &str) -> bool {
    matches!(
        ctx.runner
            .run("ping", &["-c", "1", "-W", "2", target], PING_DEADLINE)
            .await,
        Ok(output) if output.success()
    )
}

async fn resolve(host: &str) -> bool {
    let lookup = tokio::net::lookup_host((host, 80u16));
    match tokio::time::timeout(DNS_DEADLINE, lookup).await {
        Ok(Ok(mut addrs)) => addrs.next().is_some(),
        _ => false,
    }
}

/// Run one reachability round against the configured targets
pub async fn probe_network(ctx: &Arc<AppContext>) -> NetProbe {
    let (targets, dns_host, gateway) = {
        let config = ctx.config.read();
        let net = &config.network_watchdog;
        (net.targets.clone(), net.dns_host.clone(), net.gateway.clone())
    };

    let gateway_ok = match &gateway {
        Some(gateway) => Some(ping(ctx, gateway).await),
        None => None,
    };

    let pings = join_all(targets.iter().map(|target| ping(ctx, target))).await;
    let icmp_ok = pings.into_iter().any(|ok| ok);
    let dns_ok = resolve(&dns_host).await;

    NetProbe {
        gateway_ok,
        icmp_ok,
        dns_ok,
    }
}

/// Network watchdog worker
pub async fn run_network(ctx: Arc<AppContext>) {
    let (enabled, interval) = {
        let config = ctx.config.read();
        (
            config.network_watchdog.enabled,
            Duration::from_secs(config.network_watchdog.check_interval_seconds.max(5)),
        )
    };
    if !enabled {
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    log_info(LogCategory::Network, "network watchdog started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancel.cancelled() => return,
        }
        let probe = probe_network(&ctx).await;
        network_tick(&ctx, probe).await;
        ctx.mark_tick("network_watchdog");
    }
}

/// Apply one probe result to the outage state machine; shared with tests
pub async fn network_tick(ctx: &Arc<AppContext>, probe: NetProbe) {
    let (failure_threshold, cooldown, recovery_notify, reboot_after) = {
        let config = ctx.config.read();
        let net = &config.network_watchdog;
        (
            net.failure_threshold,
            Duration::from_secs(net.cooldown_minutes * 60),
            net.recovery_notify,
            net.force_reboot_after(),
        )
    };
    let now = Utc::now();
    let quiet = ctx.is_quiet_now();

    if probe.icmp_ok {
        // connectivity is back (or never left)
        let recovered_after = {
            let mut monitor = ctx.monitor.lock();
            monitor.network.last_check = Some(now);
            let recovered = monitor.network.down_since.map(|since| now - since);
            monitor.network.clear_down();
            recovered
        };
        if let Some(outage) = recovered_after {
            let message = format!(
                "Network recovered after {}",
                format_duration(outage.to_std().unwrap_or_default())
            );
            ctx.events.append(EventLevel::Info, message.clone());
            if recovery_notify && !quiet {
                ctx.notify_user(&message).await;
            }
        }

        if !probe.dns_ok {
            let message = "DNS resolution failing while network is reachable".to_string();
            ctx.events.append(EventLevel::Warning, message.clone());
            let due = {
                let mut monitor = ctx.monitor.lock();
                monitor.network.secondary_alert_due(cooldown, Instant::now())
            };
            if due && !quiet {
                ctx.notify_user(&message).await;
            }
        }

        if let Some(false) = probe.gateway_ok {
            log_warn(LogCategory::Network, "gateway unreachable while targets respond");
        }
        return;
    }

    // full failure path
    let down_since = {
        let mut monitor = ctx.monitor.lock();
        monitor.network.last_check = Some(now);
        monitor.network.consecutive_failures += 1;
        if monitor.network.down_since.is_none()
            && monitor.network.consecutive_failures >= failure_threshold
        {
            monitor.network.down_since = Some(now);
        }
        monitor.network.down_since
    };
    let Some(since) = down_since else {
        return;
    };

    // while the outage persists, the signature gate paces re-alerts: one
    // alert per cooldown window, like the kernel and RAID detectors
    let due = {
        let mut monitor = ctx.monitor.lock();
        monitor.network.should_alert("net:down", cooldown, Instant::now())
    };
    if due {
        let outage = (now - since).to_std().unwrap_or_default();
        let message = format!(
            "Network down: no ICMP target reachable (for {}, threshold {failure_threshold} attempts)",
            format_duration(outage)
        );
        ctx.events.append(EventLevel::Critical, message.clone());
        if !quiet {
            ctx.notify_user(&message).await;
        }
    }

    if reboot_after > Duration::ZERO {
        let outage = (now - since).to_std().unwrap_or_default();
        if outage >= reboot_after {
            force_reboot(ctx, "network unreachable beyond the configured limit").await;
        }
    }
}

// -- raid -------------------------------------------------------------------

/// One unhealthy RAID component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidIssue {
    pub array: String,
    pub state: String,
}

/// Parse /proc/mdstat into the list of arrays needing attention
pub fn parse_mdstat(content: &str) -> Vec<RaidIssue> {
    let mut issues = Vec::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some((name, rest)) = trimmed.split_once(" : ") {
            if name.starts_with("md") {
                current = Some(name.to_string());
                if rest.starts_with("inactive") {
                    issues.push(RaidIssue {
                        array: name.to_string(),
                        state: "inactive".to_string(),
                    });
                }
                continue;
            }
        }

        let Some(array) = &current else { continue };
        if let Some(open) = trimmed.rfind('[') {
            let bracket = &trimmed[open..];
            if bracket.contains('U') && bracket.contains('_') {
                issues.push(RaidIssue {
                    array: array.clone(),
                    state: "degraded".to_string(),
                });
            }
        }
        for marker in ["recovery =", "resync =", "reshape ="] {
            if trimmed.contains(marker) {
                issues.push(RaidIssue {
                    array: array.clone(),
                    state: marker.trim_end_matches(" =").to_string(),
                });
            }
        }
    }
    issues
}

/// Combined signature over mdraid and ZFS findings; empty means healthy
pub fn raid_signature(md_issues: &[RaidIssue], zfs_unhealthy: Option<&str>) -> String {
    let mut parts: Vec<String> = md_issues
        .iter()
        .map(|issue| format!("md:{}:{}", issue.array, issue.state))
        .collect();
    parts.sort();
    if let Some(detail) = zfs_unhealthy {
        parts.push(format!("zfs:{}", detail.split_whitespace().next().unwrap_or("unhealthy")));
    }
    parts.join("|")
}

/// RAID watchdog worker
pub async fn run_raid(ctx: Arc<AppContext>) {
    let (enabled, interval) = {
        let config = ctx.config.read();
        (
            config.raid_watchdog.enabled,
            Duration::from_secs(config.raid_watchdog.check_interval_seconds.max(10)),
        )
    };
    if !enabled {
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    log_info(LogCategory::Raid, "raid watchdog started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancel.cancelled() => return,
        }
        raid_tick(&ctx).await;
        ctx.mark_tick("raid_watchdog");
    }
}

async fn raid_tick(ctx: &Arc<AppContext>) {
    let md_issues = match std::fs::read_to_string("/proc/mdstat") {
        Ok(content) => parse_mdstat(&content),
        // no mdraid on this box
        Err(_) => Vec::new(),
    };

    let zfs_detail = match ctx
        .runner
        .run("zpool", &["status", "-x"], PROBE_DEADLINE)
        .await
    {
        Ok(output) if output.success() => {
            let text = output.stdout.trim().to_string();
            if text.is_empty() || text.contains("all pools are healthy") {
                None
            } else {
                Some(text)
            }
        }
        // tool missing or transiently failing: not a RAID problem
        _ => None,
    };

    let signature = raid_signature(&md_issues, zfs_detail.as_deref());
    raid_apply(ctx, signature, md_issues, zfs_detail).await;
}

/// Apply one RAID reading; shared with tests
pub async fn raid_apply(
    ctx: &Arc<AppContext>,
    signature: String,
    md_issues: Vec<RaidIssue>,
    zfs_detail: Option<String>,
) {
    let (cooldown, recovery_notify) = {
        let config = ctx.config.read();
        (
            Duration::from_secs(config.raid_watchdog.cooldown_minutes * 60),
            config.raid_watchdog.recovery_notify,
        )
    };
    let quiet = ctx.is_quiet_now();

    if signature.is_empty() {
        let recovered_since = {
            let mut monitor = ctx.monitor.lock();
            let had_issue = monitor.raid.last_signature.take().is_some();
            let since = monitor.raid.down_since.take();
            if had_issue {
                since
            } else {
                None
            }
        };
        if let Some(since) = recovered_since {
            let outage = (Utc::now() - since).to_std().unwrap_or_default();
            let message = format!("RAID healthy again after {}", format_duration(outage));
            ctx.events.append(EventLevel::Info, message.clone());
            if recovery_notify && !quiet {
                ctx.notify_user(&message).await;
            }
        }
        return;
    }

    let mut message = String::from("RAID attention needed:");
    for issue in &md_issues {
        message.push_str(&format!("\n• {} is {}", issue.array, issue.state));
    }
    if let Some(detail) = &zfs_detail {
        message.push_str(&format!(
            "\n• ZFS: {}",
            crate::format::truncate(detail, 160)
        ));
    }

    let due = {
        let mut monitor = ctx.monitor.lock();
        if monitor.raid.down_since.is_none() {
            monitor.raid.down_since = Some(Utc::now());
        }
        monitor.raid.should_alert(&signature, cooldown, Instant::now())
    };
    if due {
        ctx.events.append(EventLevel::Critical, message.clone());
        if !quiet {
            ctx.notify_user(&message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_dedup_suppresses_within_cooldown() {
        let mut counters = WatchdogCounters::default();
        let cooldown = Duration::from_secs(600);
        let t0 = Instant::now();

        assert!(counters.should_alert("oom:plex", cooldown, t0));
        assert!(!counters.should_alert("oom:plex", cooldown, t0 + Duration::from_secs(10)));
        // different signature alerts immediately
        assert!(counters.should_alert("oom:db", cooldown, t0 + Duration::from_secs(20)));
        // same signature after cooldown alerts again
        assert!(counters.should_alert("oom:db", cooldown, t0 + Duration::from_secs(700)));
    }

    #[test]
    fn classifies_oom_and_fs_lines() {
        let oom = "[12345.678] Out of memory: Killed process 4242 (plex) total-vm:1000kB";
        assert_eq!(
            classify_kernel_line(oom),
            Some(KernelIssue::OomKill {
                process: "plex".to_string()
            })
        );

        let fs = "[99.1] EXT4-fs error (device sda1): ext4_find_entry:1455: inode #2: comm ls";
        assert!(matches!(
            classify_kernel_line(fs),
            Some(KernelIssue::FsError { .. })
        ));

        let journal = "[10.0] Aborting journal on device sda1-8.";
        assert!(matches!(
            classify_kernel_line(journal),
            Some(KernelIssue::JournalAbort { .. })
        ));

        assert_eq!(classify_kernel_line("usb 1-1: new device"), None);
    }

    #[test]
    fn first_scan_only_anchors_the_cursor() {
        let mut state = KernelState::default();
        let lines = vec!["Out of memory: Killed process 1 (a)"];
        let outcome = scan_kernel_lines(&mut state, &lines, Utc::now(), 3);
        assert!(outcome.issues.is_empty());
        assert!(!outcome.oom_loop);
    }

    #[test]
    fn oom_loop_fires_after_threshold_new_events() {
        let mut state = KernelState::default();
        let now = Utc::now();
        // prime
        scan_kernel_lines(&mut state, &["boot ok"], now, 3);

        let mut ring = vec!["boot ok".to_string()];
        for i in 0..3 {
            ring.push(format!("Out of memory: Killed process {i} (hog{i})"));
            let refs: Vec<&str> = ring.iter().map(String::as_str).collect();
            let outcome = scan_kernel_lines(&mut state, &refs, now, 3);
            assert_eq!(outcome.issues.len(), 1, "each scan sees only the new line");
            if i < 2 {
                assert!(!outcome.oom_loop);
            } else {
                assert!(outcome.oom_loop, "third kill inside the window trips the loop");
            }
        }

        // the window was cleared after firing: the next kill starts over
        ring.push("Out of memory: Killed process 9 (hog9)".to_string());
        let refs: Vec<&str> = ring.iter().map(String::as_str).collect();
        let outcome = scan_kernel_lines(&mut state, &refs, now, 3);
        assert!(!outcome.oom_loop);
    }

    #[test]
    fn rotated_ring_reprocesses_without_cursor_match() {
        let mut state = KernelState::default();
        let now = Utc::now();
        scan_kernel_lines(&mut state, &["line-a"], now, 3);

        // the ring rotated: the cursor line is gone
        let outcome = scan_kernel_lines(
            &mut state,
            &["EXT4-fs error (device sdb1): something"],
            now,
            3,
        );
        assert_eq!(outcome.issues.len(), 1);
    }

    #[test]
    fn mdstat_flags_degraded_and_rebuilding_arrays() {
        let content = "\
Personalities : [raid1] [raid5]
md0 : active raid1 sdb1[1] sda1[0]
      1953383488 blocks super 1.2 [2/2] [UU]

md1 : active raid5 sdc1[0] sdd1[1] sde1[2]
      3906767872 blocks level 5 [3/2] [UU_]
      [>....................]  recovery =  1.2% (12345/100000) finish=3.4min

unused devices: <none>
";
        let issues = parse_mdstat(content);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0], RaidIssue { array: "md1".into(), state: "degraded".into() });
        assert_eq!(issues[1], RaidIssue { array: "md1".into(), state: "recovery".into() });
    }

    #[test]
    fn mdstat_healthy_array_is_silent() {
        let content = "\
md0 : active raid1 sdb1[1] sda1[0]
      1953383488 blocks super 1.2 [2/2] [UU]
";
        assert!(parse_mdstat(content).is_empty());
    }

    #[test]
    fn mdstat_inactive_array_is_flagged() {
        let content = "md2 : inactive sdf1[0](S)\n      976630488 blocks super 1.2\n";
        let issues = parse_mdstat(content);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].state, "inactive");
    }

    #[test]
    fn raid_signature_is_stable_and_ordered() {
        let issues = vec![
            RaidIssue { array: "md1".into(), state: "degraded".into() },
            RaidIssue { array: "md0".into(), state: "recovery".into() },
        ];
        let signature = raid_signature(&issues, Some("pool tank is DEGRADED"));
        assert_eq!(signature, "md:md0:recovery|md:md1:degraded|zfs:pool");
        assert_eq!(raid_signature(&[], None), "");
    }
}
