//! # Container Supervision - Observer, Cache and Actuator
//!
//! Polls the container runtime CLI, caches the listing with a short TTL,
//! detects up/down transitions, alerts on missing critical containers, and
//! takes the bounded corrective actions: restarting the heaviest container
//! when RAM goes critical (under a per-container per-hour budget), restarting
//! the container daemon when it looks dead, and running the weekly prune.
//!
//! The cache accepts a benign race: two concurrent readers of a stale cache
//! may both run the external listing command, and the last store wins.
//! Fetches are never serialised behind a lock.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::command_runner::CommandRunner;
use crate::context::AppContext;
use crate::events::EventLevel;
use crate::format::{format_duration, format_percent};
use crate::logging::{log_action, log_info, log_warn, LogCategory};
use crate::{Result, SentinelError};

/// Deadline for runtime listing commands
const LIST_DEADLINE: Duration = Duration::from_secs(10);

/// Deadline for a container restart
const RESTART_DEADLINE: Duration = Duration::from_secs(60);

/// Deadline for the weekly prune
const PRUNE_DEADLINE: Duration = Duration::from_secs(300);

/// Per critical container alert cooldown
const CRITICAL_CONTAINER_COOLDOWN: Duration = Duration::from_secs(600);

/// A container counts as restart-worthy heavy above this memory share
const HEAVY_MEM_PERCENT: f64 = 20.0;

/// Restart timestamps older than this are garbage-collected
const LEDGER_RETENTION_HOURS: i64 = 2;

/// docker ps line format: name, image, id, status
const PS_FORMAT: &str = "{{.Names}}\t{{.Image}}\t{{.ID}}\t{{.Status}}";

/// docker stats line format: name, memory percent
const STATS_FORMAT: &str = "{{.Name}}\t{{.MemPerc}}";

/// One container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub id: String,
    pub status: String,
    pub running: bool,
}

/// Parse one line of `docker ps --format` output
///
/// Malformed lines yield None; the caller skips them without failing the
/// batch.
pub fn parse_container_line(line: &str) -> Option<ContainerInfo> {
    let mut fields = line.split('\t');
    let name = fields.next()?.trim();
    let image = fields.next()?.trim();
    let id = fields.next()?.trim();
    let status = fields.next()?.trim();
    if name.is_empty() || id.is_empty() {
        return None;
    }
    Some(ContainerInfo {
        name: name.to_string(),
        image: image.to_string(),
        id: id.to_string(),
        status: status.to_string(),
        running: status.starts_with("Up"),
    })
}

/// Parse one line of `docker stats --format` output into (name, mem%)
pub fn parse_stats_line(line: &str) -> Option<(String, f64)> {
    let mut fields = line.split('\t');
    let name = fields.next()?.trim();
    let mem = fields.next()?.trim().trim_end_matches('%');
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), mem.parse().ok()?))
}

struct CacheInner {
    list: Vec<ContainerInfo>,
    fetched_at: Option<Instant>,
}

/// TTL cache over the runtime listing
pub struct ContainerCache {
    inner: RwLock<CacheInner>,
    ttl: Duration,
}

impl ContainerCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                list: Vec::new(),
                fetched_at: None,
            }),
            ttl,
        }
    }

    /// Cached list when fresh, otherwise a fresh fetch
    ///
    /// Concurrent callers of a stale cache may both fetch; last store wins.
    pub async fn list(&self, runner: &Arc<dyn CommandRunner>) -> Result<Vec<ContainerInfo>> {
        {
            let inner = self.inner.read();
            if let Some(fetched_at) = inner.fetched_at {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(inner.list.clone());
                }
            }
        }

        let list = fetch_containers(runner).await?;
        let mut inner = self.inner.write();
        inner.list = list.clone();
        inner.fetched_at = Some(Instant::now());
        Ok(list)
    }

    /// Drop the cached listing (after restarts)
    pub fn invalidate(&self) {
        self.inner.write().fetched_at = None;
    }
}

/// Uncached runtime listing
pub async fn fetch_containers(runner: &Arc<dyn CommandRunner>) -> Result<Vec<ContainerInfo>> {
    let output = runner
        .run(
            "docker",
            &["ps", "-a", "--format", PS_FORMAT],
            LIST_DEADLINE,
        )
        .await?;
    if !output.success() {
        return Err(SentinelError::Command(format!(
            "docker ps exited {}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }

    let mut containers = Vec::new();
    for line in output.stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_container_line(line) {
            Some(container) => containers.push(container),
            None => log_warn(
                LogCategory::Container,
                &format!("skipping malformed runtime line: {line:?}"),
            ),
        }
    }
    Ok(containers)
}

/// Per-container memory shares from the runtime
pub async fn fetch_memory_shares(runner: &Arc<dyn CommandRunner>) -> Result<HashMap<String, f64>> {
    let output = runner
        .run(
            "docker",
            &["stats", "--no-stream", "--format", STATS_FORMAT],
            LIST_DEADLINE,
        )
        .await?;
    if !output.success() {
        return Err(SentinelError::Command(format!(
            "docker stats exited {}",
            output.exit_code
        )));
    }
    Ok(output.stdout.lines().filter_map(parse_stats_line).collect())
}

/// Auto-restart budget ledger: container → ordered restart instants
///
/// The per-hour budget invariant holds at all times: a restart is only
/// recorded after [`AutoRestartLedger::can_restart`] approved it, and the
/// budget is consumed even when the restart command fails.
#[derive(Debug, Clone, Default)]
pub struct AutoRestartLedger {
    restarts: HashMap<String, Vec<DateTime<Utc>>>,
}

impl AutoRestartLedger {
    pub fn from_map(restarts: HashMap<String, Vec<DateTime<Utc>>>) -> Self {
        Self { restarts }
    }

    pub fn as_map(&self) -> &HashMap<String, Vec<DateTime<Utc>>> {
        &self.restarts
    }

    /// Count restarts of one container within the last hour
    pub fn count_last_hour(&self, container: &str, now: DateTime<Utc>) -> usize {
        let window_start = now - chrono::Duration::hours(1);
        self.restarts
            .get(container)
            .map(|stamps| stamps.iter().filter(|ts| **ts > window_start).count())
            .unwrap_or(0)
    }

    /// True while the container is under its hourly budget
    pub fn can_restart(&self, container: &str, max_per_hour: u32, now: DateTime<Utc>) -> bool {
        (self.count_last_hour(container, now) as u32) < max_per_hour
    }

    /// Consume one budget slot
    pub fn record(&mut self, container: &str, now: DateTime<Utc>) {
        self.restarts
            .entry(container.to_string())
            .or_default()
            .push(now);
    }

    /// Drop timestamps past retention
    pub fn gc(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::hours(LEDGER_RETENTION_HOURS);
        self.restarts.retain(|_, stamps| {
            stamps.retain(|ts| *ts > cutoff);
            !stamps.is_empty()
        });
    }
}

/// Mutable observer state living on the context
pub struct ObserverState {
    /// name → running, from the previous tick
    prev: HashMap<String, bool>,
    /// since when a running container has been down
    down_since: HashMap<String, DateTime<Utc>>,
    /// last critical-container alert per name
    critical_alert_at: HashMap<String, Instant>,
    /// since when the daemon has looked dead
    daemon_failing_since: Option<Instant>,
    /// (date, hour) of the last prune so one hour fires at most once
    last_prune: Option<(NaiveDate, u32)>,
}

impl ObserverState {
    pub fn new() -> Self {
        Self {
            prev: HashMap::new(),
            down_since: HashMap::new(),
            critical_alert_at: HashMap::new(),
            daemon_failing_since: None,
            last_prune: None,
        }
    }
}

impl Default for ObserverState {
    fn default() -> Self {
        Self::new()
    }
}

/// Transition detected between two listings
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Stopped { name: String },
    Recovered { name: String, down_for: Option<chrono::Duration> },
}

/// Diff the previous running-map against the current listing
///
/// A container that disappears from the listing counts as stopped; one that
/// reappears running counts as recovered.
pub fn diff_listings(
    prev: &HashMap<String, bool>,
    current: &[ContainerInfo],
    down_since: &HashMap<String, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<Transition> {
    let mut transitions = Vec::new();
    let current_map: HashMap<&str, bool> = current
        .iter()
        .map(|container| (container.name.as_str(), container.running))
        .collect();

    for (name, was_running) in prev {
        let running_now = current_map.get(name.as_str()).copied().unwrap_or(false);
        if *was_running && !running_now {
            transitions.push(Transition::Stopped { name: name.clone() });
        } else if !*was_running && running_now {
            transitions.push(Transition::Recovered {
                name: name.clone(),
                down_for: down_since.get(name).map(|since| now - *since),
            });
        }
    }
    transitions
}

/// One observer pass: transitions, critical containers, daemon watchdog
pub async fn observe(ctx: &Arc<AppContext>) {
    let listing = ctx.containers.list(&ctx.runner).await;
    let now = Utc::now();

    match &listing {
        Ok(list) => {
            handle_transitions(ctx, list, now).await;
            check_critical_containers(ctx, list).await;
        }
        Err(e) => {
            log_warn(LogCategory::Container, &format!("runtime listing failed: {e}"));
        }
    }

    let daemon_suspect = match &listing {
        Ok(list) => list.is_empty(),
        Err(_) => true,
    };
    daemon_watchdog(ctx, daemon_suspect).await;
    ctx.mark_tick("containers");
}

async fn handle_transitions(ctx: &Arc<AppContext>, list: &[ContainerInfo], now: DateTime<Utc>) {
    let transitions = {
        let state = ctx.container_state.lock();
        diff_listings(&state.prev, list, &state.down_since, now)
    };

    for transition in &transitions {
        match transition {
            Transition::Stopped { name } => {
                ctx.container_state
                    .lock()
                    .down_since
                    .insert(name.clone(), now);
                let message = format!("Container stopped: {name}");
                ctx.events.append(EventLevel::Warning, message.clone());
                ctx.notify_user(&message).await;
            }
            Transition::Recovered { name, down_for } => {
                ctx.container_state.lock().down_since.remove(name);
                let message = match down_for.and_then(|d| d.to_std().ok()) {
                    Some(duration) => format!(
                        "Container recovered: {name} (down for {})",
                        format_duration(duration)
                    ),
                    None => format!("Container recovered: {name}"),
                };
                ctx.events.append(EventLevel::Info, message.clone());
                ctx.notify_user(&message).await;
            }
        }
    }

    let mut state = ctx.container_state.lock();
    state.prev = list
        .iter()
        .map(|container| (container.name.clone(), container.running))
        .collect();
}

async fn check_critical_containers(ctx: &Arc<AppContext>, list: &[ContainerInfo]) {
    let critical_names = ctx.config.read().critical_containers.clone();
    if critical_names.is_empty() {
        return;
    }

    for name in critical_names {
        let running = list
            .iter()
            .any(|container| container.name == name && container.running);
        if running {
            continue;
        }

        let due = {
            let mut state = ctx.container_state.lock();
            let now = Instant::now();
            match state.critical_alert_at.get(&name) {
                Some(last) if now.duration_since(*last) < CRITICAL_CONTAINER_COOLDOWN => false,
                _ => {
                    state.critical_alert_at.insert(name.clone(), now);
                    true
                }
            }
        };
        if due {
            let message = format!("Critical container down: {name}");
            ctx.events.append(EventLevel::Critical, message.clone());
            ctx.notify_user(&message).await;
        }
    }
}

/// Restart the heaviest container when RAM is critical, within budget
pub async fn ram_critical_check(ctx: &Arc<AppContext>) {
    let (enabled, ram_threshold, max_per_hour) = {
        let config = ctx.config.read();
        let auto = &config.docker.auto_restart_on_ram_critical;
        (auto.enabled, auto.ram_threshold, auto.max_restarts_per_hour)
    };
    if !enabled {
        return;
    }

    let ram_percent = {
        let snapshot = ctx.snapshot.read();
        if !snapshot.ready {
            return;
        }
        snapshot.ram_percent
    };
    if ram_percent < ram_threshold {
        return;
    }

    let shares = match fetch_memory_shares(&ctx.runner).await {
        Ok(shares) => shares,
        Err(e) => {
            log_warn(LogCategory::Container, &format!("memory shares unavailable: {e}"));
            return;
        }
    };
    let running: Vec<ContainerInfo> = match ctx.containers.list(&ctx.runner).await {
        Ok(list) => list.into_iter().filter(|c| c.running).collect(),
        Err(_) => return,
    };

    let heaviest = running
        .iter()
        .filter_map(|container| {
            shares
                .get(&container.name)
                .filter(|share| **share > HEAVY_MEM_PERCENT)
                .map(|share| (container.name.clone(), *share))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let Some((name, share)) = heaviest else {
        return;
    };

    let now = Utc::now();
    let approved = {
        let mut ledger = ctx.restart_ledger.lock();
        ledger.gc(now);
        if ledger.can_restart(&name, max_per_hour, now) {
            // the budget is consumed regardless of the restart outcome
            ledger.record(&name, now);
            true
        } else {
            false
        }
    };
    if !approved {
        log_info(
            LogCategory::Container,
            &format!("restart budget exhausted for {name}, skipping auto-restart"),
        );
        return;
    }
    // the ledger update is durable even when the message is muted
    ctx.save_durable();

    log_action(
        LogCategory::Action,
        &format!("auto-restarting {name} (RAM {ram_percent:.1}%, container {share:.1}%)"),
    );
    let result = ctx
        .runner
        .run("docker", &["restart", &name], RESTART_DEADLINE)
        .await;
    ctx.containers.invalidate();

    match result {
        Ok(output) if output.success() => {
            let message = format!(
                "Auto-restarted {name}: RAM at {}, container using {}",
                format_percent(ram_percent),
                format_percent(share),
            );
            ctx.events.append(EventLevel::Action, message.clone());
            ctx.notify_user(&message).await;
        }
        Ok(output) => {
            let stderr = crate::format::truncate(output.stderr.trim(), 200);
            let message = format!("Auto-restart of {name} failed: {stderr}");
            ctx.events.append(EventLevel::Critical, message.clone());
            ctx.notify_user(&message).await;
        }
        Err(e) => {
            let message = format!("Auto-restart of {name} failed: {e}");
            ctx.events.append(EventLevel::Critical, message.clone());
            ctx.notify_user(&message).await;
        }
    }
}

/// Operator-requested restart; event-recorded but exempt from the budget
pub async fn manual_restart(ctx: &Arc<AppContext>, name: &str) -> Result<String> {
    let output = ctx
        .runner
        .run("docker", &["restart", name], RESTART_DEADLINE)
        .await?;
    ctx.containers.invalidate();

    if output.success() {
        let message = format!("Container restarted on request: {name}");
        ctx.events.append(EventLevel::Action, message.clone());
        log_action(LogCategory::Action, &message);
        Ok(message)
    } else {
        let stderr = crate::format::truncate(output.stderr.trim(), 200);
        Err(SentinelError::Actuator(format!(
            "restart of {name} failed: {stderr}"
        )))
    }
}

/// Restart the container daemon (or warn) once it has looked dead too long
async fn daemon_watchdog(ctx: &Arc<AppContext>, suspect: bool) {
    let (enabled, timeout, auto_restart) = {
        let config = ctx.config.read();
        let watchdog = &config.docker.watchdog;
        (
            watchdog.enabled,
            Duration::from_secs(watchdog.timeout_minutes * 60),
            watchdog.auto_restart_service,
        )
    };
    if !enabled {
        return;
    }

    if !suspect {
        ctx.container_state.lock().daemon_failing_since = None;
        return;
    }

    let expired = {
        let mut state = ctx.container_state.lock();
        let now = Instant::now();
        match state.daemon_failing_since {
            None => {
                state.daemon_failing_since = Some(now);
                false
            }
            Some(since) if now.duration_since(since) >= timeout => {
                // re-arm the timer so the next stretch gets its own action
                state.daemon_failing_since = None;
                true
            }
            Some(_) => false,
        }
    };
    if !expired {
        return;
    }

    if auto_restart {
        log_action(LogCategory::Action, "container daemon unresponsive, restarting service");
        let result = ctx
            .runner
            .run("systemctl", &["restart", "docker"], RESTART_DEADLINE)
            .await;
        ctx.containers.invalidate();
        match result {
            Ok(output) if output.success() => {
                let message = "Container daemon restarted after watchdog timeout".to_string();
                ctx.events.append(EventLevel::Action, message.clone());
                ctx.notify_user(&message).await;
            }
            Ok(output) => {
                let message = format!(
                    "Container daemon restart failed: {}",
                    crate::format::truncate(output.stderr.trim(), 200)
                );
                ctx.events.append(EventLevel::Critical, message.clone());
                ctx.notify_user(&message).await;
            }
            Err(e) => {
                let message = format!("Container daemon restart failed: {e}");
                ctx.events.append(EventLevel::Critical, message.clone());
                ctx.notify_user(&message).await;
            }
        }
    } else {
        let message = "Container daemon looks unresponsive (no containers reported)".to_string();
        ctx.events.append(EventLevel::Warning, message.clone());
        ctx.notify_user(&message).await;
    }
}

/// Fire the weekly prune at most once within the configured hour
pub async fn maybe_prune(ctx: &Arc<AppContext>) {
    let prune = ctx.settings.read().prune.clone();
    if !prune.enabled {
        return;
    }

    let tz = ctx.config.read().tz();
    let local = Utc::now().with_timezone(&tz);
    if local.weekday() != prune.weekday() || local.hour() != prune.hour as u32 {
        return;
    }

    let slot = (local.date_naive(), local.hour());
    {
        let mut state = ctx.container_state.lock();
        if state.last_prune == Some(slot) {
            return;
        }
        state.last_prune = Some(slot);
    }

    log_action(LogCategory::Action, "running weekly container prune");
    match ctx
        .runner
        .run("docker", &["system", "prune", "-af"], PRUNE_DEADLINE)
        .await
    {
        Ok(output) if output.success() => {
            let message = "Weekly container prune completed".to_string();
            ctx.events.append(EventLevel::Action, message.clone());
            ctx.notify_user(&message).await;
        }
        Ok(output) => {
            let message = format!(
                "Weekly prune failed: {}",
                crate::format::truncate(output.stderr.trim(), 200)
            );
            ctx.events.append(EventLevel::Warning, message.clone());
            ctx.notify_user(&message).await;
        }
        Err(e) => {
            log_warn(LogCategory::Container, &format!("weekly prune failed: {e}"));
        }
    }
}
