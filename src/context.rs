//! # AppContext - Process-Scoped Shared State and Worker Lifecycle
//!
//! Everything mutable in the sentinel hangs off one [`AppContext`] created at
//! startup and threaded (as an `Arc`) through every worker; there are no
//! module-level globals and no re-initialisation during runtime. Each
//! sub-record carries its own lock, locks are never nested, and no outbound
//! I/O happens while any of them is held.
//!
//! The context also owns the worker lifecycle: [`AppContext::spawn_workers`]
//! starts every loop against the shared cancellation token, and
//! [`AppContext::shutdown`] cancels them and persists durable state exactly
//! once. Workers stamp [`AppContext::mark_tick`] so reports can show loop
//! health.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::{Notifier, OutboundMessage};
use crate::command_runner::CommandRunner;
use crate::config::{SentinelConfig, UserSettings};
use crate::containers::{AutoRestartLedger, ContainerCache, ObserverState};
use crate::events::EventLedger;
use crate::fs_watchdog::FsWatchdogState;
use crate::healthcheck::HealthcheckState;
use crate::logging::{log_error, log_info, log_warn, LogCategory};
use crate::monitor::MonitorState;
use crate::prediction::DiskUsageHistory;
use crate::report::{ReportState, Summarizer};
use crate::sampler::Snapshot;
use crate::state_store::{DurableState, StateStore};
use crate::stress::StressState;
use crate::Result;

/// Process-scoped context shared by every worker
pub struct AppContext {
    /// Configuration document (immutable identity, patchable sections)
    pub config: RwLock<SentinelConfig>,
    /// Operator settings overlay; wins over the document after first run
    pub settings: RwLock<UserSettings>,
    /// Most recent system sample; sampler-written, many readers
    pub snapshot: RwLock<Snapshot>,
    /// Bounded ring of classified events
    pub events: EventLedger,
    /// Monitor-scoped counters (critical cooldown, SMART, watchdogs)
    pub monitor: Mutex<MonitorState>,
    /// Per-resource stress records
    pub stress: Mutex<StressState>,
    /// TTL cache over the container runtime listing
    pub containers: ContainerCache,
    /// Container observer bookkeeping
    pub container_state: Mutex<ObserverState>,
    /// Auto-restart budget ledger; durable
    pub restart_ledger: Mutex<AutoRestartLedger>,
    /// Report bookkeeping; last_sent is durable
    pub report: Mutex<ReportState>,
    /// Healthcheck counters; durable
    pub health: Mutex<HealthcheckState>,
    /// Filesystem watchdog bookkeeping
    pub fs_state: Mutex<FsWatchdogState>,
    /// Deep-scan coalescing flag
    pub fs_scan_in_progress: AtomicBool,
    /// Free-space history for the fill-up forecast
    pub disk_history: Mutex<DiskUsageHistory>,
    /// Durable state persistence
    pub store: StateStore,
    /// External CLI seam
    pub runner: Arc<dyn CommandRunner>,
    /// Chat transport seam
    pub notifier: Arc<dyn Notifier>,
    /// Optional report summariser
    pub summarizer: Option<Arc<dyn Summarizer>>,
    /// Model fallback sequence for the summariser
    pub summarizer_models: Vec<String>,
    /// Root cancellation token; every loop selects on it
    pub cancel: CancellationToken,
    /// Process start for sentinel self-stats
    pub started_at: Instant,
    /// Last tick per worker, for loop-health reporting
    loop_ticks: DashMap<&'static str, Instant>,
    /// Shutdown persists exactly once
    shutdown_saved: AtomicBool,
}

impl AppContext {
    /// Build the context, loading durable state from `state_path`
    ///
    /// On first run (no state file) the operator settings are seeded from the
    /// configuration document; afterwards the durable overlay wins.
    pub fn new(
        config: SentinelConfig,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
        state_path: &str,
    ) -> Result<Arc<Self>> {
        Self::with_summarizer(config, runner, notifier, state_path, None, Vec::new())
    }

    /// Build the context with an attached summariser and model fallback list
    pub fn with_summarizer(
        config: SentinelConfig,
        runner: Arc<dyn CommandRunner>,
        notifier: Arc<dyn Notifier>,
        state_path: &str,
        summarizer: Option<Arc<dyn Summarizer>>,
        summarizer_models: Vec<String>,
    ) -> Result<Arc<Self>> {
        let store = StateStore::new(state_path);
        let first_run = !store.path().exists();
        let durable = store.load();

        let settings = if first_run {
            UserSettings::seed_from(&config)
        } else {
            durable.settings
        };

        let cache_ttl = std::time::Duration::from_secs(config.cache.docker_ttl_seconds.max(1));

        let ctx = Arc::new(Self {
            config: RwLock::new(config),
            settings: RwLock::new(settings),
            snapshot: RwLock::new(Snapshot::default()),
            events: EventLedger::default(),
            monitor: Mutex::new(MonitorState::new()),
            stress: Mutex::new(StressState::new()),
            containers: ContainerCache::new(cache_ttl),
            container_state: Mutex::new(ObserverState::new()),
            restart_ledger: Mutex::new(AutoRestartLedger::from_map(durable.auto_restarts)),
            report: Mutex::new(ReportState {
                last_sent: durable.last_report_sent,
            }),
            health: Mutex::new(durable.healthcheck),
            fs_state: Mutex::new(FsWatchdogState::new()),
            fs_scan_in_progress: AtomicBool::new(false),
            disk_history: Mutex::new(DiskUsageHistory::new()),
            store,
            runner,
            notifier,
            summarizer,
            summarizer_models,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
            loop_ticks: DashMap::new(),
            shutdown_saved: AtomicBool::new(false),
        });

        log_info(
            LogCategory::System,
            &format!(
                "context ready (first_run = {first_run}, last_report = {:?})",
                ctx.report.lock().last_sent
            ),
        );
        Ok(ctx)
    }

    /// True while the configured quiet window covers the local time
    pub fn is_quiet_now(&self) -> bool {
        let tz = self.config.read().tz();
        let quiet = self.settings.read().quiet_hours.clone();
        quiet.contains(Utc::now().with_timezone(&tz).time())
    }

    /// Best-effort user notification, suppressed during quiet hours
    ///
    /// Event-ledger appends are the caller's responsibility and must happen
    /// whether or not this sends.
    pub async fn notify_user(&self, text: &str) {
        if self.is_quiet_now() {
            return;
        }
        self.send_direct(text).await;
    }

    /// Best-effort send bypassing quiet hours (command replies, reports)
    pub async fn send_direct(&self, text: &str) {
        let chat_id = self.config.read().allowed_user_id;
        let message = OutboundMessage::text(chat_id, text);
        if let Err(e) = self.notifier.send(message).await {
            log_warn(LogCategory::System, &format!("chat send failed: {e}"));
        }
    }

    /// Persist the durable subset; failures are logged, the next mutation
    /// retries
    ///
    /// Each lock is taken and released in turn, never together.
    pub fn save_durable(&self) {
        let last_report_sent = self.report.lock().last_sent;
        let auto_restarts = self.restart_ledger.lock().as_map().clone();
        let healthcheck = self.health.lock().clone();
        let settings = self.settings.read().clone();
        let state = DurableState {
            version: 0, // stamped by the store
            last_report_sent,
            auto_restarts,
            healthcheck,
            settings,
        };
        if let Err(e) = self.store.save(&state) {
            log_error(LogCategory::System, &format!("state save failed: {e}"));
        }
    }

    /// Panic-path save: skips any record whose lock is unavailable instead of
    /// risking a deadlock on the panicking thread
    pub fn try_save_durable(&self) -> bool {
        let Some(last_report_sent) = self.report.try_lock().map(|report| report.last_sent) else {
            return false;
        };
        let Some(auto_restarts) = self
            .restart_ledger
            .try_lock()
            .map(|ledger| ledger.as_map().clone())
        else {
            return false;
        };
        let Some(healthcheck) = self.health.try_lock().map(|health| health.clone()) else {
            return false;
        };
        let Some(settings) = self.settings.try_read().map(|settings| settings.clone()) else {
            return false;
        };
        let state = DurableState {
            version: 0,
            last_report_sent,
            auto_restarts,
            healthcheck,
            settings,
        };
        self.store.save(&state).is_ok()
    }

    /// Stamp one worker's liveness
    pub fn mark_tick(&self, worker: &'static str) {
        self.loop_ticks.insert(worker, Instant::now());
    }

    /// Seconds since each worker last ticked
    pub fn loop_health(&self) -> Vec<(&'static str, u64)> {
        let mut health: Vec<(&'static str, u64)> = self
            .loop_ticks
            .iter()
            .map(|entry| (*entry.key(), entry.value().elapsed().as_secs()))
            .collect();
        health.sort_by_key(|(worker, _)| *worker);
        health
    }

    /// Start every worker loop; returns their join handles
    pub fn spawn_workers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(crate::sampler::run(self.clone())),
            tokio::spawn(crate::monitor::run(self.clone())),
            tokio::spawn(crate::fs_watchdog::run(self.clone())),
            tokio::spawn(crate::watchdogs::run_kernel(self.clone())),
            tokio::spawn(crate::watchdogs::run_network(self.clone())),
            tokio::spawn(crate::watchdogs::run_raid(self.clone())),
            tokio::spawn(crate::healthcheck::run(self.clone())),
            tokio::spawn(crate::report::run(self.clone())),
            tokio::spawn(crate::actuator::run(self.clone())),
        ]
    }

    /// Cancel every loop and persist durable state exactly once
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if self
            .shutdown_saved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.save_durable();
            log_info(LogCategory::System, "shutdown: durable state saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::BufferingNotifier;
    use crate::command_runner::ScriptedRunner;
    use tempfile::tempdir;

    fn test_config() -> SentinelConfig {
        SentinelConfig {
            bot_token: "token".to_string(),
            allowed_user_id: 99,
            ..SentinelConfig::default()
        }
    }

    fn build(
        dir: &std::path::Path,
        config: SentinelConfig,
    ) -> (Arc<AppContext>, Arc<BufferingNotifier>, Arc<ScriptedRunner>) {
        let notifier = Arc::new(BufferingNotifier::new());
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = AppContext::new(
            config,
            runner.clone(),
            notifier.clone(),
            dir.join("state.json").to_str().unwrap(),
        )
        .unwrap();
        (ctx, notifier, runner)
    }

    #[tokio::test]
    async fn notify_user_is_suppressed_by_quiet_hours() {
        let dir = tempdir().unwrap();
        let (ctx, notifier, _) = build(dir.path(), test_config());

        ctx.notify_user("loud").await;
        assert_eq!(notifier.sent_count(), 1);

        {
            let mut settings = ctx.settings.write();
            settings.quiet_hours.enabled = true;
            settings.quiet_hours.start_hour = 0;
            settings.quiet_hours.start_minute = 0;
            settings.quiet_hours.end_hour = 23;
            settings.quiet_hours.end_minute = 59;
        }
        ctx.notify_user("muted").await;
        assert_eq!(notifier.sent_count(), 1, "quiet hours must suppress sends");

        // direct sends bypass quiet hours
        ctx.send_direct("reply").await;
        assert_eq!(notifier.sent_count(), 2);
    }

    #[tokio::test]
    async fn durable_state_round_trips_across_contexts() {
        let dir = tempdir().unwrap();
        let (ctx, _, _) = build(dir.path(), test_config());

        let sent_at = Utc::now();
        ctx.report.lock().last_sent = Some(sent_at);
        ctx.restart_ledger.lock().record("plex", sent_at);
        ctx.settings.write().language = "it".to_string();
        ctx.shutdown().await;

        let (restarted, _, _) = build(dir.path(), test_config());
        assert_eq!(
            restarted.report.lock().last_sent.map(|t| t.timestamp()),
            Some(sent_at.timestamp())
        );
        assert_eq!(
            restarted.restart_ledger.lock().count_last_hour("plex", sent_at),
            1
        );
        assert_eq!(restarted.settings.read().language, "it");
    }

    #[tokio::test]
    async fn first_run_seeds_settings_from_config() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.docker.weekly_prune.enabled = true;
        config.docker.weekly_prune.day = "tuesday".to_string();
        let (ctx, _, _) = build(dir.path(), config);

        let settings = ctx.settings.read().clone();
        assert!(settings.prune.enabled);
        assert_eq!(settings.prune.day, "tuesday");
    }

    #[tokio::test]
    async fn shutdown_saves_only_once() {
        let dir = tempdir().unwrap();
        let (ctx, _, _) = build(dir.path(), test_config());
        ctx.shutdown().await;
        let modified = std::fs::metadata(dir.path().join("state.json"))
            .unwrap()
            .modified()
            .unwrap();
        ctx.shutdown().await;
        let modified_again = std::fs::metadata(dir.path().join("state.json"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(modified, modified_again);
    }

    #[tokio::test]
    async fn loop_health_reports_marked_workers() {
        let dir = tempdir().unwrap();
        let (ctx, _, _) = build(dir.path(), test_config());
        ctx.mark_tick("sampler");
        ctx.mark_tick("monitor");
        let health = ctx.loop_health();
        assert_eq!(health.len(), 2);
        assert_eq!(health[0].0, "monitor");
    }
}
