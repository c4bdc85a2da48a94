//! Reporting and alerting scenarios: the deterministic renderer, report
//! bookkeeping across restarts, quiet hours semantics, the batched critical
//! alert cooldown and the configuration patch surface.

use std::sync::Arc;

use nas_sentinel::chat::{self, BufferingNotifier, CallbackIntent, CommandIntent};
use nas_sentinel::command_runner::ScriptedRunner;
use nas_sentinel::config::SentinelConfig;
use nas_sentinel::context::AppContext;
use nas_sentinel::events::EventLevel;
use nas_sentinel::monitor;
use nas_sentinel::report;
use nas_sentinel::sampler::{Snapshot, VolumeUsage};
use nas_sentinel::stress::{self, StressResource};

const PS_LINE: &str = "docker ps -a --format {{.Names}}\t{{.Image}}\t{{.ID}}\t{{.Status}}";

fn base_config() -> SentinelConfig {
    SentinelConfig {
        bot_token: "test-token".to_string(),
        allowed_user_id: 7,
        ..SentinelConfig::default()
    }
}

struct Harness {
    ctx: Arc<AppContext>,
    notifier: Arc<BufferingNotifier>,
    runner: Arc<ScriptedRunner>,
    dir: tempfile::TempDir,
}

fn harness(config: SentinelConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(BufferingNotifier::new());
    let runner = Arc::new(ScriptedRunner::new());
    let ctx = AppContext::new(
        config,
        runner.clone(),
        notifier.clone(),
        dir.path().join("state.json").to_str().unwrap(),
    )
    .unwrap();
    Harness {
        ctx,
        notifier,
        runner,
        dir,
    }
}

fn ready_snapshot() -> Snapshot {
    let mut snapshot = Snapshot {
        ready: true,
        cpu_percent: 12.0,
        ram_percent: 35.0,
        ram_free_mib: 8000,
        ram_total_mib: 16000,
        uptime_seconds: 3600,
        ..Snapshot::default()
    };
    snapshot.volumes.insert(
        "ssd".into(),
        VolumeUsage {
            used_percent: 40.0,
            free_bytes: 50 * 1024 * 1024 * 1024,
            total_bytes: 100 * 1024 * 1024 * 1024,
        },
    );
    snapshot.volumes.insert(
        "hdd".into(),
        VolumeUsage {
            used_percent: 60.0,
            free_bytes: 100 * 1024 * 1024 * 1024,
            total_bytes: 500 * 1024 * 1024 * 1024,
        },
    );
    snapshot
}

fn enable_all_day_quiet(ctx: &Arc<AppContext>) {
    let mut settings = ctx.settings.write();
    settings.quiet_hours.enabled = true;
    settings.quiet_hours.start_hour = 0;
    settings.quiet_hours.start_minute = 0;
    settings.quiet_hours.end_hour = 23;
    settings.quiet_hours.end_minute = 59;
}

#[tokio::test]
async fn manual_report_is_complete_without_external_dependencies() {
    let h = harness(base_config());
    *h.ctx.snapshot.write() = ready_snapshot();
    h.ctx.events.append(EventLevel::Warning, "CPU warning: 85.0% (threshold 80%)");
    h.runner.script_ok(PS_LINE, "plex\timg\t1\tUp 2 days\ndb\timg\t2\tExited (0)\n");

    report::send_manual_report(&h.ctx).await;

    let sent = h.notifier.sent_texts();
    assert_eq!(sent.len(), 1);
    let text = &sent[0];
    assert!(text.contains("System report"), "header present: {text}");
    assert!(text.contains("CPU 12.0%"));
    assert!(text.contains("SSD 40.0% used"));
    assert!(text.contains("CPU warning: 85.0%"));
    assert!(text.contains("Containers: 1/2 running"));

    // the send updated and persisted last_sent
    assert!(h.ctx.report.lock().last_sent.is_some());
    let raw = std::fs::read_to_string(h.dir.path().join("state.json")).unwrap();
    assert!(raw.contains("last_report_sent"));
}

#[tokio::test]
async fn report_resets_stress_counters_and_prunes_old_events() {
    let h = harness(base_config());
    *h.ctx.snapshot.write() = ready_snapshot();

    // a closed stress interval and a stale event
    {
        let mut stress = h.ctx.stress.lock();
        let t0 = chrono::Utc::now() - chrono::Duration::minutes(30);
        stress.update(StressResource::Cpu, 95.0, 80.0, chrono::Duration::minutes(10), t0);
        stress.update(
            StressResource::Cpu,
            10.0,
            80.0,
            chrono::Duration::minutes(10),
            t0 + chrono::Duration::minutes(20),
        );
    }
    h.ctx.events.append_at(
        chrono::Utc::now() - chrono::Duration::hours(30),
        EventLevel::Info,
        "ancient event",
    );

    report::send_manual_report(&h.ctx).await;

    let summary = h.ctx.stress.lock().summary();
    assert!(summary.iter().all(|(_, record)| record.stress_count == 0));
    assert!(h
        .ctx
        .events
        .snapshot()
        .iter()
        .all(|event| event.message != "ancient event"));
}

#[tokio::test]
async fn quiet_hours_suppress_sends_but_never_ledger_appends() {
    let mut config = base_config();
    config.notifications.smart.enabled = false;
    config.temperature.enabled = false;
    let h = harness(config);
    enable_all_day_quiet(&h.ctx);

    let mut snapshot = ready_snapshot();
    snapshot.cpu_percent = 99.0; // above the default 95% critical
    *h.ctx.snapshot.write() = snapshot;

    monitor::check_once(&h.ctx).await;

    let criticals: Vec<_> = h
        .ctx
        .events
        .snapshot()
        .into_iter()
        .filter(|event| event.level == EventLevel::Critical)
        .collect();
    assert_eq!(criticals.len(), 1, "the crossing must reach the ledger");
    assert_eq!(h.notifier.sent_count(), 0, "quiet hours must mute the alert");
}

#[tokio::test]
async fn sustained_stress_during_quiet_hours_still_reaches_the_ledger() {
    let mut config = base_config();
    config.stress_tracking.duration_threshold_minutes = 0;
    let h = harness(config);
    enable_all_day_quiet(&h.ctx);

    let mut snapshot = ready_snapshot();
    snapshot.cpu_percent = 99.0; // above the default 80% warning
    *h.ctx.snapshot.write() = snapshot;

    stress::tick(&h.ctx).await; // opens the stress interval
    stress::tick(&h.ctx).await; // sustained while quiet

    let warnings: Vec<_> = h
        .ctx
        .events
        .snapshot()
        .into_iter()
        .filter(|event| event.level == EventLevel::Warning)
        .collect();
    assert_eq!(warnings.len(), 1, "the episode must be recorded once");
    assert!(warnings[0].message.contains("CPU under stress"));
    assert_eq!(h.notifier.sent_count(), 0, "quiet hours mute the send only");

    // marked notified: further quiet ticks must not re-append the episode
    stress::tick(&h.ctx).await;
    let warning_count = h
        .ctx
        .events
        .snapshot()
        .into_iter()
        .filter(|event| event.level == EventLevel::Warning)
        .count();
    assert_eq!(warning_count, 1);
}

#[tokio::test]
async fn critical_batch_obeys_cooldown_across_ticks() {
    let mut config = base_config();
    config.notifications.smart.enabled = false;
    config.temperature.enabled = false;
    let h = harness(config);

    let mut snapshot = ready_snapshot();
    snapshot.cpu_percent = 99.0;
    snapshot.ram_percent = 99.0;
    *h.ctx.snapshot.write() = snapshot;

    monitor::check_once(&h.ctx).await;
    assert_eq!(h.notifier.sent_count(), 1, "one batched message");
    assert!(h.notifier.sent_texts()[0].contains("CPU critical"));
    assert!(h.notifier.sent_texts()[0].contains("RAM critical"));

    // immediately after: still critical, but inside the cooldown
    monitor::check_once(&h.ctx).await;
    assert_eq!(h.notifier.sent_count(), 1, "cooldown must hold");
}

#[tokio::test]
async fn last_sent_survives_restart_and_blocks_refire() {
    let h = harness(base_config());
    *h.ctx.snapshot.write() = ready_snapshot();
    report::send_manual_report(&h.ctx).await;
    let sent_at = h.ctx.report.lock().last_sent.unwrap();
    h.ctx.shutdown().await;

    // a new context over the same state file sees the same last_sent
    let notifier = Arc::new(BufferingNotifier::new());
    let runner = Arc::new(ScriptedRunner::new());
    let restarted = AppContext::new(
        base_config(),
        runner,
        notifier,
        h.dir.path().join("state.json").to_str().unwrap(),
    )
    .unwrap();
    let reloaded = restarted.report.lock().last_sent.unwrap();
    assert_eq!(reloaded.timestamp(), sent_at.timestamp());
}

#[tokio::test]
async fn status_and_events_commands_answer_directly() {
    let h = harness(base_config());
    *h.ctx.snapshot.write() = ready_snapshot();
    h.ctx.events.append(EventLevel::Info, "something happened");

    chat::handle_command(
        &h.ctx,
        CommandIntent {
            name: "status".to_string(),
            args: vec![],
            chat_id: 7,
        },
    )
    .await;
    chat::handle_command(
        &h.ctx,
        CommandIntent {
            name: "events".to_string(),
            args: vec![],
            chat_id: 7,
        },
    )
    .await;

    let sent = h.notifier.sent_texts();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].contains("System status"));
    assert!(sent[1].contains("something happened"));
}

#[tokio::test]
async fn command_replies_bypass_quiet_hours() {
    let h = harness(base_config());
    *h.ctx.snapshot.write() = ready_snapshot();
    enable_all_day_quiet(&h.ctx);

    chat::handle_command(
        &h.ctx,
        CommandIntent {
            name: "status".to_string(),
            args: vec![],
            chat_id: 7,
        },
    )
    .await;
    assert_eq!(h.notifier.sent_count(), 1, "the operator asked, answer them");
}

#[tokio::test]
async fn callbacks_from_wrong_user_are_rejected() {
    let h = harness(base_config());
    let before = h.ctx.settings.read().quiet_hours.enabled;

    chat::handle_callback(
        &h.ctx,
        CallbackIntent {
            data: "quiet:toggle".to_string(),
            chat_id: 7,
            message_id: 1,
            user_id: 1234, // not the allowed operator
        },
    )
    .await;

    assert_eq!(h.ctx.settings.read().quiet_hours.enabled, before);
    assert_eq!(h.notifier.edits_count(), 0);

    chat::handle_callback(
        &h.ctx,
        CallbackIntent {
            data: "quiet:toggle".to_string(),
            chat_id: 7,
            message_id: 1,
            user_id: 7,
        },
    )
    .await;
    assert_ne!(h.ctx.settings.read().quiet_hours.enabled, before);
    assert_eq!(h.notifier.edits_count(), 1);
}

#[tokio::test]
async fn config_patch_round_trip_over_the_context() {
    let h = harness(base_config());
    let patch = serde_json::json!({
        "bot_token": "stolen",
        "quiet_hours": {
            "enabled": true,
            "start_hour": 7, "start_minute": 0,
            "end_hour": 7, "end_minute": 0
        },
        "notifications": {"cpu": {"warning_threshold": 90.0, "critical_threshold": 50.0}}
    });

    let outcome = h.ctx.config.write().apply_patch(&patch).unwrap();
    assert!(outcome.ignored.contains(&"bot_token".to_string()));
    assert!(outcome.corrected.iter().any(|f| f == "quiet_hours.enabled"));

    let config = h.ctx.config.read().clone();
    assert_eq!(config.bot_token, "test-token");
    assert!(!config.quiet_hours.enabled);
    assert_eq!(config.notifications.cpu.critical_threshold, 90.0);
}
