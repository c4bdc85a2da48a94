//! # Chat Glue - Intents, Outbound Messages and Menus
//!
//! The chat transport itself (long-polling, webhooks, message ids) lives in
//! an external adapter. This module defines the typed boundary: the adapter
//! hands the core [`CommandIntent`]s and [`CallbackIntent`]s, the core hands
//! back [`OutboundMessage`]s and [`EditMessage`]s through the [`Notifier`]
//! seam. The adapter enforces that only the allowed operator produces
//! intents; the core still defensively rejects callbacks whose user id does
//! not match.
//!
//! Command parsing is deliberately forgiving: unknown input yields a help
//! hint, never an error, and `/restart plex` style arguments are split off
//! the command word.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::containers;
use crate::context::AppContext;
use crate::format::{format_bytes, format_duration, format_percent, progress_bar};
use crate::logging::{log_info, log_warn, LogCategory};
use crate::report;
use crate::Result;

/// One inline keyboard button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Inline keyboard rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMarkup {
    pub rows: Vec<Vec<Button>>,
}

/// Message from the core to the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
    pub parse_mode: Option<String>,
    pub reply_markup: Option<ReplyMarkup>,
}

impl OutboundMessage {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: None,
            reply_markup: None,
        }
    }
}

/// In-place edit of a previously sent message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub parse_mode: Option<String>,
    pub reply_markup: Option<ReplyMarkup>,
}

/// Parsed slash command from the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandIntent {
    pub name: String,
    pub args: Vec<String>,
    pub chat_id: i64,
}

/// Button press from the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackIntent {
    pub data: String,
    pub chat_id: i64,
    pub message_id: i64,
    pub user_id: i64,
}

/// Transport seam implemented by the chat adapter
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
    async fn edit(&self, message: EditMessage) -> Result<()>;
}

/// Notifier that drops everything; headless operation and examples
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _message: OutboundMessage) -> Result<()> {
        Ok(())
    }

    async fn edit(&self, _message: EditMessage) -> Result<()> {
        Ok(())
    }
}

/// Notifier that records everything; the test double
#[derive(Default)]
pub struct BufferingNotifier {
    sent: Mutex<Vec<OutboundMessage>>,
    edits: Mutex<Vec<EditMessage>>,
}

impl BufferingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.text.clone()).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn edits_count(&self) -> usize {
        self.edits.lock().len()
    }
}

#[async_trait]
impl Notifier for BufferingNotifier {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }

    async fn edit(&self, message: EditMessage) -> Result<()> {
        self.edits.lock().push(message);
        Ok(())
    }
}

/// Fixed strings the renderer needs in the operator's language
///
/// The built-in table covers english and italian; unknown languages fall
/// back to english. The full dictionary stays in the external adapter.
pub fn tr(lang: &str, key: &str) -> &'static str {
    match (lang, key) {
        ("it", "report_title") => "📋 Rapporto di sistema",
        ("it", "status_title") => "📊 Stato del sistema",
        ("it", "containers_title") => "📦 Container",
        ("it", "events_title") => "🗒 Eventi recenti",
        ("it", "no_events") => "Nessun evento registrato",
        ("it", "quiet_on") => "Ore silenziose attivate",
        ("it", "quiet_off") => "Ore silenziose disattivate",
        ("it", "help") => {
            "Comandi: /status /report /containers /restart <nome> /events /scan /quiet on|off /settings /help"
        }
        (_, "report_title") => "📋 System report",
        (_, "status_title") => "📊 System status",
        (_, "containers_title") => "📦 Containers",
        (_, "events_title") => "🗒 Recent events",
        (_, "no_events") => "No events recorded",
        (_, "quiet_on") => "Quiet hours enabled",
        (_, "quiet_off") => "Quiet hours disabled",
        (_, "help") => {
            "Commands: /status /report /containers /restart <name> /events /scan /quiet on|off /settings /help"
        }
        _ => "",
    }
}

/// Recognised operator commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Report,
    Containers,
    Restart(String),
    Events,
    Scan,
    QuietOn,
    QuietOff,
    Settings,
    Help,
    Unknown(String),
}

/// Parse raw chat input into a command
///
/// Tolerates a `@botname` suffix on the command word and extra whitespace.
pub fn parse_command(text: &str) -> Command {
    let mut words = text.split_whitespace();
    let Some(head) = words.next() else {
        return Command::Unknown(String::new());
    };
    let name = head
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    match (name.as_str(), args.as_slice()) {
        ("status", _) => Command::Status,
        ("report", _) => Command::Report,
        ("containers", _) => Command::Containers,
        ("restart", [name, ..]) => Command::Restart((*name).to_string()),
        ("events", _) => Command::Events,
        ("scan", _) => Command::Scan,
        ("quiet", ["on", ..]) => Command::QuietOn,
        ("quiet", ["off", ..]) => Command::QuietOff,
        ("settings", _) => Command::Settings,
        ("help", _) => Command::Help,
        _ => Command::Unknown(name),
    }
}

/// Render the live status message
pub async fn status_text(ctx: &Arc<AppContext>) -> String {
    let snapshot = ctx.snapshot.read().clone();
    let lang = ctx.settings.read().language.clone();
    let mut out = format!("{}\n", tr(&lang, "status_title"));

    if !snapshot.ready {
        out.push_str("Collecting first sample…");
        return out;
    }

    out.push_str(&format!(
        "CPU  {} {}\n",
        progress_bar(snapshot.cpu_percent, 10),
        format_percent(snapshot.cpu_percent)
    ));
    out.push_str(&format!(
        "RAM  {} {} ({} free)\n",
        progress_bar(snapshot.ram_percent, 10),
        format_percent(snapshot.ram_percent),
        format_bytes(snapshot.ram_free_mib * 1024 * 1024)
    ));
    out.push_str(&format!(
        "Swap {} {}\n",
        progress_bar(snapshot.swap_percent, 10),
        format_percent(snapshot.swap_percent)
    ));
    for (label, volume) in &snapshot.volumes {
        out.push_str(&format!(
            "{}  {} {} ({} free)\n",
            label.to_uppercase(),
            progress_bar(volume.used_percent, 10),
            format_percent(volume.used_percent),
            format_bytes(volume.free_bytes)
        ));
    }
    out.push_str(&format!(
        "Load {:.2} / {:.2} / {:.2}\n",
        snapshot.load_1, snapshot.load_5, snapshot.load_15
    ));
    out.push_str(&format!(
        "I/O  read {:.1} MB/s, write {:.1} MB/s, util {}\n",
        snapshot.read_mbps,
        snapshot.write_mbps,
        format_percent(snapshot.max_disk_util_percent)
    ));
    out.push_str(&format!(
        "Up   {}",
        format_duration(std::time::Duration::from_secs(snapshot.uptime_seconds))
    ));

    let predictions = ctx.disk_history.lock().predictions();
    for (volume, prediction) in predictions {
        if prediction.is_meaningful() {
            out.push_str(&format!(
                "\n{}: full in ~{:.0} days ({:.1} GB/day)",
                volume.to_uppercase(),
                prediction.days_until_full,
                prediction.gb_per_day
            ));
        }
    }
    out
}

/// Render the container listing
pub async fn containers_text(ctx: &Arc<AppContext>) -> String {
    let lang = ctx.settings.read().language.clone();
    let mut out = format!("{}\n", tr(&lang, "containers_title"));
    match ctx.containers.list(&ctx.runner).await {
        Ok(list) if list.is_empty() => out.push_str("(none)"),
        Ok(list) => {
            for container in list {
                let glyph = if container.running { "🟢" } else { "🔴" };
                out.push_str(&format!("{glyph} {} — {}\n", container.name, container.status));
            }
        }
        Err(e) => out.push_str(&format!("runtime unavailable: {e}")),
    }
    out.trim_end().to_string()
}

/// Render the recent tail of the event ledger
pub fn events_text(ctx: &Arc<AppContext>) -> String {
    let lang = ctx.settings.read().language.clone();
    let events = ctx.events.snapshot();
    if events.is_empty() {
        return tr(&lang, "no_events").to_string();
    }
    let mut out = format!("{}\n", tr(&lang, "events_title"));
    for event in events.iter().rev().take(15).rev() {
        out.push_str(&format!(
            "{} {} {}\n",
            event.timestamp.format("%H:%M"),
            event.level.glyph(),
            event.message
        ));
    }
    out.trim_end().to_string()
}

/// Settings menu text plus its inline keyboard
pub fn settings_menu(ctx: &Arc<AppContext>) -> (String, ReplyMarkup) {
    let settings = ctx.settings.read().clone();
    let quiet = if settings.quiet_hours.enabled { "on" } else { "off" };
    let mode = match settings.report.mode {
        crate::config::REPORT_MODE_OFF => "off",
        crate::config::REPORT_MODE_MORNING => "morning",
        _ => "morning + evening",
    };
    let prune = if settings.prune.enabled { "on" } else { "off" };

    let text = format!(
        "⚙️ Settings\nReports: {mode} ({:02}:{:02} / {:02}:{:02})\nQuiet hours: {quiet}\nWeekly prune: {prune} ({} {:02}:00)\nLanguage: {}",
        settings.report.morning.hour,
        settings.report.morning.minute,
        settings.report.evening.hour,
        settings.report.evening.minute,
        settings.prune.day,
        settings.prune.hour,
        settings.language,
    );

    let markup = ReplyMarkup {
        rows: vec![
            vec![
                Button::new("Reports: off", "report_mode:0"),
                Button::new("morning", "report_mode:1"),
                Button::new("twice", "report_mode:2"),
            ],
            vec![
                Button::new("Toggle quiet hours", "quiet:toggle"),
                Button::new("Toggle prune", "prune:toggle"),
            ],
            vec![
                Button::new("English", "lang:en"),
                Button::new("Italiano", "lang:it"),
            ],
        ],
    };
    (text, markup)
}

/// Handle one operator command end to end
pub async fn handle_command(ctx: &Arc<AppContext>, intent: CommandIntent) {
    let command = parse_command(&format!("/{} {}", intent.name, intent.args.join(" ")));
    log_info(LogCategory::System, &format!("command received: {command:?}"));

    let lang = ctx.settings.read().language.clone();
    match command {
        Command::Status => {
            let text = status_text(ctx).await;
            ctx.send_direct(&text).await;
        }
        Command::Report => {
            report::send_manual_report(ctx).await;
        }
        Command::Containers => {
            let text = containers_text(ctx).await;
            ctx.send_direct(&text).await;
        }
        Command::Restart(name) => match containers::manual_restart(ctx, &name).await {
            Ok(message) => ctx.send_direct(&message).await,
            Err(e) => ctx.send_direct(&format!("❌ {e}")).await,
        },
        Command::Events => {
            let text = events_text(ctx);
            ctx.send_direct(&text).await;
        }
        Command::Scan => {
            let root = ctx.config.read().paths.hdd.clone();
            if crate::fs_watchdog::trigger_deep_scan(ctx, root) {
                ctx.send_direct("🔍 Deep scan started").await;
            } else {
                ctx.send_direct("🔍 A deep scan is already running").await;
            }
        }
        Command::QuietOn => {
            {
                let mut settings = ctx.settings.write();
                settings.quiet_hours.enabled = true;
            }
            ctx.save_durable();
            ctx.send_direct(tr(&lang, "quiet_on")).await;
        }
        Command::QuietOff => {
            {
                let mut settings = ctx.settings.write();
                settings.quiet_hours.enabled = false;
            }
            ctx.save_durable();
            ctx.send_direct(tr(&lang, "quiet_off")).await;
        }
        Command::Settings => {
            let (text, markup) = settings_menu(ctx);
            let message = OutboundMessage {
                chat_id: intent.chat_id,
                text,
                parse_mode: None,
                reply_markup: Some(markup),
            };
            if let Err(e) = ctx.notifier.send(message).await {
                log_warn(LogCategory::System, &format!("settings menu send failed: {e}"));
            }
        }
        Command::Help | Command::Unknown(_) => {
            ctx.send_direct(tr(&lang, "help")).await;
        }
    }
}

/// Handle one callback press, defensively checking the user id
pub async fn handle_callback(ctx: &Arc<AppContext>, intent: CallbackIntent) {
    let allowed = ctx.config.read().allowed_user_id;
    if intent.user_id != allowed {
        log_warn(
            LogCategory::Audit,
            &format!("callback from unexpected user {} rejected", intent.user_id),
        );
        return;
    }

    let mut changed = true;
    match intent.data.split_once(':') {
        Some(("report_mode", mode)) => {
            let mode: u8 = mode.parse().unwrap_or(crate::config::REPORT_MODE_TWICE);
            ctx.settings.write().report.mode = mode.min(crate::config::REPORT_MODE_TWICE);
        }
        Some(("quiet", "toggle")) => {
            let mut settings = ctx.settings.write();
            settings.quiet_hours.enabled = !settings.quiet_hours.enabled;
        }
        Some(("prune", "toggle")) => {
            let mut settings = ctx.settings.write();
            settings.prune.enabled = !settings.prune.enabled;
        }
        Some(("lang", lang)) => {
            ctx.settings.write().language = lang.to_string();
        }
        _ => changed = false,
    }

    if changed {
        ctx.save_durable();
        let (text, markup) = settings_menu(ctx);
        let edit = EditMessage {
            chat_id: intent.chat_id,
            message_id: intent.message_id,
            text,
            parse_mode: None,
            reply_markup: Some(markup),
        };
        if let Err(e) = ctx.notifier.edit(edit).await {
            log_warn(LogCategory::System, &format!("menu edit failed: {e}"));
        }
    }
}
