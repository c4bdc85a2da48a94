//! NAS Sentinel daemon entry point: load configuration, restore durable
//! state, start every worker, wait for SIGINT/SIGTERM, persist and exit.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use nas_sentinel::chat::NullNotifier;
use nas_sentinel::command_runner::SystemCommandRunner;
use nas_sentinel::config::SentinelConfig;
use nas_sentinel::context::AppContext;
use nas_sentinel::logging::{LoggingConfig, SentinelLogger};

#[derive(Parser, Debug)]
#[command(name = "nas-sentinel", version, about = "Single-host NAS sentinel daemon")]
struct Args {
    /// Path to the JSON configuration document
    #[arg(short, long, env = "NAS_SENTINEL_CONFIG", default_value = "/etc/nas-sentinel/config.json")]
    config: String,

    /// Path to the durable state file
    #[arg(long, env = "NAS_SENTINEL_STATE", default_value = "/var/lib/nas-sentinel/state.json")]
    state: String,

    /// Log directory
    #[arg(long, env = "NAS_SENTINEL_LOG_DIR", default_value = "/var/log/nas-sentinel")]
    log_dir: String,

    /// Log to the console as well as the file
    #[arg(long)]
    console: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _logger = SentinelLogger::with_config(LoggingConfig {
        console_enabled: args.console,
        log_dir: args.log_dir.clone(),
        ..LoggingConfig::default()
    })
    .context("logging initialisation failed")?;

    let config = SentinelConfig::load(&args.config)
        .with_context(|| format!("cannot load configuration from {}", args.config))?;

    info!(version = nas_sentinel::SENTINEL_VERSION, "nas-sentinel starting");

    let ctx = AppContext::new(
        config,
        Arc::new(SystemCommandRunner::new()),
        Arc::new(NullNotifier),
        &args.state,
    )
    .context("context construction failed")?;

    // a panic anywhere must not lose durable state: persist, then let the
    // default hook run (release builds abort, the supervisor restarts us)
    let hook_ctx = ctx.clone();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        hook_ctx.try_save_durable();
        default_hook(info);
    }));

    let handles = ctx.clone().spawn_workers();

    wait_for_signal().await;
    info!("shutdown signal received");

    ctx.shutdown().await;
    for handle in handles {
        if let Err(e) = handle.await {
            // a panicking worker must not block the shutdown path
            error!(error = %e, "worker ended abnormally");
        }
    }

    info!("nas-sentinel stopped");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
