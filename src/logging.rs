//! # Structured Logging - Category-Tagged Tracing
//!
//! Production logging for the sentinel built on `tracing`: console and
//! rolling-file layers (JSON or pretty), environment-filter overrides, a
//! category taxonomy matching the worker loops, and a bounded audit buffer
//! for corrective actions. Initialisation is guarded so tests and embedders
//! can call it any number of times.
//!
//! Every worker logs through the category helpers so operators can filter a
//! single subsystem (`RUST_LOG=nas_sentinel=debug`) and the audit trail of
//! autonomous actions stays queryable after the fact.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{Result, SentinelError};

/// Global flag to track if tracing has been initialized
static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Global logger instance with safe initialization
pub static LOGGER: Lazy<Arc<SentinelLogger>> = Lazy::new(|| {
    let config = LoggingConfig {
        console_enabled: false, // quiet by default when embedded
        file_enabled: true,
        ..LoggingConfig::default()
    };

    match SentinelLogger::with_config(config) {
        Ok(logger) => Arc::new(logger),
        Err(_) => Arc::new(SentinelLogger::new_minimal()),
    }
});

/// Log categories matching the sentinel's worker loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogCategory {
    /// Startup, shutdown, configuration
    System,
    /// Snapshot production
    Sampler,
    /// Threshold evaluation and alerting
    Monitor,
    /// Sustained-pressure tracking
    Stress,
    /// Container runtime supervision
    Container,
    /// Filesystem probes and deep scans
    Filesystem,
    /// Kernel ring buffer watchdog
    Kernel,
    /// Network reachability watchdog
    Network,
    /// RAID health watchdog
    Raid,
    /// Outward healthcheck pings
    Healthcheck,
    /// Report scheduling and rendering
    Report,
    /// Autonomous corrective actions
    Action,
    /// Audit trail events
    Audit,
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogCategory::System => "system",
            LogCategory::Sampler => "sampler",
            LogCategory::Monitor => "monitor",
            LogCategory::Stress => "stress",
            LogCategory::Container => "container",
            LogCategory::Filesystem => "filesystem",
            LogCategory::Kernel => "kernel",
            LogCategory::Network => "network",
            LogCategory::Raid => "raid",
            LogCategory::Healthcheck => "healthcheck",
            LogCategory::Report => "report",
            LogCategory::Action => "action",
            LogCategory::Audit => "audit",
        };
        write!(f, "{name}")
    }
}

/// Log file rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRotation {
    Never,
    Hourly,
    Daily,
}

/// Configuration for sentinel logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level when RUST_LOG is unset
    pub min_level: String,
    /// Enable console output
    pub console_enabled: bool,
    /// Enable file logging
    pub file_enabled: bool,
    /// Log file directory
    pub log_dir: String,
    /// Log file rotation
    pub rotation: LogRotation,
    /// Enable structured JSON logging
    pub json_format: bool,
    /// Keep an in-memory audit trail of Action/Audit entries
    pub audit_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            min_level: "info".to_string(),
            console_enabled: true,
            file_enabled: true,
            log_dir: "./logs".to_string(),
            rotation: LogRotation::Daily,
            json_format: true,
            audit_enabled: true,
        }
    }
}

/// One audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub category: LogCategory,
    pub message: String,
}

/// Sentinel logging system
pub struct SentinelLogger {
    config: LoggingConfig,
    /// Entry counters by category
    category_counters: Arc<DashMap<LogCategory, u64>>,
    /// Bounded audit trail of corrective actions
    audit_buffer: Arc<RwLock<Vec<AuditEntry>>>,
}

const AUDIT_CAP: usize = 1000;

impl SentinelLogger {
    pub fn new() -> Result<Self> {
        Self::with_config(LoggingConfig::default())
    }

    /// Create a minimal logger that doesn't initialize tracing (for fallback)
    pub fn new_minimal() -> Self {
        Self {
            config: LoggingConfig {
                console_enabled: false,
                file_enabled: false,
                ..LoggingConfig::default()
            },
            category_counters: Arc::new(DashMap::new()),
            audit_buffer: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create logger with custom configuration
    pub fn with_config(config: LoggingConfig) -> Result<Self> {
        if config.file_enabled {
            fs::create_dir_all(&config.log_dir).map_err(|e| {
                SentinelError::Config(format!("failed to create log directory: {e}"))
            })?;
        }

        Self::init_tracing(&config)?;

        Ok(Self {
            config,
            category_counters: Arc::new(DashMap::new()),
            audit_buffer: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Initialize tracing subscriber (thread-safe, can be called multiple times)
    fn init_tracing(config: &LoggingConfig) -> Result<()> {
        if TRACING_INITIALIZED
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return Ok(());
        }

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.min_level.clone()));

        let mut layers = Vec::new();

        if config.console_enabled {
            let console_layer = fmt::layer().with_target(true);
            if config.json_format {
                layers.push(console_layer.json().boxed());
            } else {
                layers.push(console_layer.pretty().boxed());
            }
        }

        if config.file_enabled {
            let file_appender = match config.rotation {
                LogRotation::Daily => rolling::daily(&config.log_dir, "sentinel.log"),
                LogRotation::Hourly => rolling::hourly(&config.log_dir, "sentinel.log"),
                LogRotation::Never => rolling::never(&config.log_dir, "sentinel.log"),
            };
            let (non_blocking, guard) = non_blocking(file_appender);
            // the guard must live for the process lifetime or buffered lines
            // are lost on exit
            std::mem::forget(guard);
            let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            if config.json_format {
                layers.push(file_layer.json().boxed());
            } else {
                layers.push(file_layer.boxed());
            }
        }

        match tracing_subscriber::registry()
            .with(env_filter)
            .with(layers)
            .try_init()
        {
            Ok(()) => Ok(()),
            Err(_) => {
                // another subscriber won the race (tests); not an error
                TRACING_INITIALIZED.store(false, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    fn bump(&self, category: LogCategory) {
        *self.category_counters.entry(category).or_insert(0) += 1;
    }

    /// Record an entry in the bounded audit trail
    pub fn audit(&self, category: LogCategory, message: &str) {
        if !self.config.audit_enabled {
            return;
        }
        let mut buffer = self.audit_buffer.write();
        buffer.push(AuditEntry {
            timestamp: chrono::Utc::now(),
            category,
            message: message.to_string(),
        });
        if buffer.len() > AUDIT_CAP {
            let drop = buffer.len() - AUDIT_CAP;
            buffer.drain(0..drop);
        }
    }

    /// Copy of the audit trail, oldest first
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.audit_buffer.read().clone()
    }

    /// Entry counts per category
    pub fn category_counts(&self) -> Vec<(LogCategory, u64)> {
        self.category_counters
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }
}

/// Log an informational message with a category tag
pub fn log_info(category: LogCategory, message: &str) {
    LOGGER.bump(category);
    info!(category = %category, "{message}");
}

/// Log a warning with a category tag
pub fn log_warn(category: LogCategory, message: &str) {
    LOGGER.bump(category);
    warn!(category = %category, "{message}");
}

/// Log an error with a category tag
pub fn log_error(category: LogCategory, message: &str) {
    LOGGER.bump(category);
    error!(category = %category, "{message}");
}

/// Log a corrective action: error-level visibility plus the audit trail
pub fn log_action(category: LogCategory, message: &str) {
    LOGGER.bump(category);
    LOGGER.audit(category, message);
    warn!(category = %category, action = true, "{message}");
}
