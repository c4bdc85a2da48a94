//! # NAS Sentinel
//!
//! A production-ready single-host NAS/server sentinel: a long-running daemon
//! that continuously samples machine health, supervises a local container
//! runtime, aggregates notable events, and delivers both streaming alerts and
//! periodic narrative reports over a chat transport. Bounded autonomous
//! corrective actions (container restart on RAM pressure, container-daemon
//! restart, forced reboot on prolonged outage) are built in and rate-limited.
//!
//! ## 🏗️ Architecture Overview
//!
//! The sentinel is a set of cooperating long-lived workers sharing one
//! process-scoped [`context::AppContext`]:
//!
//! - **Sampler** (5 s): sole writer of the [`sampler::Snapshot`]; CPU, RAM,
//!   swap, load, uptime, per-volume usage, block-device I/O deltas, top-N
//!   processes. Readers never observe a partial update.
//! - **Threshold monitor** (30 s): evaluates the snapshot against configured
//!   warning/critical thresholds, batches criticals into one cooled-down
//!   notification, records every crossing in the event ledger.
//! - **Stress tracker** (10 s): duration-weighted resource pressure with a
//!   "significant stress" filter; notifies once a threshold is sustained.
//! - **Container observer + actuator**: TTL-cached runtime listing, up/down
//!   transition events, critical-container alerts, RAM-critical auto-restart
//!   under a per-hour budget, daemon watchdog, weekly prune.
//! - **Filesystem watchdog**: O(1) statvfs probes; a bounded deep scan runs
//!   only above the critical threshold, coalescing concurrent triggers.
//! - **Kernel / Network / RAID watchdogs**: classified pattern detectors with
//!   signature de-duplication and cooldown; the network watchdog escalates to
//!   a forced reboot after a sustained outage, the kernel watchdog after an
//!   OOM loop.
//! - **Healthcheck pinger**: periodic outward HTTP ping with a bounded
//!   downtime-event ledger.
//! - **Report scheduler + renderer**: timezone-aware morning/evening slots
//!   with a grace window and durable double-fire protection; deterministic
//!   renderer with a best-effort external summariser on top.
//!
//! ## 🔒 Concurrency Discipline
//!
//! Every mutable record hangs off the `AppContext` and carries its own lock.
//! Locks are never nested and never held across outbound I/O: workers take a
//! lock, copy what they need, release, then emit. All workers tick on
//! monotonic intervals and shut down promptly when the root cancellation
//! token fires; the shutdown hook persists durable state exactly once.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nas_sentinel::chat::NullNotifier;
//! use nas_sentinel::command_runner::SystemCommandRunner;
//! use nas_sentinel::config::SentinelConfig;
//! use nas_sentinel::context::AppContext;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SentinelConfig::load("/etc/nas-sentinel/config.json")?;
//!     let ctx = AppContext::new(
//!         config,
//!         Arc::new(SystemCommandRunner::new()),
//!         Arc::new(NullNotifier),
//!         "/var/lib/nas-sentinel/state.json",
//!     )?;
//!     let handles = ctx.clone().spawn_workers();
//!     tokio::signal::ctrl_c().await?;
//!     ctx.shutdown().await;
//!     for handle in handles {
//!         let _ = handle.await;
//!     }
//!     Ok(())
//! }
//! ```

/// Architecture version for compatibility tracking and upgrade management
pub const SENTINEL_VERSION: &str = "1.2.0";

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Production hardening modules - ambient operational capabilities
pub mod command_runner; // Deadline-bounded external process execution, swappable in tests
pub mod format; // Byte/duration/percent/progress-bar/truncate helpers
pub mod logging; // Structured logging, audit trails, category-tagged tracing
pub mod state_store; // Atomic load/save of the durable cross-restart snapshot

// Core observability and supervision modules
pub mod actuator; // Autonomous 10 s dispatch loop and disk-point recorder
pub mod chat; // Transport-facing intents, outbound messages, command glue
pub mod config; // Configuration document, sanitisation, quiet hours, patching
pub mod containers; // Container runtime observer, cache, restarts, prune, daemon watchdog
pub mod context; // Process-scoped shared state and worker lifecycle
pub mod events; // Bounded ring of classified events
pub mod fs_watchdog; // Lazy filesystem probe with bounded deep scan
pub mod healthcheck; // Outward HTTP ping and downtime ledger
pub mod monitor; // Threshold evaluation and batched critical alerting
pub mod prediction; // Linear-regression days-until-full estimation
pub mod report; // Report scheduling, rendering, best-effort summarising
pub mod sampler; // Periodic system snapshot production
pub mod stress; // Duration-weighted resource pressure tracking
pub mod watchdogs; // Kernel ring, network reachability and RAID detectors

pub use context::AppContext;

/// Comprehensive error type covering all sentinel components and failure modes
///
/// Each variant carries context-specific text to aid debugging and recovery.
/// Transient probe failures are expected operating conditions: they are
/// logged and counted on the relevant watchdog, never surfaced to the user.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SentinelError {
    /// Configuration errors - unparseable document, invalid values, missing
    /// required fields (token, allowed user id)
    #[error("Configuration error: {0}")]
    Config(String),

    /// System probe errors - /proc parsing, statvfs, sensor reads
    #[error("Probe error: {0}")]
    Probe(String),

    /// External command errors - spawn failure, non-zero exit, deadline hit
    #[error("Command error: {0}")]
    Command(String),

    /// Durable state persistence errors - serialisation, file I/O, rename
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Chat transport errors - send/edit failures from the adapter
    #[error("Transport error: {0}")]
    Transport(String),

    /// Report pipeline errors - scheduling, rendering
    #[error("Report error: {0}")]
    Report(String),

    /// Summariser errors - per-attempt timeout, model fallback exhaustion
    #[error("Summariser error: {0}")]
    Summarizer(String),

    /// Corrective action errors - restart/prune/reboot command failures
    #[error("Actuator error: {0}")]
    Actuator(String),

    /// Operation deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// General system errors - unexpected internal conditions
    #[error("System error: {0}")]
    System(String),
}

/// Result type for all sentinel operations
///
/// Consistent error handling interface across the entire codebase; all public
/// API functions return this Result type.
pub type Result<T> = std::result::Result<T, SentinelError>;
