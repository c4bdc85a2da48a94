//! # Persistent Store - Durable Cross-Restart State
//!
//! Atomic load/save of the small state snapshot that must survive restarts:
//! the last report instant (double-fire protection), the auto-restart ledger
//! (budget enforcement), healthcheck statistics and the operator settings
//! overlay. Saves write to a sibling temp file and rename into place, so a
//! crash mid-save never corrupts the previous snapshot.
//!
//! A missing file is a first run; a parse error is logged and answered with
//! defaults (no in-memory data is lost, the next save rewrites the file).
//! Save failures are logged and retried on the next material mutation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::UserSettings;
use crate::healthcheck::HealthcheckState;
use crate::{Result, SentinelError};

/// Format version of the durable record
const STATE_VERSION: u32 = 1;

/// The subset of sentinel state that must survive restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableState {
    /// Record format version
    #[serde(default)]
    pub version: u32,
    /// Instant of the last scheduled report emission; monotonic
    #[serde(default)]
    pub last_report_sent: Option<DateTime<Utc>>,
    /// Container name → ordered auto-restart timestamps (2 h retention)
    #[serde(default)]
    pub auto_restarts: HashMap<String, Vec<DateTime<Utc>>>,
    /// Healthcheck counters and downtime ledger
    #[serde(default)]
    pub healthcheck: HealthcheckState,
    /// Operator settings overlay (language, quiet hours, reports, prune)
    #[serde(default)]
    pub settings: UserSettings,
}

impl Default for DurableState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_report_sent: None,
            auto_restarts: HashMap::new(),
            healthcheck: HealthcheckState::default(),
            settings: UserSettings::default(),
        }
    }
}

/// Atomic file-backed store for [`DurableState`]
pub struct StateStore {
    path: PathBuf,
    // serialises writers so two saves cannot interleave their tmp files
    write_guard: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot; missing file ⇒ first-run defaults, parse error ⇒
    /// logged defaults
    pub fn load(&self) -> DurableState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no durable state found, first run");
                return DurableState::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read durable state, using defaults");
                return DurableState::default();
            }
        };

        match serde_json::from_str::<DurableState>(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot parse durable state, using defaults");
                DurableState::default()
            }
        }
    }

    /// Atomically replace the snapshot on disk
    pub fn save(&self, state: &DurableState) -> Result<()> {
        let _guard = self.write_guard.lock();

        let mut record = state.clone();
        record.version = STATE_VERSION;
        let serialized = serde_json::to_string_pretty(&record)
            .map_err(|e| SentinelError::Persistence(format!("cannot serialise state: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SentinelError::Persistence(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)
            .map_err(|e| SentinelError::Persistence(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            SentinelError::Persistence(format!("cannot rename into {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let state = store.load();
        assert!(state.last_report_sent.is_none());
        assert!(state.auto_restarts.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut state = DurableState::default();
        state.last_report_sent = Some(Utc::now());
        state
            .auto_restarts
            .insert("plex".to_string(), vec![Utc::now()]);
        state.settings.language = "it".to_string();
        store.save(&state).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.version, STATE_VERSION);
        assert_eq!(loaded.settings.language, "it");
        assert_eq!(loaded.auto_restarts.get("plex").map(Vec::len), Some(1));
        assert!(loaded.last_report_sent.is_some());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = StateStore::new(&path);
        let state = store.load();
        assert!(state.last_report_sent.is_none());

        // the next save repairs the file
        store.save(&state).unwrap();
        assert!(store.load().auto_restarts.is_empty());
    }

    #[test]
    fn save_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/deeper/state.json"));
        store.save(&DurableState::default()).unwrap();
        assert!(store.path().exists());
    }
}
