//! # Event Ledger - Bounded Ring of Classified Events
//!
//! Append-only ring of notable happenings (threshold crossings, container
//! transitions, corrective actions) shared by every worker. The ledger is the
//! one mutable collection touched from many tasks; it carries a single
//! [`parking_lot::Mutex`] held only for list mutation, never across I/O.
//!
//! Capacity is bounded (default 200 entries, oldest dropped first) and
//! entries older than 24 h are pruned after each report emission. Quiet hours
//! suppress user-visible sends but never suppress ledger appends: the ledger
//! is the source of truth for the next report.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default ring capacity
pub const DEFAULT_EVENT_CAP: usize = 200;

/// Classification of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventLevel {
    /// Routine notable happening (container recovered, report sent)
    Info,
    /// Degradation worth attention but not intervention
    Warning,
    /// Condition that pages the operator
    Critical,
    /// Autonomous corrective action taken by the sentinel
    Action,
}

impl EventLevel {
    /// Single-character glyph used by the report renderer
    pub fn glyph(&self) -> &'static str {
        match self {
            EventLevel::Info => "ℹ️",
            EventLevel::Warning => "⚠️",
            EventLevel::Critical => "🔴",
            EventLevel::Action => "🔧",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventLevel::Info => write!(f, "INFO"),
            EventLevel::Warning => write!(f, "WARNING"),
            EventLevel::Critical => write!(f, "CRITICAL"),
            EventLevel::Action => write!(f, "ACTION"),
        }
    }
}

/// One ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

/// Bounded append-only ring, strictly append-ordered
pub struct EventLedger {
    entries: Mutex<VecDeque<Event>>,
    cap: usize,
}

impl EventLedger {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    /// Append an entry stamped with the current time; drops the oldest entry
    /// once the ring exceeds its cap
    pub fn append(&self, level: EventLevel, message: impl Into<String>) {
        self.append_at(Utc::now(), level, message);
    }

    /// Append with an explicit timestamp (scheduler replays, tests)
    pub fn append_at(&self, timestamp: DateTime<Utc>, level: EventLevel, message: impl Into<String>) {
        let mut entries = self.entries.lock();
        entries.push_back(Event {
            timestamp,
            level,
            message: message.into(),
        });
        while entries.len() > self.cap {
            entries.pop_front();
        }
    }

    /// Copy of the full ring, oldest first
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Copy of the entries at or after `since`, oldest first
    pub fn since(&self, since: DateTime<Utc>) -> Vec<Event> {
        self.entries
            .lock()
            .iter()
            .filter(|event| event.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop entries older than `age`; runs after each report emission
    pub fn prune_older_than(&self, age: ChronoDuration) {
        let cutoff = Utc::now() - age;
        let mut entries = self.entries.lock();
        while entries
            .front()
            .map(|event| event.timestamp < cutoff)
            .unwrap_or(false)
        {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for EventLedger {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAP)
    }
}
