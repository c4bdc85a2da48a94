//! # Filesystem Watchdog - Lazy Probe, Bounded Deep Scan
//!
//! Disk space is watched lazily: an O(1) statvfs probe every
//! `check_interval_minutes` is all the steady-state cost. Crossing the
//! warning threshold produces at most one warning per hour per path;
//! crossing the critical threshold notifies the operator and triggers a
//! bounded deep scan in the background.
//!
//! The deep scan walks the tree once, skipping configured exclude prefixes,
//! maintaining the top-N largest files by insertion into a kept-sorted slice
//! (memory stays bounded on arbitrarily large trees) and du-style per
//! directory totals of which only the top 20 are kept. Unreadable entries are
//! counted and surfaced in the summary, never aborting the scan. Concurrent
//! triggers coalesce on a scan-in-progress flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::context::AppContext;
use crate::events::EventLevel;
use crate::format::{format_bytes, format_percent};
use crate::logging::{log_info, log_warn, LogCategory};
use crate::{Result, SentinelError};

/// Directories kept in the deep-scan summary
const TOP_DIRS: usize = 20;

/// Minimum spacing between user-visible warnings for one path
const WARNING_SPACING: Duration = Duration::from_secs(3600);

/// Result of the O(1) statvfs probe
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PathUsage {
    pub used_percent: f64,
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub inodes_total: u64,
    pub inodes_free: u64,
}

/// statvfs-backed usage query; used by the sampler and the watchdog
pub fn probe_path(path: &str) -> Result<PathUsage> {
    let stat = nix::sys::statvfs::statvfs(Path::new(path))
        .map_err(|e| SentinelError::Probe(format!("statvfs {path}: {e}")))?;

    let frag = stat.fragment_size() as u64;
    let blocks = stat.blocks() as u64;
    let blocks_free = stat.blocks_free() as u64;
    let blocks_avail = stat.blocks_available() as u64;

    let used = blocks.saturating_sub(blocks_free);
    let reachable = used + blocks_avail;
    let used_percent = if reachable > 0 {
        used as f64 / reachable as f64 * 100.0
    } else {
        0.0
    };

    Ok(PathUsage {
        used_percent,
        free_bytes: blocks_avail * frag,
        total_bytes: blocks * frag,
        inodes_total: stat.files() as u64,
        inodes_free: stat.files_available() as u64,
    })
}

/// One path with its aggregated size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub path: String,
    pub size_bytes: u64,
}

/// Bounded kept-sorted collection of the largest entries
///
/// Insertion keeps the slice sorted by size descending and truncated to the
/// cap, so memory stays O(cap) regardless of tree size.
#[derive(Debug, Clone)]
pub struct BoundedTopList {
    entries: Vec<ScanEntry>,
    cap: usize,
}

impl BoundedTopList {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap + 1),
            cap,
        }
    }

    pub fn insert(&mut self, entry: ScanEntry) {
        if self.cap == 0 {
            return;
        }
        if self.entries.len() == self.cap
            && entry.size_bytes <= self.entries.last().map(|e| e.size_bytes).unwrap_or(0)
        {
            return;
        }
        let position = self
            .entries
            .partition_point(|existing| existing.size_bytes >= entry.size_bytes);
        self.entries.insert(position, entry);
        self.entries.truncate(self.cap);
    }

    pub fn into_vec(self) -> Vec<ScanEntry> {
        self.entries
    }
}

/// Outcome of one bounded deep scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepScanResult {
    pub id: String,
    pub root: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Largest files, size-descending, at most `top_n_files`
    pub largest_files: Vec<ScanEntry>,
    /// Largest directories (du-style totals below the root), at most 20
    pub largest_dirs: Vec<ScanEntry>,
    pub total_bytes: u64,
    pub files_seen: u64,
    /// Entries that could not be read (permissions and friends)
    pub errors: u64,
}

/// Walk `root`, skipping `exclude_prefixes`, collecting bounded summaries
///
/// Synchronous and CPU/IO heavy: callers run it inside `spawn_blocking`.
pub fn deep_scan(root: &str, exclude_prefixes: &[String], top_n_files: usize) -> DeepScanResult {
    let started_at = Utc::now();
    let mut files = BoundedTopList::new(top_n_files);
    let mut dir_totals: HashMap<PathBuf, u64> = HashMap::new();
    let mut total_bytes = 0u64;
    let mut files_seen = 0u64;
    let mut errors = 0u64;

    let root_path = PathBuf::from(root);
    let walker = WalkDir::new(&root_path).into_iter().filter_entry(|entry| {
        let path = entry.path().to_string_lossy();
        !exclude_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                errors += 1;
                continue;
            }
        };

        files_seen += 1;
        total_bytes += size;
        files.insert(ScanEntry {
            path: entry.path().to_string_lossy().into_owned(),
            size_bytes: size,
        });

        // du-style: charge every ancestor directory below the scan root
        let mut parent = entry.path().parent();
        while let Some(dir) = parent {
            if dir == root_path || !dir.starts_with(&root_path) {
                break;
            }
            *dir_totals.entry(dir.to_path_buf()).or_insert(0) += size;
            parent = dir.parent();
        }
    }

    let mut dirs = BoundedTopList::new(TOP_DIRS);
    for (path, size_bytes) in dir_totals {
        dirs.insert(ScanEntry {
            path: path.to_string_lossy().into_owned(),
            size_bytes,
        });
    }

    DeepScanResult {
        id: Uuid::new_v4().to_string(),
        root: root.to_string(),
        started_at,
        finished_at: Utc::now(),
        largest_files: files.into_vec(),
        largest_dirs: dirs.into_vec(),
        total_bytes,
        files_seen,
        errors,
    }
}

/// Mutable watchdog state living on the context
pub struct FsWatchdogState {
    last_warning: HashMap<String, Instant>,
    last_critical: HashMap<String, Instant>,
    pub last_scan: Option<DeepScanResult>,
}

impl FsWatchdogState {
    pub fn new() -> Self {
        Self {
            last_warning: HashMap::new(),
            last_critical: HashMap::new(),
            last_scan: None,
        }
    }

    fn warning_due(&mut self, path: &str) -> bool {
        spaced(&mut self.last_warning, path)
    }

    fn critical_due(&mut self, path: &str) -> bool {
        spaced(&mut self.last_critical, path)
    }
}

impl Default for FsWatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

fn spaced(map: &mut HashMap<String, Instant>, path: &str) -> bool {
    let now = Instant::now();
    match map.get(path) {
        Some(last) if now.duration_since(*last) < WARNING_SPACING => false,
        _ => {
            map.insert(path.to_string(), now);
            true
        }
    }
}

/// Render a deep-scan summary for the operator
pub fn render_scan_summary(scan: &DeepScanResult) -> String {
    let mut out = format!(
        "🔍 Deep scan of {} finished: {} in {} files",
        scan.root,
        format_bytes(scan.total_bytes),
        scan.files_seen,
    );
    if scan.errors > 0 {
        out.push_str(&format!(" ({} unreadable entries)", scan.errors));
    }
    out.push_str("\n\nLargest files:");
    for entry in &scan.largest_files {
        out.push_str(&format!("\n  {} — {}", entry.path, format_bytes(entry.size_bytes)));
    }
    out.push_str("\n\nLargest directories:");
    for entry in scan.largest_dirs.iter().take(5) {
        out.push_str(&format!("\n  {} — {}", entry.path, format_bytes(entry.size_bytes)));
    }
    out
}

/// Launch the deep scan in the background unless one is already running
///
/// Returns false when a scan was already in flight (triggers coalesce).
pub fn trigger_deep_scan(ctx: &Arc<AppContext>, root: String) -> bool {
    if ctx
        .fs_scan_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return false;
    }

    let ctx = ctx.clone();
    tokio::spawn(async move {
        let (excludes, top_n, scan_paths) = {
            let config = ctx.config.read();
            (
                config.fs_watchdog.exclude_patterns.clone(),
                config.fs_watchdog.top_n_files,
                config.fs_watchdog.deep_scan_paths.clone(),
            )
        };
        let roots = if scan_paths.is_empty() {
            vec![root.clone()]
        } else {
            scan_paths
        };

        for scan_root in roots {
            let excludes = excludes.clone();
            let result = tokio::task::spawn_blocking(move || deep_scan(&scan_root, &excludes, top_n)).await;
            match result {
                Ok(scan) => {
                    log_info(
                        LogCategory::Filesystem,
                        &format!(
                            "deep scan of {} done: {} files, {} errors",
                            scan.root, scan.files_seen, scan.errors
                        ),
                    );
                    let summary = render_scan_summary(&scan);
                    ctx.fs_state.lock().last_scan = Some(scan);
                    ctx.notify_user(&summary).await;
                }
                Err(e) => {
                    log_warn(LogCategory::Filesystem, &format!("deep scan task failed: {e}"));
                }
            }
        }
        ctx.fs_scan_in_progress.store(false, Ordering::SeqCst);
    });
    true
}

/// Filesystem watchdog worker
pub async fn run(ctx: Arc<AppContext>) {
    let (enabled, interval_minutes) = {
        let config = ctx.config.read();
        (
            config.fs_watchdog.enabled,
            config.fs_watchdog.check_interval_minutes.max(1),
        )
    };
    if !enabled {
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    log_info(LogCategory::Filesystem, "filesystem watchdog started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancel.cancelled() => return,
        }
        check_once(&ctx).await;
        ctx.mark_tick("fs_watchdog");
    }
}

/// One light-probe pass over the configured volumes
pub async fn check_once(ctx: &Arc<AppContext>) {
    let (paths, warning, critical) = {
        let config = ctx.config.read();
        (
            vec![config.paths.ssd.clone(), config.paths.hdd.clone()],
            config.fs_watchdog.warning_threshold,
            config.fs_watchdog.critical_threshold,
        )
    };

    for path in paths {
        let usage = match probe_path(&path) {
            Ok(usage) => usage,
            Err(e) => {
                log_warn(LogCategory::Filesystem, &format!("probe failed: {e}"));
                continue;
            }
        };

        if usage.used_percent >= critical {
            let due = ctx.fs_state.lock().critical_due(&path);
            let message = format!(
                "Disk space critical: {} at {} ({} free)",
                path,
                format_percent(usage.used_percent),
                format_bytes(usage.free_bytes),
            );
            if due {
                ctx.events.append(EventLevel::Critical, message.clone());
                ctx.notify_user(&message).await;
            }
            if trigger_deep_scan(ctx, path.clone()) {
                log_info(LogCategory::Filesystem, &format!("deep scan triggered for {path}"));
            }
        } else if usage.used_percent >= warning {
            let due = ctx.fs_state.lock().warning_due(&path);
            if due {
                let message = format!(
                    "Disk space warning: {} at {} ({} free)",
                    path,
                    format_percent(usage.used_percent),
                    format_bytes(usage.free_bytes),
                );
                ctx.events.append(EventLevel::Warning, message.clone());
                ctx.notify_user(&message).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn probe_root_reports_plausible_numbers() {
        let usage = probe_path("/").unwrap();
        assert!(usage.total_bytes > 0);
        assert!((0.0..=100.0).contains(&usage.used_percent));
        assert!(usage.inodes_total >= usage.inodes_free);
    }

    #[test]
    fn probe_missing_path_errors() {
        assert!(probe_path("/definitely/not/here").is_err());
    }

    #[test]
    fn bounded_list_keeps_largest_sorted() {
        let mut list = BoundedTopList::new(3);
        for size in [10u64, 50, 5, 99, 42] {
            list.insert(ScanEntry {
                path: format!("/f{size}"),
                size_bytes: size,
            });
        }
        let entries = list.into_vec();
        assert_eq!(
            entries.iter().map(|e| e.size_bytes).collect::<Vec<_>>(),
            vec![99, 50, 42]
        );
    }

    #[test]
    fn bounded_list_with_zero_cap_stays_empty() {
        let mut list = BoundedTopList::new(0);
        list.insert(ScanEntry { path: "/x".into(), size_bytes: 1 });
        assert!(list.into_vec().is_empty());
    }

    fn write_file(dir: &Path, name: &str, len: usize) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; len]).unwrap();
    }

    #[test]
    fn deep_scan_collects_bounded_sorted_results() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a/big.bin", 5000);
        write_file(dir.path(), "a/mid.bin", 3000);
        write_file(dir.path(), "b/small.bin", 100);
        write_file(dir.path(), "b/tiny.bin", 10);

        let scan = deep_scan(dir.path().to_str().unwrap(), &[], 2);
        assert_eq!(scan.files_seen, 4);
        assert_eq!(scan.total_bytes, 8110);
        assert_eq!(scan.largest_files.len(), 2);
        assert!(scan.largest_files[0].path.ends_with("big.bin"));
        assert!(scan.largest_files[0].size_bytes >= scan.largest_files[1].size_bytes);

        let dir_a = scan
            .largest_dirs
            .iter()
            .find(|entry| entry.path.ends_with("/a"))
            .unwrap();
        assert_eq!(dir_a.size_bytes, 8000);
    }

    #[test]
    fn deep_scan_honours_exclude_prefixes() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "keep/file.bin", 100);
        write_file(dir.path(), "skip/file.bin", 10_000);

        let exclude = dir.path().join("skip").to_string_lossy().into_owned();
        let scan = deep_scan(dir.path().to_str().unwrap(), &[exclude], 5);
        assert_eq!(scan.files_seen, 1);
        assert!(scan
            .largest_files
            .iter()
            .all(|entry| !entry.path.contains("skip")));
    }
}
