//! # Sampler - Periodic System Snapshot Production
//!
//! The sampler is the sole writer of the shared [`Snapshot`]: every
//! `intervals.stats_seconds` (default 5 s) it collects CPU, RAM, swap, load,
//! uptime, per-volume usage, block-device I/O deltas and the top-N processes,
//! then atomically replaces the snapshot whole. Readers take the read lock
//! for the time of one copy and never observe a partial update.
//!
//! I/O throughput is computed by differencing the cumulative `/proc/diskstats`
//! counters across successive ticks; utilisation is derived from the
//! per-device busy-time counter divided by elapsed×10, clamped to [0, 100],
//! reported as the per-device maximum. On the first tick there is no previous
//! sample, so all I/O fields are zero. Transient probe errors are ignored;
//! missing fields default to zero.

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::debug;

use crate::config::PathsConfig;
use crate::context::AppContext;
use crate::fs_watchdog::probe_path;
use crate::logging::{log_info, LogCategory};

/// How many processes each top-N list keeps
pub const TOP_PROCESSES: usize = 5;

/// Usage of one probed volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeUsage {
    pub used_percent: f64,
    pub free_bytes: u64,
    pub total_bytes: u64,
}

/// One entry of a top-N process list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSample {
    pub name: String,
    pub pid: u32,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// Most recent system sample; replaced atomically by the sampler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// False until the first successful tick
    pub ready: bool,
    pub taken_at: Option<DateTime<Utc>>,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub ram_free_mib: u64,
    pub ram_total_mib: u64,
    pub swap_percent: f64,
    pub load_1: f64,
    pub load_5: f64,
    pub load_15: f64,
    pub uptime_seconds: u64,
    /// Keyed by volume label (`ssd`, `hdd`)
    pub volumes: BTreeMap<String, VolumeUsage>,
    pub read_mbps: f64,
    pub write_mbps: f64,
    /// Busiest-device utilisation over the last interval
    pub max_disk_util_percent: f64,
    pub top_cpu: Vec<ProcessSample>,
    pub top_mem: Vec<ProcessSample>,
}

impl Snapshot {
    /// Usage of a labelled volume, zero when the probe failed
    pub fn volume_percent(&self, label: &str) -> f64 {
        self.volumes
            .get(label)
            .map(|volume| volume.used_percent)
            .unwrap_or(0.0)
    }
}

/// Cumulative per-device counters from /proc/diskstats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskCounters {
    pub sectors_read: u64,
    pub sectors_written: u64,
    pub busy_ms: u64,
}

/// Rates derived from two successive counter sets
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IoRates {
    pub read_mbps: f64,
    pub write_mbps: f64,
    pub max_util_percent: f64,
}

const SECTOR_BYTES: f64 = 512.0;

/// Parse one /proc/diskstats line into `(device, counters)`
///
/// Returns None for short lines and for devices that are not whole physical
/// disks (partitions, loop, ram, device-mapper).
pub fn parse_diskstats_line(line: &str) -> Option<(String, DiskCounters)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 14 {
        return None;
    }
    let name = fields[2];
    if !is_physical_disk(name) {
        return None;
    }
    Some((
        name.to_string(),
        DiskCounters {
            sectors_read: fields[5].parse().ok()?,
            sectors_written: fields[9].parse().ok()?,
            busy_ms: fields[12].parse().ok()?,
        },
    ))
}

/// Whole-disk filter: sdX, vdX, xvdX, nvmeXnY and mmcblkN without a
/// partition suffix
pub fn is_physical_disk(name: &str) -> bool {
    if let Some(rest) = name.strip_prefix("nvme") {
        // nvme0n1 is a disk, nvme0n1p1 a partition
        return rest.contains('n') && !rest.contains('p');
    }
    if let Some(rest) = name.strip_prefix("mmcblk") {
        return rest.chars().all(|c| c.is_ascii_digit());
    }
    for prefix in ["sd", "vd", "xvd"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphabetic());
        }
    }
    false
}

/// Difference two counter sets into throughput and utilisation
///
/// Devices missing from either side contribute nothing. Utilisation uses the
/// busy-time formula `busy_ms / (elapsed_secs × 10)`, clamped to [0, 100].
pub fn io_rates(
    prev: &HashMap<String, DiskCounters>,
    current: &HashMap<String, DiskCounters>,
    elapsed: Duration,
) -> IoRates {
    let elapsed_secs = elapsed.as_secs_f64();
    if elapsed_secs <= 0.0 {
        return IoRates::default();
    }

    let mut read_bytes = 0.0;
    let mut written_bytes = 0.0;
    let mut max_util: f64 = 0.0;

    for (device, now) in current {
        let Some(before) = prev.get(device) else {
            continue;
        };
        // counters wrap on reboot; treat a regression as no data
        if now.sectors_read < before.sectors_read
            || now.sectors_written < before.sectors_written
            || now.busy_ms < before.busy_ms
        {
            continue;
        }
        read_bytes += (now.sectors_read - before.sectors_read) as f64 * SECTOR_BYTES;
        written_bytes += (now.sectors_written - before.sectors_written) as f64 * SECTOR_BYTES;

        let util = (now.busy_ms - before.busy_ms) as f64 / (elapsed_secs * 10.0);
        max_util = max_util.max(util.clamp(0.0, 100.0));
    }

    IoRates {
        read_mbps: read_bytes / elapsed_secs / 1_000_000.0,
        write_mbps: written_bytes / elapsed_secs / 1_000_000.0,
        max_util_percent: max_util,
    }
}

/// Keep the N heaviest samples by the given key, descending
fn top_n(
    mut processes: Vec<ProcessSample>,
    n: usize,
    key: impl Fn(&ProcessSample) -> f64,
) -> Vec<ProcessSample> {
    processes.sort_by(|a, b| {
        key(b)
            .partial_cmp(&key(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    processes.truncate(n);
    processes
}

/// Stateful sampler; owns the sysinfo handle and the previous disk counters
pub struct Sampler {
    system: System,
    prev_disk: HashMap<String, DiskCounters>,
    prev_tick: Option<Instant>,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
            prev_disk: HashMap::new(),
            prev_tick: None,
        }
    }

    /// Produce one snapshot; never fails, missing probes default to zero
    pub fn sample(&mut self, paths: &PathsConfig) -> Snapshot {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_processes();

        let cpu_percent = self.system.global_cpu_info().cpu_usage() as f64;

        let ram_total = self.system.total_memory();
        let ram_available = self.system.available_memory();
        let ram_used = ram_total.saturating_sub(ram_available);
        let ram_percent = if ram_total > 0 {
            ram_used as f64 / ram_total as f64 * 100.0
        } else {
            0.0
        };

        let swap_total = self.system.total_swap();
        let swap_percent = if swap_total > 0 {
            self.system.used_swap() as f64 / swap_total as f64 * 100.0
        } else {
            0.0
        };

        let load = System::load_average();

        let mut volumes = BTreeMap::new();
        for (label, path) in [("ssd", paths.ssd.as_str()), ("hdd", paths.hdd.as_str())] {
            match probe_path(path) {
                Ok(probe) => {
                    volumes.insert(
                        label.to_string(),
                        VolumeUsage {
                            used_percent: probe.used_percent,
                            free_bytes: probe.free_bytes,
                            total_bytes: probe.total_bytes,
                        },
                    );
                }
                Err(e) => {
                    debug!(label, path, error = %e, "volume probe failed");
                    volumes.insert(label.to_string(), VolumeUsage::default());
                }
            }
        }

        let current_disk = read_diskstats().unwrap_or_default();
        let now = Instant::now();
        let rates = match self.prev_tick {
            Some(prev_tick) if !self.prev_disk.is_empty() => {
                io_rates(&self.prev_disk, &current_disk, now - prev_tick)
            }
            _ => IoRates::default(),
        };
        self.prev_disk = current_disk;
        self.prev_tick = Some(now);

        let mut processes = Vec::with_capacity(self.system.processes().len());
        for (pid, process) in self.system.processes() {
            let mem_percent = if ram_total > 0 {
                process.memory() as f64 / ram_total as f64 * 100.0
            } else {
                0.0
            };
            processes.push(ProcessSample {
                name: process.name().to_string(),
                pid: pid.as_u32(),
                cpu_percent: process.cpu_usage() as f64,
                mem_percent,
            });
        }

        Snapshot {
            ready: true,
            taken_at: Some(Utc::now()),
            cpu_percent,
            ram_percent,
            ram_free_mib: ram_available / (1024 * 1024),
            ram_total_mib: ram_total / (1024 * 1024),
            swap_percent,
            load_1: load.one,
            load_5: load.five,
            load_15: load.fifteen,
            uptime_seconds: System::uptime(),
            volumes,
            read_mbps: rates.read_mbps,
            write_mbps: rates.write_mbps,
            max_disk_util_percent: rates.max_util_percent,
            top_cpu: top_n(processes.clone(), TOP_PROCESSES, |p| p.cpu_percent),
            top_mem: top_n(processes, TOP_PROCESSES, |p| p.mem_percent),
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and filter /proc/diskstats
fn read_diskstats() -> std::io::Result<HashMap<String, DiskCounters>> {
    let raw = std::fs::read_to_string("/proc/diskstats")?;
    Ok(raw.lines().filter_map(parse_diskstats_line).collect())
}

/// Sampler worker: tick, sample, install, until cancelled
pub async fn run(ctx: Arc<AppContext>) {
    let period = {
        let config = ctx.config.read();
        Duration::from_secs(config.intervals.stats_seconds)
    };
    let mut sampler = Sampler::new();
    let mut ticker = tokio::time::interval(period);
    log_info(LogCategory::Sampler, "sampler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancel.cancelled() => {
                log_info(LogCategory::Sampler, "sampler stopped");
                return;
            }
        }

        let paths = ctx.config.read().paths.clone();
        let snapshot = sampler.sample(&paths);

        gauge!("sentinel_cpu_percent", snapshot.cpu_percent);
        gauge!("sentinel_ram_percent", snapshot.ram_percent);
        gauge!("sentinel_swap_percent", snapshot.swap_percent);
        gauge!("sentinel_disk_util_percent", snapshot.max_disk_util_percent);

        // write-only critical section: replace the snapshot whole
        *ctx.snapshot.write() = snapshot;
        ctx.mark_tick("sampler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS_SDA: &str =
        "   8       0 sda 124010 4421 10721394 31036 211826 183246 12992510 158640 0 89172 189676 0 0 0 0 0 0";

    #[test]
    fn parses_whole_disk_lines() {
        let (name, counters) = parse_diskstats_line(DISKSTATS_SDA).unwrap();
        assert_eq!(name, "sda");
        assert_eq!(counters.sectors_read, 10_721_394);
        assert_eq!(counters.sectors_written, 12_992_510);
        assert_eq!(counters.busy_ms, 89_172);
    }

    #[test]
    fn skips_partitions_and_virtual_devices() {
        for name in ["sda1", "nvme0n1p2", "loop0", "ram1", "dm-0", "md0"] {
            assert!(!is_physical_disk(name), "{name} should be filtered");
        }
        for name in ["sda", "sdb", "vdb", "xvda", "nvme0n1", "mmcblk0"] {
            assert!(is_physical_disk(name), "{name} should be kept");
        }
    }

    #[test]
    fn io_rates_first_tick_is_zero() {
        let current = HashMap::from([(
            "sda".to_string(),
            DiskCounters { sectors_read: 100, sectors_written: 100, busy_ms: 10 },
        )]);
        let rates = io_rates(&HashMap::new(), &current, Duration::from_secs(5));
        assert_eq!(rates, IoRates::default());
    }

    #[test]
    fn io_rates_difference_counters() {
        let prev = HashMap::from([(
            "sda".to_string(),
            DiskCounters { sectors_read: 0, sectors_written: 0, busy_ms: 0 },
        )]);
        // 2 MB read, 4 MB written, 2500 ms busy over 5 s
        let current = HashMap::from([(
            "sda".to_string(),
            DiskCounters {
                sectors_read: 2_000_000 / 512,
                sectors_written: 4_000_000 / 512,
                busy_ms: 2500,
            },
        )]);
        let rates = io_rates(&prev, &current, Duration::from_secs(5));
        assert!((rates.read_mbps - 0.4).abs() < 0.01, "got {}", rates.read_mbps);
        assert!((rates.write_mbps - 0.8).abs() < 0.01);
        assert!((rates.max_util_percent - 50.0).abs() < 0.01);
    }

    #[test]
    fn io_utilisation_is_clamped() {
        let prev = HashMap::from([(
            "sda".to_string(),
            DiskCounters { sectors_read: 0, sectors_written: 0, busy_ms: 0 },
        )]);
        let current = HashMap::from([(
            "sda".to_string(),
            DiskCounters { sectors_read: 0, sectors_written: 0, busy_ms: 999_999 },
        )]);
        let rates = io_rates(&prev, &current, Duration::from_secs(5));
        assert_eq!(rates.max_util_percent, 100.0);
    }

    #[test]
    fn io_rates_ignore_counter_regressions() {
        let prev = HashMap::from([(
            "sda".to_string(),
            DiskCounters { sectors_read: 1000, sectors_written: 1000, busy_ms: 1000 },
        )]);
        let current = HashMap::from([(
            "sda".to_string(),
            DiskCounters { sectors_read: 10, sectors_written: 10, busy_ms: 10 },
        )]);
        let rates = io_rates(&prev, &current, Duration::from_secs(5));
        assert_eq!(rates, IoRates::default());
    }

    #[test]
    fn top_n_sorts_descending_and_truncates() {
        let processes: Vec<ProcessSample> = (0..10)
            .map(|i| ProcessSample {
                name: format!("p{i}"),
                pid: i,
                cpu_percent: i as f64,
                mem_percent: 0.0,
            })
            .collect();
        let top = top_n(processes, 3, |p| p.cpu_percent);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].name, "p9");
        assert_eq!(top[2].name, "p7");
    }

    #[test]
    fn local_sample_is_ready_and_populated() {
        let mut sampler = Sampler::new();
        let paths = PathsConfig {
            ssd: "/".to_string(),
            hdd: "/".to_string(),
        };
        let snapshot = sampler.sample(&paths);
        assert!(snapshot.ready);
        assert!(snapshot.ram_total_mib > 0);
        assert!(snapshot.volumes.contains_key("ssd"));
        // first tick: no previous counters
        assert_eq!(snapshot.read_mbps, 0.0);
        assert_eq!(snapshot.write_mbps, 0.0);
    }
}
