//! # Autonomous Actuator Loop
//!
//! One 10-second dispatch tick drives everything that reacts to the current
//! snapshot: the stress tracker, the container observer (transitions,
//! critical containers, daemon watchdog), the RAM-critical auto-restart and
//! the weekly prune. A second 5-minute ticker records one free-space point
//! per volume for the fill-up forecast.
//!
//! A failure in any dispatched step is contained by that step (they log and
//! return); the loop itself only ends on cancellation.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::containers;
use crate::context::AppContext;
use crate::logging::{log_info, LogCategory};
use crate::stress;

/// Dispatch cadence
const DISPATCH_TICK: Duration = Duration::from_secs(10);

/// Free-space sampling cadence for the forecast
const DISK_POINT_TICK: Duration = Duration::from_secs(300);

/// Record one free-space point per volume from the current snapshot
pub fn record_disk_points(ctx: &Arc<AppContext>) {
    let snapshot = ctx.snapshot.read().clone();
    if !snapshot.ready {
        return;
    }
    let now = Utc::now();
    let mut history = ctx.disk_history.lock();
    for (label, volume) in &snapshot.volumes {
        history.record(label, volume.free_bytes, now);
    }
}

/// Autonomous actuator worker
pub async fn run(ctx: Arc<AppContext>) {
    let mut dispatch = tokio::time::interval(DISPATCH_TICK);
    let mut disk_points = tokio::time::interval(DISK_POINT_TICK);
    log_info(LogCategory::Action, "actuator loop started");

    loop {
        tokio::select! {
            _ = dispatch.tick() => {
                stress::tick(&ctx).await;
                containers::observe(&ctx).await;
                containers::ram_critical_check(&ctx).await;
                containers::maybe_prune(&ctx).await;
                ctx.mark_tick("actuator");
            }
            _ = disk_points.tick() => {
                record_disk_points(&ctx);
            }
            _ = ctx.cancel.cancelled() => {
                log_info(LogCategory::Action, "actuator loop stopped");
                return;
            }
        }
    }
}
