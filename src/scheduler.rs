use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio::sync::watch;

use crate::context::AppContext;
use crate::error::Result;
use crate::reconcile::{self, ReconcileSummary};
use crate::sweep::{self, SweepSummary};

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub reconcile: Option<ReconcileSummary>,
    pub sweep: Option<SweepSummary>,
}

/// One reconcile-then-sweep pass, each step gated by its config toggle. A
/// failed reconcile ends the cycle before the sweep.
pub async fn run_cycle(ctx: &AppContext) -> Result<CycleReport> {
    let settings = ctx.settings();
    let mut report = CycleReport::default();

    if settings.stl_search {
        report.reconcile = Some(reconcile::reconcile(ctx).await?);
    }
    if settings.remove_old_files {
        report.sweep = Some(sweep::sweep(ctx).await);
    }
    Ok(report)
}

/// Run cycles every `refresh_interval` until `stop` flips to `true` or its
/// sender is dropped. A stop that arrives mid-cycle takes effect once the
/// cycle finishes; a failed cycle is logged and the next one runs on time.
pub async fn run(ctx: Arc<AppContext>, mut stop: watch::Receiver<bool>) -> usize {
    let interval = ctx.settings().refresh_interval;
    tracing::info!(
        interval = ?interval,
        stl_search = ctx.settings().stl_search,
        remove_old_files = ctx.settings().remove_old_files,
        blob_pattern = ctx.settings().blob_ids.as_str(),
        "scheduler starting"
    );

    let mut cycles = 0;
    loop {
        let started = Instant::now();
        match run_cycle(&ctx).await {
            Ok(report) => tracing::info!(
                duration = ?started.elapsed(),
                downloaded = report.reconcile.as_ref().map_or(0, |r| r.files_downloaded),
                removed = report.sweep.as_ref().map_or(0, |s| s.files_removed + s.dirs_removed),
                "cycle finished"
            ),
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "cycle failed, retrying at next interval")
            }
            Err(e) => tracing::error!(error = %e, "cycle failed"),
        }
        cycles += 1;

        if *stop.borrow() {
            break;
        }
        log_next_run(interval);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(cycles, "scheduler stopped");
    cycles
}

fn log_next_run(delay: Duration) {
    match next_run_at(chrono::Local::now(), delay) {
        Some(next_wall) => tracing::debug!(
            next_run = %next_wall.format("%Y-%m-%d %H:%M:%S"),
            delay = ?delay,
            "next cycle scheduled"
        ),
        None => tracing::debug!(delay = ?delay, "next cycle scheduled"),
    }
}

/// Wall-clock time of the next cycle, or `None` past chrono's range.
fn next_run_at(now: DateTime<Local>, delay: Duration) -> Option<DateTime<Local>> {
    let delay = chrono::Duration::from_std(delay).ok()?;
    now.checked_add_signed(delay)
}
