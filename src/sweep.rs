use std::fs;
use std::path::Path;
use std::time::SystemTime;

use serde::Serialize;
use walkdir::WalkDir;

use crate::context::AppContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub errors: usize,
}

/// Sweep the configured file tree, holding the job lock.
pub async fn sweep(ctx: &AppContext) -> SweepSummary {
    let _guard = ctx.lock_jobs().await;
    let settings = ctx.settings();
    sweep_tree(&settings.files_dir, settings.retention_millis(), SystemTime::now())
}

/// Delete empty directories and files whose mtime is more than
/// `retention_millis` before `now`.
///
/// Children are visited before their directory, so a directory emptied by
/// this sweep goes in the same pass. Non-empty directories are never
/// age-checked. The root itself is left alone.
pub fn sweep_tree(root: &Path, retention_millis: f64, now: SystemTime) -> SweepSummary {
    let mut summary = SweepSummary::default();
    if !root.is_dir() {
        tracing::debug!(root = %root.display(), "file tree does not exist, nothing to sweep");
        return summary;
    }

    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                summary.errors += 1;
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            if is_empty_dir(path) {
                match fs::remove_dir(path) {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), "removed empty directory");
                        summary.dirs_removed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove directory");
                        summary.errors += 1;
                    }
                }
            }
            continue;
        }

        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => modified,
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "no modification time");
                summary.errors += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to stat file");
                summary.errors += 1;
                continue;
            }
        };
        let age_millis = now
            .duration_since(modified)
            .map(|age| age.as_millis() as f64)
            .unwrap_or(0.0);

        if age_millis > retention_millis {
            match fs::remove_file(path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed file past retention period");
                    summary.files_removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
                    summary.errors += 1;
                }
            }
        }
    }

    tracing::debug!(
        files = summary.files_removed,
        dirs = summary.dirs_removed,
        "sweep finished"
    );
    summary
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
