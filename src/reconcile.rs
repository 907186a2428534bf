use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::config::Settings;
use crate::context::{AppContext, RemoteServices};
use crate::error::{Ez3dError, Result};
use crate::sheet::{header_index, TableReader};
use crate::table::{Field, SubmissionRow, SubmissionTable};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub rows_seen: usize,
    pub rows_invalid: usize,
    pub rows_stale: usize,
    pub rows_present: usize,
    pub rows_without_ids: usize,
    pub files_downloaded: usize,
}

/// What to do with one row, decided without touching the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowPlan {
    /// A required field is empty or the timestamp does not parse.
    Invalid,
    /// Older than the retention period; never fetched.
    Stale { age_days: i64 },
    /// The first target already exists.
    Present(PathBuf),
    /// Nothing in the links field looks like a blob id.
    NoIds,
    Download(Vec<(String, PathBuf)>),
}

/// Run one reconciliation pass against the current time.
pub async fn reconcile(ctx: &AppContext) -> Result<ReconcileSummary> {
    reconcile_at(ctx, Local::now().naive_local()).await
}

pub async fn reconcile_at(ctx: &AppContext, now: NaiveDateTime) -> Result<ReconcileSummary> {
    let remote = ctx.remote()?;
    let _guard = ctx.lock_jobs().await;

    let settings = ctx.settings();
    let table = fetch_table(remote, settings).await?;
    tracing::debug!(rows = table.len(), "submission table rebuilt");

    let mut summary = ReconcileSummary::default();
    for row in table.rows() {
        summary.rows_seen += 1;
        match plan_row(&row, settings, now) {
            RowPlan::Invalid => {
                tracing::debug!(row = row.index + 2, "skipping incomplete or malformed row");
                summary.rows_invalid += 1;
            }
            RowPlan::Stale { age_days } => {
                tracing::trace!(row = row.index + 2, age_days, "row older than retention period");
                summary.rows_stale += 1;
            }
            RowPlan::Present(_) => summary.rows_present += 1,
            RowPlan::NoIds => {
                tracing::debug!(row = row.index + 2, user = row.email, "no file ids in links field");
                summary.rows_without_ids += 1;
            }
            RowPlan::Download(targets) => {
                summary.files_downloaded += download_row(remote, &row, &targets).await?;
            }
        }
    }

    tracing::info!(
        rows = summary.rows_seen,
        downloaded = summary.files_downloaded,
        present = summary.rows_present,
        stale = summary.rows_stale,
        invalid = summary.rows_invalid,
        "reconciliation finished"
    );
    Ok(summary)
}

/// Read the header row and every recognised column into a table. Required
/// columns missing from the header are a configuration error.
pub async fn fetch_table(remote: &RemoteServices, settings: &Settings) -> Result<SubmissionTable> {
    let spreadsheet_id = settings.spreadsheet_id()?;
    let reader = TableReader::new(remote.sheets.as_ref(), spreadsheet_id, &settings.sheet_name);
    let header = reader.header().await?;

    let mut columns = Vec::with_capacity(Field::ALL.len());
    for field in Field::ALL {
        let label = settings.labels.label(field);
        if field.is_required() && header_index(&header, label).is_none() {
            return Err(Ez3dError::Config(format!(
                "column '{label}' ({}) not found in the header row of sheet '{}'",
                field.config_key(),
                settings.sheet_name
            )));
        }
        if !field.is_required() && label.trim().is_empty() {
            continue;
        }
        columns.push((field, reader.column(&header, label).await?));
    }
    Ok(SubmissionTable::from_columns(columns))
}

pub fn plan_row(row: &SubmissionRow<'_>, settings: &Settings, now: NaiveDateTime) -> RowPlan {
    if row.missing_field().is_some() {
        return RowPlan::Invalid;
    }
    let Some(submitted) = row.submitted_at() else {
        return RowPlan::Invalid;
    };

    let age_days = (now - submitted).num_days();
    if age_days as f64 >= settings.retention_days {
        return RowPlan::Stale { age_days };
    }

    let root = settings.files_dir.as_path();
    let Some(first) = row.target_path(root, settings.user_folder, 1) else {
        return RowPlan::Invalid;
    };
    if first.exists() {
        return RowPlan::Present(first);
    }

    let targets: Vec<(String, PathBuf)> = settings
        .blob_ids
        .find_ids(row.files)
        .into_iter()
        .enumerate()
        .filter_map(|(i, id)| {
            row.target_path(root, settings.user_folder, i + 1)
                .map(|path| (id.to_string(), path))
        })
        .collect();
    if targets.is_empty() {
        RowPlan::NoIds
    } else {
        RowPlan::Download(targets)
    }
}

/// Fetch every blob of a row before writing anything, then write the `_1`
/// file last: its presence is what marks the row as done.
async fn download_row(
    remote: &RemoteServices,
    row: &SubmissionRow<'_>,
    targets: &[(String, PathBuf)],
) -> Result<usize> {
    let mut blobs = Vec::with_capacity(targets.len());
    for (id, path) in targets {
        tracing::info!(file_id = %id, user = row.email, "downloading file");
        let bytes = remote.drive.download(id).await?;
        blobs.push((path, bytes));
    }

    if let Some(parent) = targets.first().and_then(|(_, path)| path.parent()) {
        fs::create_dir_all(parent).map_err(|e| Ez3dError::io(parent, e))?;
    }
    for (path, bytes) in blobs.iter().rev() {
        write_file(path, bytes)?;
    }
    Ok(blobs.len())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| Ez3dError::io(path, e))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
    Ok(())
}
