use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use ez3d_lib::config::{Config, Settings};
use ez3d_lib::context::{AppContext, RemoteServices};
use ez3d_lib::drive::BlobStore;
use ez3d_lib::error::{Ez3dError, Result};
use ez3d_lib::sheet::{column_letter, SheetService};
use ez3d_lib::{reconcile, scheduler, BoxFuture};
use tokio::sync::watch;

const SHEET: &str = "Desktop 3D";
const ID_A: &str = "1A2b3C4d5E6f7G8h9I0jKlMnOpQrStUvWx";
const ID_B: &str = "1B2b3C4d5E6f7G8h9I0jKlMnOpQrStUvWy";
const ID_C: &str = "1C2b3C4d5E6f7G8h9I0jKlMnOpQrStUvWz";

/// Serves a fixed table the way the Sheets API does: a header range plus one
/// range per column, trailing blanks dropped.
struct FakeSheet {
    ranges: HashMap<String, Vec<Vec<String>>>,
    calls: AtomicUsize,
}

impl FakeSheet {
    fn new(columns: &[(&str, Vec<&str>)]) -> Self {
        let mut ranges = HashMap::new();
        let header: Vec<String> = columns.iter().map(|(label, _)| label.to_string()).collect();
        ranges.insert(format!("'{SHEET}'!A1:1"), vec![header]);

        for (i, (_, cells)) in columns.iter().enumerate() {
            let letter = column_letter(i);
            let mut rows: Vec<Vec<String>> = cells
                .iter()
                .map(|c| if c.is_empty() { vec![] } else { vec![c.to_string()] })
                .collect();
            while rows.last().is_some_and(|r| r.is_empty()) {
                rows.pop();
            }
            ranges.insert(format!("'{SHEET}'!{letter}2:{letter}"), rows);
        }
        Self {
            ranges,
            calls: AtomicUsize::new(0),
        }
    }
}

impl SheetService for FakeSheet {
    fn values<'a>(
        &'a self,
        spreadsheet_id: &'a str,
        range: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Vec<String>>>> {
        Box::pin(async move {
            assert_eq!(spreadsheet_id, "sheet-id");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.ranges.get(range).cloned().unwrap_or_default())
        })
    }
}

#[derive(Default)]
struct FakeDrive {
    requests: Mutex<Vec<String>>,
    failing: Vec<String>,
}

impl FakeDrive {
    fn failing(ids: &[&str]) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failing: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl BlobStore for FakeDrive {
    fn download<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(file_id.to_string());
            if self.failing.iter().any(|f| f == file_id) {
                return Err(Ez3dError::Remote(format!("403 on {file_id}")));
            }
            Ok(format!("solid {file_id}\nendsolid\n").into_bytes())
        })
    }
}

fn settings(root: &Path, extra: &str) -> Settings {
    let text = format!(
        "SPREADSHEET_ID=sheet-id\nFILE_RETENTION_PERIOD=7\nFILES_DIR={}\n{extra}",
        root.join("files").display()
    );
    Settings::from_config(&Config::parse(&text, root.to_path_buf())).unwrap()
}

fn context(root: &Path, extra: &str, sheet: Arc<FakeSheet>, drive: Arc<FakeDrive>) -> AppContext {
    AppContext::new(settings(root, extra), Some(RemoteServices::new(sheet, drive)))
}

fn days_ago(days: i64) -> String {
    (Local::now() - chrono::Duration::days(days) - chrono::Duration::minutes(5))
        .format("%-m/%-d/%Y %-H:%M:%S")
        .to_string()
}

fn stl_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

fn lab_sheet(recent: &str, old: &str) -> FakeSheet {
    FakeSheet::new(&[
        ("Timestamp", vec![recent, old, recent, "not a date", recent]),
        ("Email", vec!["ada@lab.edu", "bob@lab.edu", "cleo@lab.edu", "dan@lab.edu", ""]),
        ("First Name", vec!["Ada", "Bob", "Cleo", "Dan", "Eve"]),
        ("Last Name", vec!["Lovelace", "Stone", "Park", "Ruiz", "Adams"]),
        (
            "Files",
            vec![
                &*format!("https://drive.google.com/open?id={ID_A}, https://drive.google.com/open?id={ID_B}"),
                ID_C,
                "I'll bring it on a usb stick",
                ID_C,
                ID_C,
            ],
        ),
        ("Print ID", vec!["P-1", "P-2"]),
    ])
}

#[tokio::test]
async fn downloads_fresh_rows_once() {
    let dir = tempfile::tempdir().unwrap();
    let recent = days_ago(1);
    let sheet = Arc::new(lab_sheet(&recent, &days_ago(30)));
    let drive = Arc::new(FakeDrive::default());
    let ctx = context(dir.path(), "", sheet.clone(), drive.clone());

    let summary = reconcile::reconcile(&ctx).await.unwrap();
    assert_eq!(summary.rows_seen, 5);
    assert_eq!(summary.files_downloaded, 2);
    assert_eq!(summary.rows_stale, 1);
    assert_eq!(summary.rows_without_ids, 1);
    assert_eq!(summary.rows_invalid, 2);
    assert_eq!(drive.requests(), vec![ID_A.to_string(), ID_B.to_string()]);

    let files_root = dir.path().join("files");
    assert_eq!(
        stl_files(&files_root),
        vec![
            PathBuf::from("Ada_Lovelace").join("A_P-1_1.stl"),
            PathBuf::from("Ada_Lovelace").join("A_P-1_2.stl"),
        ]
    );
    let body = fs::read_to_string(files_root.join("Ada_Lovelace").join("A_P-1_1.stl")).unwrap();
    assert!(body.contains(ID_A));

    // one header read plus one read per recognised column
    assert_eq!(sheet.calls.load(Ordering::SeqCst), 7);
    // users without a download get no folder
    assert!(!files_root.join("Cleo_Park").exists());
    assert!(!files_root.join("Bob_Stone").exists());
}

#[tokio::test]
async fn second_pass_makes_no_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = Arc::new(lab_sheet(&days_ago(1), &days_ago(30)));
    let drive = Arc::new(FakeDrive::default());
    let ctx = context(dir.path(), "", sheet, drive.clone());

    reconcile::reconcile(&ctx).await.unwrap();
    let before = stl_files(&dir.path().join("files"));
    let requests_before = drive.requests().len();

    let summary = reconcile::reconcile(&ctx).await.unwrap();
    assert_eq!(summary.files_downloaded, 0);
    assert_eq!(summary.rows_present, 1);
    assert_eq!(drive.requests().len(), requests_before);
    assert_eq!(stl_files(&dir.path().join("files")), before);
}

#[tokio::test]
async fn existing_target_is_never_fetched() {
    let dir = tempfile::tempdir().unwrap();
    let user_dir = dir.path().join("files").join("Ada_Lovelace");
    fs::create_dir_all(&user_dir).unwrap();
    fs::write(user_dir.join("A_P-1_1.stl"), b"hand placed").unwrap();

    let sheet = Arc::new(lab_sheet(&days_ago(1), &days_ago(30)));
    let drive = Arc::new(FakeDrive::default());
    let ctx = context(dir.path(), "", sheet, drive.clone());

    let summary = reconcile::reconcile(&ctx).await.unwrap();
    assert_eq!(summary.files_downloaded, 0);
    assert!(drive.requests().is_empty());
    assert_eq!(fs::read(user_dir.join("A_P-1_1.stl")).unwrap(), b"hand placed");
}

#[tokio::test]
async fn rows_past_retention_are_never_fetched() {
    let dir = tempfile::tempdir().unwrap();
    let old = days_ago(8);
    let sheet = Arc::new(lab_sheet(&old, &old));
    let drive = Arc::new(FakeDrive::default());
    let ctx = context(dir.path(), "", sheet, drive.clone());

    let summary = reconcile::reconcile(&ctx).await.unwrap();
    assert_eq!(summary.rows_stale, 3);
    assert!(drive.requests().is_empty());
    assert!(!dir.path().join("files").exists());
}

#[tokio::test]
async fn failed_download_aborts_pass_and_retries_later() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = Arc::new(lab_sheet(&days_ago(1), &days_ago(30)));

    let failing = Arc::new(FakeDrive::failing(&[ID_B]));
    let ctx = context(dir.path(), "", sheet.clone(), failing);
    let err = reconcile::reconcile(&ctx).await.unwrap_err();
    assert!(matches!(err, Ez3dError::Remote(_)));
    assert!(err.is_transient());
    assert!(stl_files(&dir.path().join("files")).is_empty());

    let healthy = Arc::new(FakeDrive::default());
    let ctx = context(dir.path(), "", sheet, healthy.clone());
    let summary = reconcile::reconcile(&ctx).await.unwrap();
    assert_eq!(summary.files_downloaded, 2);
}

#[tokio::test]
async fn missing_required_column_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = Arc::new(FakeSheet::new(&[
        ("Timestamp", vec![]),
        ("Email", vec![]),
        ("First Name", vec![]),
        ("Last Name", vec![]),
    ]));
    let ctx = context(dir.path(), "", sheet, Arc::new(FakeDrive::default()));

    let err = reconcile::reconcile(&ctx).await.unwrap_err();
    assert!(matches!(err, Ez3dError::Config(_)));
    assert!(err.to_string().contains("Files"));
}

#[tokio::test]
async fn missing_print_id_column_falls_back_to_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let ts = days_ago(2);
    let sheet = Arc::new(FakeSheet::new(&[
        ("Correo", vec!["ada@lab.edu"]),
        ("Nombre", vec!["Ada"]),
        ("Apellido", vec!["Lovelace"]),
        ("Archivos", vec![ID_A]),
        ("Marca temporal", vec![&*ts]),
    ]));
    let extra = "EMAIL_COLUMN_LABEL=Correo\n\
                 FIRST_NAME_COLUMN_LABEL=Nombre\n\
                 LAST_NAME_COLUMN_LABEL=Apellido\n\
                 DRIVE_LINKS_COLUMN_LABEL=Archivos\n\
                 TIMESTAMP_COLUMN_LABEL=Marca temporal\n\
                 USER_FOLDER=email";
    let drive = Arc::new(FakeDrive::default());
    let ctx = context(dir.path(), extra, sheet, drive);

    let summary = reconcile::reconcile(&ctx).await.unwrap();
    assert_eq!(summary.files_downloaded, 1);

    let key: String = ts.chars().filter(|c| *c != '/' && *c != ':').collect::<String>().replace(' ', "_");
    let expected = PathBuf::from("ada@lab.edu").join(format!("A_{key}_1.stl"));
    assert_eq!(stl_files(&dir.path().join("files")), vec![expected]);
}

#[tokio::test]
async fn scheduler_runs_one_cycle_when_already_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let files_root = dir.path().join("files");
    fs::create_dir_all(files_root.join("Ghost")).unwrap();

    let sheet = Arc::new(lab_sheet(&days_ago(1), &days_ago(30)));
    let drive = Arc::new(FakeDrive::default());
    let ctx = Arc::new(context(dir.path(), "", sheet, drive.clone()));

    let (stop_tx, stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();
    let cycles = scheduler::run(ctx, stop_rx).await;

    assert_eq!(cycles, 1);
    assert_eq!(drive.requests().len(), 2);
    // the sweep ran after the reconcile
    assert!(!files_root.join("Ghost").exists());
    assert!(files_root.join("Ada_Lovelace").exists());
}

#[tokio::test]
async fn cycle_respects_toggles() {
    let dir = tempfile::tempdir().unwrap();
    let files_root = dir.path().join("files");
    fs::create_dir_all(files_root.join("Ghost")).unwrap();

    let sheet = Arc::new(lab_sheet(&days_ago(1), &days_ago(30)));
    let drive = Arc::new(FakeDrive::default());
    let ctx = context(dir.path(), "REMOVE_OLD_FILES=false", sheet, drive);

    let report = scheduler::run_cycle(&ctx).await.unwrap();
    assert!(report.reconcile.is_some());
    assert!(report.sweep.is_none());
    assert!(files_root.join("Ghost").exists());
}

#[tokio::test]
async fn failed_cycle_does_not_stop_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = Arc::new(lab_sheet(&days_ago(1), &days_ago(30)));
    let drive = Arc::new(FakeDrive::failing(&[ID_A]));
    let ctx = Arc::new(context(dir.path(), "FILE_REFRESH_RATE=0.001", sheet, drive.clone()));

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler::run(ctx, stop_rx));

    // 0.001 minutes is 60ms between cycles
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while drive.requests().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stop_tx.send(true).unwrap();

    let cycles = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("scheduler stops after signal")
        .unwrap();
    assert!(cycles >= 2);
}

#[tokio::test]
async fn stop_interrupts_the_wait() {
    let dir = tempfile::tempdir().unwrap();
    let sheet = Arc::new(lab_sheet(&days_ago(1), &days_ago(30)));
    let drive = Arc::new(FakeDrive::default());
    let ctx = Arc::new(context(dir.path(), "FILE_REFRESH_RATE=600", sheet, drive.clone()));

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler::run(ctx, stop_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while drive.requests().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stop_tx.send(true).unwrap();

    let cycles = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("scheduler stops without waiting out the interval")
        .unwrap();
    assert_eq!(cycles, 1);
}
