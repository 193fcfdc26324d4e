//! Integration tests for drive-share
//!
//! Everything runs against the in-memory sheet and folder stores; no
//! network access is needed.

use drive_share::config::{ShardSpec, WorkerConfig};
use drive_share::drive::{MemoryDrive, Permission, Role};
use drive_share::monitor::{collect_snapshots, MonitorLock, WorkerState};
use drive_share::resolver::ResolutionCache;
use drive_share::sheet::MemorySheet;
use drive_share::worklog::WorkLog;
use drive_share::BatchProcessor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const HEADER: &[&str] = &["Name", "Email", "FolderId", "isShared", "isFolderExists", "LastLog"];

fn worker_config(log_dir: &Path) -> WorkerConfig {
    let mut config = WorkerConfig::new("test-sheet");
    config.throttle = Duration::ZERO;
    config.throttle_jitter = Duration::ZERO;
    config.backoff_jitter = Duration::ZERO;
    config.show_progress = false;
    config.log_dir = log_dir.to_path_buf();
    config
}

fn processor(
    config: WorkerConfig,
    sheet: &Arc<MemorySheet>,
    drive: &Arc<MemoryDrive>,
    cache: ResolutionCache,
) -> BatchProcessor {
    let worklog = WorkLog::create(&config.log_dir, config.shard.index).unwrap();
    BatchProcessor::new(Arc::new(config), sheet.clone(), drive.clone(), cache, worklog)
}

fn log_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    files.sort();
    files
}

fn log_text(dir: &Path) -> String {
    log_files(dir)
        .iter()
        .map(|p| std::fs::read_to_string(p).unwrap())
        .collect()
}

#[tokio::test]
async fn test_scenario_done_resolvable_unresolvable() {
    let dir = tempdir().unwrap();
    let sheet = Arc::new(MemorySheet::new("Sheet1", HEADER));
    sheet.push_row(&["Done Person", "done@gmail.com", "", "true", "", ""]);
    sheet.push_row(&["Alice Smith", "alice@gmail.com"]);
    sheet.push_row(&["Ghost", "ghost@gmail.com"]);

    let drive = Arc::new(MemoryDrive::new());
    drive.add_folder("f-alice", "Alice Smith", None);

    let p = processor(worker_config(dir.path()), &sheet, &drive, ResolutionCache::empty());
    let stats = p.run_cycle().await.unwrap();

    assert_eq!(stats.eligible, 2);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.granted, 1);
    assert_eq!(stats.errors, 1);

    // Already done: untouched
    assert_eq!(sheet.cell(1, "isShared"), "true");
    assert_eq!(sheet.cell(1, "LastLog"), "");

    // Resolved and granted
    assert_eq!(sheet.cell(2, "isShared"), "true");
    assert_eq!(sheet.cell(2, "FolderId"), "f-alice");
    assert_eq!(sheet.cell(2, "isFolderExists"), "true");
    assert_eq!(drive.permissions("f-alice").len(), 1);

    // Not found
    assert_eq!(sheet.cell(3, "isShared"), "false");
    assert_eq!(sheet.cell(3, "isFolderExists"), "false");
    assert_eq!(drive.calls().create_permission, 1);

    let text = log_text(dir.path());
    assert!(text.contains("] [INFO] Processing 2 participants"));
    assert!(text.contains("GRANTED row=3 email=alice@gmail.com folder=f-alice"));
    assert!(text.contains(r#"ERROR row=4 name="Ghost" reason="folder not found""#));
    assert!(text.contains("Cycle summary: granted=1 dry_run=0 skipped=0 errors=1"));

    // The monitor sees the finished cycle
    let snapshots = collect_snapshots(dir.path(), 8, Duration::from_secs(15)).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].slot, 0);
    assert_eq!(snapshots[0].state, WorkerState::Completed);
    assert_eq!(snapshots[0].tally.granted, 1);
    assert_eq!(snapshots[0].tally.errors, 1);
    assert_eq!(snapshots[0].progress(), "2/2");
}

#[tokio::test]
async fn test_two_shards_partition_disjointly() {
    let dir = tempdir().unwrap();
    let names = ["Ann Lee", "Bob Ray", "Cid Moe", "Dee Fox"];
    let drive = Arc::new(MemoryDrive::new());
    let cache = ResolutionCache::from_entries(
        names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.to_string(), format!("f{}", i))),
    );
    for (i, name) in names.iter().enumerate() {
        drive.add_folder(&format!("f{}", i), name, None);
    }

    let mut granted = 0;
    for index in 0..2 {
        // Each worker reads its own copy of the same rows
        let sheet = Arc::new(MemorySheet::new("Sheet1", HEADER));
        for name in names {
            let email = format!("{}@gmail.com", name.to_lowercase().replace(' ', "."));
            sheet.push_row(&[name, email.as_str()]);
        }

        let mut config = worker_config(dir.path());
        config.shard = ShardSpec::new(2, index).unwrap();
        let p = processor(config, &sheet, &drive, cache.clone());
        let stats = p.run_cycle().await.unwrap();
        assert_eq!(stats.eligible, 4);
        assert_eq!(stats.processed + stats.not_owned, 4);
        granted += stats.granted;
    }

    assert_eq!(granted, 4);
    for i in 0..names.len() {
        assert_eq!(drive.permissions(&format!("f{}", i)).len(), 1);
    }
    // Cache hits only
    assert_eq!(drive.calls().search, 0);
    assert_eq!(log_files(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_dry_run_creates_nothing() {
    let dir = tempdir().unwrap();
    let sheet = Arc::new(MemorySheet::new("Sheet1", HEADER));
    sheet.push_row(&["Ann Lee", "ann@gmail.com", "f1"]);
    sheet.push_row(&["Bob Ray", "bob@gmail.com"]);

    let drive = Arc::new(MemoryDrive::new());
    drive.add_folder("f1", "Ann Lee", None);
    drive.add_folder("f2", "Bob Ray", None);

    let mut config = worker_config(dir.path());
    config.dry_run = true;
    let p = processor(config, &sheet, &drive, ResolutionCache::empty());
    let summary = p.run().await.unwrap();
    let stats = summary.totals;

    assert_eq!(summary.cycles, 1);
    assert_eq!(stats.dry_run, 2);
    assert_eq!(stats.granted, 0);
    assert_eq!(drive.calls().create_permission, 0);
    assert!(drive.permissions("f1").is_empty());

    // Status stays empty so a real run still picks the rows up
    assert_eq!(sheet.cell(1, "isShared"), "");
    assert_eq!(sheet.cell(2, "isShared"), "");
    assert!(sheet.cell(2, "LastLog").contains("DRY_RUN"));

    let text = log_text(dir.path());
    assert!(text.contains("dry_run=true"));
    assert!(text.contains("DRY_RUN row=2 email=ann@gmail.com folder=f1"));
    assert!(text.contains("DRY_RUN row=3 email=bob@gmail.com folder=f2"));
}

#[tokio::test]
async fn test_tri_state_gate() {
    let dir = tempdir().unwrap();
    let sheet = Arc::new(MemorySheet::new("Sheet1", HEADER));
    sheet.push_row(&["Ann Lee", "ann@gmail.com", "", "TRUE"]);
    sheet.push_row(&["Bob Ray", "bob@gmail.com", "", "false"]);
    sheet.push_row(&["Cid Moe", "cid@gmail.com", "", "pending"]);

    let drive = Arc::new(MemoryDrive::new());
    let p = processor(worker_config(dir.path()), &sheet, &drive, ResolutionCache::empty());
    let stats = p.run_cycle().await.unwrap();

    assert_eq!(stats.eligible, 0);
    assert_eq!(stats.processed, 0);
    assert_eq!(drive.calls().total(), 0);
    assert!(log_text(dir.path()).contains("Processing 0 participants"));
}

#[tokio::test]
async fn test_already_granted_is_idempotent() {
    let dir = tempdir().unwrap();
    let sheet = Arc::new(MemorySheet::new("Sheet1", HEADER));
    sheet.push_row(&["Ann Lee", "ann@gmail.com", "f1"]);

    let drive = Arc::new(MemoryDrive::new());
    drive.add_folder("f1", "Ann Lee", None);
    drive.add_permission(
        "f1",
        Permission {
            id: "existing".into(),
            kind: "user".into(),
            email_address: Some("ann@gmail.com".into()),
            role: Some(Role::Reader),
        },
    );

    let p = processor(worker_config(dir.path()), &sheet, &drive, ResolutionCache::empty());
    let first = p.run_cycle().await.unwrap();
    assert_eq!(first.skipped, 1);
    assert_eq!(sheet.cell(1, "isShared"), "true");
    assert!(sheet.cell(1, "LastLog").contains("SKIPPED: already has access"));
    assert_eq!(drive.calls().create_permission, 0);

    let second = p.run_cycle().await.unwrap();
    assert_eq!(second.processed, 0);
    assert!(log_text(dir.path()).contains("SKIP row=2 reason=already-granted name=\"Ann Lee\""));
}

#[tokio::test]
async fn test_invalid_rows_never_reach_the_folder_store() {
    let dir = tempdir().unwrap();
    let sheet = Arc::new(MemorySheet::new("Sheet1", HEADER));
    sheet.push_row(&["   ", "ann@gmail.com"]);
    sheet.push_row(&["Bob Ray", "not-an-email"]);
    sheet.push_row(&["Cid Moe", "cid@example.org"]);

    let drive = Arc::new(MemoryDrive::new());
    let p = processor(worker_config(dir.path()), &sheet, &drive, ResolutionCache::empty());
    let stats = p.run_cycle().await.unwrap();

    assert_eq!(stats.skipped, 3);
    assert_eq!(drive.calls().total(), 0);
    for row in 1..=3 {
        assert_eq!(sheet.cell(row, "isShared"), "false");
        assert!(sheet.cell(row, "LastLog").contains("invalid format"));
    }
    assert_eq!(log_text(dir.path()).matches("reason=invalid-format").count(), 3);
}

#[tokio::test]
async fn test_missing_columns_are_appended() {
    let dir = tempdir().unwrap();
    let sheet = Arc::new(MemorySheet::new("Sheet1", &["Full Name", "E-mail"]));
    sheet.push_row(&["Ann Lee", "ann@gmail.com"]);

    let drive = Arc::new(MemoryDrive::new());
    drive.add_folder("f1", "Ann Lee", None);
    let p = processor(worker_config(dir.path()), &sheet, &drive, ResolutionCache::empty());
    p.run_cycle().await.unwrap();

    assert_eq!(
        sheet.rows()[0],
        vec!["Full Name", "E-mail", "FolderId", "isShared", "isFolderExists", "LastLog"]
    );
    assert_eq!(sheet.cell(1, "isShared"), "true");
    assert_eq!(sheet.cell(1, "FolderId"), "f1");
}

#[test]
fn test_monitor_running_mid_cycle() {
    let dir = tempdir().unwrap();
    let mut text = String::from("[2026-01-05T10:00:00.000Z] [INFO] Processing 10 participants\n");
    for i in 0..6 {
        text.push_str(&format!(
            "[2026-01-05T10:00:0{}.000Z] [INFO] GRANTED row={} email=user{}@gmail.com folder=f{} elapsed_ms=5\n",
            i,
            i + 2,
            i,
            i
        ));
    }
    std::fs::write(dir.path().join("worker-3-20260105T100000000Z.log"), text).unwrap();

    let snapshots = collect_snapshots(dir.path(), 8, Duration::from_secs(15)).unwrap();
    assert_eq!(snapshots.len(), 1);
    let s = &snapshots[0];
    assert_eq!(s.slot, 3);
    assert_eq!(s.state, WorkerState::Running);
    assert_eq!(s.progress(), "6/10");
    assert_eq!(s.tally.current.as_deref(), Some("user5"));
}

#[test]
fn test_stale_monitor_lock_is_replaced() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(".monitor.lock");
    std::fs::write(&path, "999999999").unwrap();

    let lock = MonitorLock::acquire(&path).unwrap();
    assert!(MonitorLock::acquire(&path).is_err());
    drop(lock);
    assert!(!path.exists());
}
