use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;

use filesage_core::{EntryKind, FileRecord, RunMetadata, RunOptions, RunStatus};
use filesage_scan::{
    ControllerSettings, RunController, RunError, RunOutcome, ScanError, TreeWalker, WarningKind,
    hash_file,
};
use filesage_store::{LogSelector, Store, StoreError};
use tempfile::TempDir;
use tokio::sync::broadcast::error::RecvError;

fn hashed() -> RunOptions {
    RunOptions::builder().hashing_enabled(true).build().unwrap()
}

/// Five regular files, two with identical content, one symlink.
fn create_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("a"), "X").unwrap();
    fs::write(root.join("b"), "X").unwrap();
    fs::write(root.join("c"), "Y").unwrap();
    fs::write(root.join("sub/d"), "dddd").unwrap();
    fs::write(root.join("sub/e"), "eeeee").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("a", root.join("link")).unwrap();
    temp
}

/// Enough files that a single-record batch size keeps the walk busy for a while.
fn create_wide_tree(root: &Path) -> u64 {
    const DIRS: usize = 20;
    const FILES_PER_DIR: usize = 25;
    for d in 0..DIRS {
        let dir = root.join(format!("dir{d:02}"));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..FILES_PER_DIR {
            fs::write(dir.join(format!("file{f:02}")), format!("content {d} {f}")).unwrap();
        }
    }
    (DIRS * FILES_PER_DIR) as u64
}

fn one_record_batches() -> ControllerSettings {
    ControllerSettings::builder()
        .batch_size(1usize)
        .progress_every(1u64)
        .build()
        .unwrap()
}

fn expected_records() -> u64 {
    if cfg!(unix) { 6 } else { 5 }
}

fn log_lines(store: &Store, run: i64) -> Vec<String> {
    store
        .print_log(LogSelector::Run(run))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn test_full_scan_records_and_hashes() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();

    let summary = RunController::new(&mut store, ControllerSettings::default())
        .start(temp.path(), hashed(), RunMetadata::default())
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(!summary.resumed);
    assert_eq!(summary.files_recorded, expected_records());
    assert_eq!(summary.files_hashed, 5);
    assert_eq!(summary.bytes_recorded, 1 + 1 + 1 + 4 + 5);
    assert!(summary.warnings.is_empty());

    let run = store.get_run(summary.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.finished_at.is_some());
    assert_eq!(run.root, temp.path().canonicalize().unwrap());

    let records = store.records_for_run(summary.run_id).unwrap();
    let a = records.iter().find(|r| r.path.ends_with("a")).unwrap();
    let b = records.iter().find(|r| r.path.ends_with("b")).unwrap();
    assert!(a.is_content_duplicate_of(b));
    assert_eq!(a.content_hash, Some(hash_file(&a.path).unwrap()));
    assert!(!records.iter().any(|r| r.kind == EntryKind::Directory));

    #[cfg(unix)]
    {
        let link = records.iter().find(|r| r.kind == EntryKind::Symlink).unwrap();
        assert!(link.content_hash.is_none());
        assert_eq!(link.link_target.as_deref(), Some(Path::new("a")));
    }
}

#[test]
fn test_scan_without_hashing() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();

    let summary = RunController::new(&mut store, ControllerSettings::default())
        .start(temp.path(), RunOptions::default(), RunMetadata::default())
        .unwrap();

    assert_eq!(summary.files_hashed, 0);
    let records = store.records_for_run(summary.run_id).unwrap();
    assert!(records.iter().all(|r| r.content_hash.is_none()));
}

#[test]
fn test_resume_appends_after_partial_run() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();
    let root = temp.path().canonicalize().unwrap();

    // Simulate a run that recorded three of the five files before dying.
    let run_id = store.begin_run(&root, &hashed(), &RunMetadata::default()).unwrap();
    let walker = TreeWalker::new(&root, &hashed()).unwrap();
    let partial: Vec<FileRecord> = walker
        .walk()
        .filter_map(Result::ok)
        .filter(|e| e.is_regular())
        .take(3)
        .map(|e| {
            let hash = hash_file(&e.path).ok();
            FileRecord::from_entry(run_id, e, hash)
        })
        .collect();
    store.record_files(&partial).unwrap();
    let before = store.records_for_run(run_id).unwrap();
    assert_eq!(before.len(), 3);

    let summary = RunController::new(&mut store, ControllerSettings::default())
        .resume(run_id)
        .unwrap();
    assert_eq!(summary.run_id, run_id);
    assert!(summary.resumed);

    let after = store.records_for_run(run_id).unwrap();
    assert!(after.len() >= 5 + 3);
    assert_eq!(&after[..3], &before[..]);
    assert_eq!(store.get_run(run_id).unwrap().status, RunStatus::Completed);

    let lines = log_lines(&store, run_id);
    assert!(lines.iter().any(|l| l.contains("Resumed scan")));
    assert!(lines.iter().any(|l| l.contains("Finished:")));
}

#[test]
fn test_start_auto_resumes_unfinished_run() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let stale = store.begin_run(&root, &hashed(), &RunMetadata::default()).unwrap();

    let summary = RunController::new(&mut store, ControllerSettings::default())
        .start(&root, RunOptions::default(), RunMetadata::default())
        .unwrap();

    assert_eq!(summary.run_id, stale);
    assert!(summary.resumed);
    // The original options are kept, and the mismatch is reported.
    assert_eq!(summary.files_hashed, 5);
    assert!(summary.ignored_options);
    assert!(
        log_lines(&store, stale)
            .iter()
            .any(|l| l.contains("requested options ignored"))
    );
}

#[test]
fn test_auto_resume_with_matching_options_reports_nothing() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let stale = store.begin_run(&root, &hashed(), &RunMetadata::default()).unwrap();

    let summary = RunController::new(&mut store, ControllerSettings::default())
        .start(&root, hashed(), RunMetadata::default())
        .unwrap();

    assert_eq!(summary.run_id, stale);
    assert!(!summary.ignored_options);
}

#[test]
fn test_skip_resume_starts_fresh() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let stale = store.begin_run(&root, &hashed(), &RunMetadata::default()).unwrap();

    let settings = ControllerSettings::builder().skip_resume(true).build().unwrap();
    let summary = RunController::new(&mut store, settings)
        .start(&root, hashed(), RunMetadata::default())
        .unwrap();

    assert_ne!(summary.run_id, stale);
    assert!(store.get_run(stale).unwrap().skip_resume);
    assert!(matches!(
        store.resume_run(stale),
        Err(StoreError::RunNotResumable { .. })
    ));
}

#[test]
fn test_cancelled_run_is_resumable() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();

    let mut controller = RunController::new(&mut store, ControllerSettings::default());
    controller.cancel_flag().store(true, Ordering::SeqCst);
    let summary = controller
        .start(temp.path(), hashed(), RunMetadata::default())
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Interrupted);

    let run = store.get_run(summary.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.finished_at.is_none());
    assert!(log_lines(&store, summary.run_id).iter().any(|l| l.contains("Interrupted")));

    let resumed = RunController::new(&mut store, ControllerSettings::default())
        .resume(summary.run_id)
        .unwrap();
    assert_eq!(resumed.outcome, RunOutcome::Completed);
    assert_eq!(resumed.files_recorded, expected_records());
}

#[test]
fn test_interrupt_mid_walk_then_resume() {
    let temp = TempDir::new().unwrap();
    let total = create_wide_tree(temp.path());
    let mut store = Store::open_in_memory().unwrap();

    let mut controller = RunController::new(&mut store, one_record_batches());
    let cancel = controller.cancel_flag();
    let mut rx = controller.subscribe();
    let canceller = thread::spawn(move || {
        loop {
            match rx.blocking_recv() {
                Ok(progress) if progress.files_recorded > 0 => {
                    cancel.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
    let summary = controller
        .start(temp.path(), hashed(), RunMetadata::default())
        .unwrap();
    drop(controller);
    canceller.join().unwrap();

    assert_eq!(summary.outcome, RunOutcome::Interrupted);
    let rows = store.count_records(summary.run_id).unwrap();
    assert!(rows > 0 && rows < total, "{rows} of {total} recorded");
    assert_eq!(store.get_run(summary.run_id).unwrap().status, RunStatus::Running);
    let before = store.records_for_run(summary.run_id).unwrap();

    let resumed = RunController::new(&mut store, ControllerSettings::default())
        .resume(summary.run_id)
        .unwrap();
    assert_eq!(resumed.outcome, RunOutcome::Completed);
    assert_eq!(resumed.run_id, summary.run_id);

    let after = store.records_for_run(summary.run_id).unwrap();
    assert!(after.len() as u64 >= total);
    assert_eq!(&after[..before.len()], &before[..]);
    let paths: std::collections::HashSet<_> = after.iter().map(|r| &r.path).collect();
    assert_eq!(paths.len() as u64, total);
    assert_eq!(store.get_run(summary.run_id).unwrap().status, RunStatus::Completed);
}

#[test]
fn test_root_vanishing_mid_walk_fails_run() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    create_wide_tree(&root);
    let moved = temp.path().join("moved");
    let mut store = Store::open_in_memory().unwrap();

    let mut controller = RunController::new(&mut store, one_record_batches());
    let mut rx = controller.subscribe();
    let (from, to) = (root.clone(), moved.clone());
    let remover = thread::spawn(move || {
        loop {
            match rx.blocking_recv() {
                Ok(progress) if progress.files_recorded > 0 => {
                    fs::rename(&from, &to).unwrap();
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
    let err = controller
        .start(&root, hashed(), RunMetadata::default())
        .unwrap_err();
    drop(controller);
    remover.join().unwrap();
    fs::remove_dir_all(&moved).unwrap();

    assert!(matches!(err, RunError::Scan(ScanError::RootNotFound { .. })));
    let runs = store.list_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(log_lines(&store, runs[0].id).iter().any(|l| l.contains("Failed:")));
}

#[cfg(unix)]
#[test]
fn test_unreadable_root_fails_run() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("inside"), "i").unwrap();
    let canonical = root.canonicalize().unwrap();
    fs::set_permissions(&root, fs::Permissions::from_mode(0o000)).unwrap();

    // Permission bits do not apply to a privileged user.
    if fs::read_dir(&root).is_ok() {
        fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let mut store = Store::open_in_memory().unwrap();
    let result = RunController::new(&mut store, ControllerSettings::default())
        .start(&root, hashed(), RunMetadata::default());
    fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        RunError::Scan(ScanError::EntryUnreadable { ref path, .. }) if *path == canonical
    ));
    let runs = store.list_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
}

#[test]
fn test_missing_root_creates_no_run() {
    let temp = TempDir::new().unwrap();
    let mut store = Store::open_in_memory().unwrap();

    let err = RunController::new(&mut store, ControllerSettings::default())
        .start(&temp.path().join("gone"), hashed(), RunMetadata::default())
        .unwrap_err();
    assert!(matches!(err, RunError::Scan(ScanError::RootNotFound { .. })));
    assert!(store.list_runs().unwrap().is_empty());
}

#[test]
fn test_resume_with_vanished_root_fails_run() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();
    let root = temp.path().join("sub").canonicalize().unwrap();
    let run_id = store.begin_run(&root, &hashed(), &RunMetadata::default()).unwrap();
    fs::remove_dir_all(&root).unwrap();

    let err = RunController::new(&mut store, ControllerSettings::default())
        .resume(run_id)
        .unwrap_err();
    assert!(matches!(err, RunError::Scan(ScanError::RootNotFound { .. })));
    assert_eq!(store.get_run(run_id).unwrap().status, RunStatus::Failed);
    assert!(log_lines(&store, run_id).iter().any(|l| l.contains("Failed:")));
}

#[test]
fn test_small_batches_and_progress() {
    let temp = create_tree();
    let mut store = Store::open_in_memory().unwrap();
    let settings = ControllerSettings::builder()
        .batch_size(2usize)
        .progress_every(1u64)
        .build()
        .unwrap();

    let controller = RunController::new(&mut store, settings);
    let mut rx = controller.subscribe();
    let mut controller = controller;
    let summary = controller
        .start(temp.path(), hashed(), RunMetadata::default())
        .unwrap();

    let mut last = None;
    while let Ok(progress) = rx.try_recv() {
        last = Some(progress);
    }
    let last = last.expect("at least one progress update");
    assert_eq!(last.run_id, summary.run_id);
    assert_eq!(last.files_recorded, expected_records());
    assert_eq!(store.count_records(summary.run_id).unwrap(), expected_records());
}

#[cfg(unix)]
#[test]
fn test_hardlinks_counted_once() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("one"), "0123456789").unwrap();
    fs::hard_link(temp.path().join("one"), temp.path().join("two")).unwrap();
    let mut store = Store::open_in_memory().unwrap();

    let summary = RunController::new(&mut store, ControllerSettings::default())
        .start(temp.path(), hashed(), RunMetadata::default())
        .unwrap();

    assert_eq!(summary.files_recorded, 2);
    assert_eq!(summary.bytes_recorded, 20);
    assert_eq!(summary.unique_bytes, 10);
    let records = store.records_for_run(summary.run_id).unwrap();
    assert!(records.iter().all(|r| r.nlink == 2));
}

#[cfg(unix)]
#[test]
fn test_unreadable_entries_are_contained() {
    use std::os::unix::fs::PermissionsExt;

    let temp = create_tree();
    let locked_dir = temp.path().join("locked");
    fs::create_dir(&locked_dir).unwrap();
    fs::write(locked_dir.join("secret"), "s").unwrap();
    let locked_file = temp.path().join("sub/unreadable");
    fs::write(&locked_file, "u").unwrap();
    fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o000)).unwrap();
    fs::set_permissions(&locked_file, fs::Permissions::from_mode(0o000)).unwrap();

    // Permission bits do not apply to a privileged user.
    if fs::read_dir(&locked_dir).is_ok() {
        fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let mut store = Store::open_in_memory().unwrap();
    let summary = RunController::new(&mut store, ControllerSettings::default())
        .start(temp.path(), hashed(), RunMetadata::default())
        .unwrap();
    fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(summary.warnings.iter().any(|w| w.kind == WarningKind::UnreadableEntry));
    assert!(summary.warnings.iter().any(|w| w.kind == WarningKind::HashFailed));

    let records = store.records_for_run(summary.run_id).unwrap();
    // Siblings were still recorded; the unreadable file is kept without a hash.
    assert!(records.iter().any(|r| r.path.ends_with("sub/e") && r.content_hash.is_some()));
    let unreadable = records.iter().find(|r| r.path.ends_with("sub/unreadable")).unwrap();
    assert!(unreadable.content_hash.is_none());

    let lines = log_lines(&store, summary.run_id);
    assert!(lines.iter().any(|l| l.contains("Hash failed")));
    assert!(lines.iter().any(|l| l.contains("Unreadable entry")));
}
