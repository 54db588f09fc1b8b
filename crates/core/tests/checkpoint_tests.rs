//! Interrupt and resume a batch task through its checkpoint file.

use std::fs;

use serde_json::{json, Map};
use tempfile::TempDir;
use vdjm_core::{
    run_batch, BatchOptions, BatchOutcome, CheckpointStore, TaskControl, TaskStatus, TaskType,
};

fn paths(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("/music/track_{:02}.mp3", i)).collect()
}

#[test]
fn test_interrupted_normalize_resumes_pending_only() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path());

    let mut config = Map::new();
    config.insert("target_lufs".to_string(), json!(-14.0));
    let mut state = store.create_task(TaskType::Normalize, paths(10), config);
    let task_id = state.task_id.clone();

    // Six items succeed, the seventh fails and the user pauses.
    let control = TaskControl::new();
    let pauser = control.clone();
    let mut seen = 0;
    let summary = run_batch(
        &mut state,
        &store,
        &control,
        BatchOptions { checkpoint_every: 4 },
        |path| {
            seen += 1;
            if seen == 7 {
                pauser.pause();
                return Err("ffmpeg exited with status 1".to_string());
            }
            Ok(json!({ "path": path, "gain_db": -2.5 }))
        },
    )
    .unwrap();

    assert_eq!(summary.outcome, BatchOutcome::Paused);
    assert_eq!(summary.succeeded, 6);
    assert_eq!(summary.failed, 1);

    // A fresh store sees what was written to disk.
    let reopened = CheckpointStore::new(dir.path());
    let loaded = reopened.load(&task_id).unwrap();
    assert_eq!(loaded.status, TaskStatus::Paused);
    assert_eq!(loaded.completed_paths.len(), 6);
    assert_eq!(loaded.failed_paths.len(), 1);
    assert_eq!(loaded.pending_paths, paths(10)[7..].to_vec());
    assert_eq!(loaded.results.len(), 6);
    assert_eq!(loaded.config["target_lufs"], json!(-14.0));
    assert!((loaded.progress_percent() - 70.0).abs() < 1e-9);

    let resumable = reopened.list_resumable();
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].task_id, task_id);

    let mut resumed = reopened.resume(&task_id).unwrap().unwrap();
    let mut processed = Vec::new();
    let summary = run_batch(
        &mut resumed,
        &reopened,
        &TaskControl::new(),
        BatchOptions::default(),
        |path| {
            processed.push(path.to_string());
            Ok(json!({ "path": path }))
        },
    )
    .unwrap();

    assert_eq!(processed, paths(10)[7..].to_vec());
    assert_eq!(summary.outcome, BatchOutcome::Finished);
    assert_eq!(resumed.status, TaskStatus::Completed);
    assert_eq!(resumed.completed_paths.len(), 9);
    assert_eq!(resumed.failed_paths.len(), 1);
    assert!(resumed.pending_paths.is_empty());
    assert!(reopened.list_resumable().is_empty());
}

#[test]
fn test_reads_naive_timestamps() {
    let dir = TempDir::new().unwrap();
    let json = r#"{
        "task_id": "measure_20240101_120000_abcd1234",
        "task_type": "measure",
        "status": "paused",
        "total_items": 3,
        "completed_paths": ["/a.mp3"],
        "pending_paths": ["/b.mp3", "/c.mp3"],
        "failed_paths": {},
        "config": {"target_lufs": -14.0},
        "results": [{"file_path": "/a.mp3", "integrated_lufs": -9.1}],
        "created_at": "2024-01-01T12:00:00.123456",
        "updated_at": "2024-01-01T12:05:00"
    }"#;
    fs::write(
        dir.path().join("measure_20240101_120000_abcd1234.json"),
        json,
    )
    .unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

    let store = CheckpointStore::new(dir.path());
    let state = store.load("measure_20240101_120000_abcd1234").unwrap();
    assert_eq!(state.task_type, TaskType::Measure);
    assert!(state.is_resumable());
    assert!(state.updated_at > state.created_at);

    assert!(store.load("broken").is_none());
    assert_eq!(store.list_checkpoints().len(), 1);
    assert_eq!(store.list_incomplete().len(), 1);
}
