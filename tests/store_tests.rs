//! Task store behavior against the in-memory remote.

mod fixtures;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use armada::error::ArmadaError;
use armada::provider::{VmRecord, VmStatus};
use armada::remote::Remote;
use armada::tasks::{Task, TaskMetadata, TaskStatus, TaskStore};
use armada::voyage::Voyage;

use fixtures::{FakeRemote, task_path};

fn storage_vm() -> VmRecord {
    VmRecord {
        id: "storage".to_string(),
        name: "storage".to_string(),
        ssh_dest: "test@storage".to_string(),
        status: VmStatus::Running,
    }
}

fn sample_task(id: &str) -> Task {
    let stamp = Utc.with_ymd_and_hms(2026, 1, 24, 10, 0, 0).unwrap();
    Task {
        id: id.to_string(),
        title: format!("Task {id}"),
        description: "do the thing".to_string(),
        status: TaskStatus::Pending,
        blocked_by: Vec::new(),
        blocks: Vec::new(),
        created: stamp,
        updated: stamp,
        metadata: TaskMetadata::default(),
        extra: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn write_then_read_roundtrip() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    let mut task = sample_task("task-001");
    task.extra
        .insert("priority".to_string(), serde_json::Value::from("high"));

    let written = store.write_task(&storage, &voyage, task).await.unwrap();
    let read = store
        .read_task(&storage, &voyage, "task-001")
        .await
        .unwrap();

    assert_eq!(read, written);
    assert_eq!(read.extra.get("priority"), Some(&serde_json::Value::from("high")));
}

#[tokio::test]
async fn write_stamps_updated() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    let task = sample_task("task-001");
    let before = task.updated;
    let written = store.write_task(&storage, &voyage, task).await.unwrap();

    assert!(written.updated > before);
}

#[tokio::test]
async fn writes_go_through_temp_file_and_rename() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    store
        .write_task(&storage, &voyage, sample_task("task-001"))
        .await
        .unwrap();

    let path = task_path(&voyage.task_set_id, "task-001");
    let commands = remote.commands_for(&storage.ssh_dest);
    assert!(
        commands.iter().any(|c| c == &format!("mv {path}.tmp {path}")),
        "expected an atomic rename, got {commands:?}"
    );
    // The temp file must not survive the rename.
    assert!(remote.file(&storage.ssh_dest, &format!("{path}.tmp")).is_none());
    assert!(remote.file(&storage.ssh_dest, &path).is_some());
}

#[tokio::test]
async fn list_empty_directory_is_planning_not_error() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    let listing = store.list_tasks(&storage, &voyage).await.unwrap();
    assert!(listing.tasks.is_empty());
    assert!(listing.skipped.is_empty());
}

#[tokio::test]
async fn list_skips_unparseable_files() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    store
        .write_task(&storage, &voyage, sample_task("task-001"))
        .await
        .unwrap();
    remote.write_file(
        &storage.ssh_dest,
        &task_path(&voyage.task_set_id, "task-002"),
        b"{not json",
    );

    let listing = store.list_tasks(&storage, &voyage).await.unwrap();
    assert_eq!(listing.tasks.len(), 1);
    assert_eq!(listing.tasks[0].id, "task-001");
    assert_eq!(listing.skipped.len(), 1);
}

#[tokio::test]
async fn read_missing_task_is_not_found() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    let err = store
        .read_task(&storage, &voyage, "task-404")
        .await
        .unwrap_err();
    assert!(matches!(err, ArmadaError::NotFound(_)));
}

#[tokio::test]
async fn reset_clears_claim_and_is_idempotent() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    let mut task = sample_task("task-001");
    task.status = TaskStatus::InProgress;
    task.metadata.assignee = Some("ship-0".to_string());
    task.metadata.claimed_at = Some(Utc::now() - Duration::minutes(45));
    store.write_task(&storage, &voyage, task).await.unwrap();

    let reset = store
        .reset_task(&storage, &voyage, "task-001")
        .await
        .unwrap();
    assert_eq!(reset.status, TaskStatus::Pending);
    assert!(reset.metadata.assignee.is_none());
    assert!(reset.metadata.claimed_at.is_none());

    let again = store
        .reset_task(&storage, &voyage, "task-001")
        .await
        .unwrap();
    assert_eq!(again, reset);
}

#[tokio::test]
async fn reset_preserves_completion_history() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    let mut task = sample_task("task-001");
    task.status = TaskStatus::InProgress;
    task.metadata.assignee = Some("ship-2".to_string());
    task.metadata.claimed_at = Some(Utc::now());
    task.metadata.completed_by = Some("ship-1".to_string());
    task.metadata.completed_at = Some(Utc::now() - Duration::hours(1));
    store.write_task(&storage, &voyage, task).await.unwrap();

    let reset = store
        .reset_task(&storage, &voyage, "task-001")
        .await
        .unwrap();
    assert_eq!(reset.metadata.completed_by.as_deref(), Some("ship-1"));
    assert!(reset.metadata.completed_at.is_some());
}

#[tokio::test]
async fn unknown_metadata_keys_survive_reset() {
    let remote = Arc::new(FakeRemote::new());
    let store = TaskStore::new(remote.clone());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();

    // A foreign writer added fields this version does not know about.
    let path = task_path(&voyage.task_set_id, "task-001");
    remote.write_file(
        &storage.ssh_dest,
        &path,
        br#"{
            "id": "task-001",
            "title": "T",
            "status": "in_progress",
            "blockedBy": [],
            "blocks": [],
            "created": "2026-01-24T10:00:00+00:00",
            "updated": "2026-01-24T10:00:00+00:00",
            "retries": 2,
            "metadata": {"assignee": "ship-0", "claimed_at": "2026-01-24T10:00:00+00:00", "agent_version": "2.4"}
        }"#,
    );

    let reset = store
        .reset_task(&storage, &voyage, "task-001")
        .await
        .unwrap();
    assert_eq!(reset.extra.get("retries"), Some(&serde_json::Value::from(2)));
    assert_eq!(
        reset.metadata.extra.get("agent_version"),
        Some(&serde_json::Value::from("2.4"))
    );

    // And they are still on disk after the write-back.
    let raw = remote.file(&storage.ssh_dest, &path).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(value["retries"], 2);
    assert_eq!(value["metadata"]["agent_version"], "2.4");
}

#[tokio::test]
async fn concurrent_overwrite_leaves_file_parseable() {
    // Two writers race on the same task; whichever rename lands last wins,
    // and the file is always one of the two complete versions.
    let remote = Arc::new(FakeRemote::new());
    let voyage = Voyage::create("obj", "acme/widgets", 1);
    let storage = storage_vm();
    let path = task_path(&voyage.task_set_id, "task-001");

    let store_a = TaskStore::new(remote.clone() as Arc<dyn Remote>);
    let store_b = TaskStore::new(remote.clone() as Arc<dyn Remote>);

    let mut one = sample_task("task-001");
    one.title = "version one".to_string();
    let mut two = sample_task("task-001");
    two.title = "version two".to_string();

    let (a, b) = tokio::join!(
        store_a.write_task(&storage, &voyage, one),
        store_b.write_task(&storage, &voyage, two),
    );
    a.unwrap();
    b.unwrap();

    let raw = remote.file(&storage.ssh_dest, &path).unwrap();
    let parsed: Task = serde_json::from_slice(&raw).unwrap();
    assert!(parsed.title == "version one" || parsed.title == "version two");
}
