use daybook_core::validator::collection_shape;
use daybook_core::{
    encode, KeyValueStore, MemoryKeyValueStore, PersistentState, StorageError, StorageKey,
    StorageOptions,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "@planner_tasks";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Task {
    id: String,
    title: String,
}

fn key() -> StorageKey {
    StorageKey::parse(KEY).unwrap()
}

fn seeded(raw: &str) -> Arc<MemoryKeyValueStore> {
    Arc::new(MemoryKeyValueStore::new().with_item(KEY, raw))
}

async fn open_strings(
    backend: &Arc<MemoryKeyValueStore>,
    options: StorageOptions,
) -> PersistentState<Vec<String>> {
    PersistentState::open(backend.clone(), key(), Vec::new(), options).await
}

#[tokio::test]
async fn absent_key_loads_initial_value() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let state = PersistentState::new(
        backend.clone(),
        key(),
        vec!["seed".to_string()],
        StorageOptions::default(),
    );
    assert!(state.is_loading());

    let snapshot = state.load().await;
    assert_eq!(snapshot.data, vec!["seed".to_string()]);
    assert!(!snapshot.is_loading);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn literal_null_is_treated_as_absent() {
    for raw in ["null", "undefined", ""] {
        let backend = seeded(raw);
        let state = open_strings(&backend, StorageOptions::default()).await;
        assert!(state.data().is_empty());
        assert!(state.error().is_none(), "unexpected error for `{raw}`");
    }
}

#[tokio::test]
async fn malformed_payload_is_cleared_and_falls_back() {
    let backend = seeded("{not json");
    let state = open_strings(&backend, StorageOptions::default()).await;

    assert!(state.data().is_empty());
    assert!(matches!(state.error(), Some(StorageError::Malformed { .. })));
    assert_eq!(backend.peek(KEY), None);
}

#[tokio::test]
async fn legacy_hash_falls_back_to_initial_and_is_left_in_place() {
    let hash = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
    let backend = seeded(hash);
    let state = open_strings(&backend, StorageOptions::default().with_encryption(true)).await;

    assert!(state.data().is_empty());
    assert!(matches!(state.error(), Some(StorageError::LegacyFormat { .. })));
    assert_eq!(backend.peek(KEY).as_deref(), Some(hash));
}

#[tokio::test]
async fn numeric_legacy_hash_is_not_adopted_without_encryption() {
    let hash = "1".repeat(64);
    let backend = seeded(&hash);
    let state: PersistentState<serde_json::Value> = PersistentState::open(
        backend.clone(),
        key(),
        serde_json::json!([]),
        StorageOptions::default(),
    )
    .await;

    assert_eq!(state.data(), serde_json::json!([]));
    assert!(matches!(state.error(), Some(StorageError::LegacyFormat { .. })));
}

#[tokio::test]
async fn malformed_collection_elements_are_dropped() {
    let backend = seeded(
        r#"[{"id":"1","title":"stretch"},{"title":"no id"},{"id":"3","title":"journal"}]"#,
    );
    let state = PersistentState::with_shape(
        backend.clone(),
        key(),
        Vec::<Task>::new(),
        StorageOptions::default(),
        collection_shape::<Task>(),
    );
    state.load().await;

    let ids = state.data().into_iter().map(|task| task.id).collect::<Vec<_>>();
    assert_eq!(ids, vec!["1".to_string(), "3".to_string()]);
    assert!(state.error().is_none());
}

#[tokio::test]
async fn wrong_top_level_shape_discards_payload() {
    let backend = seeded(r#"{"id":"1","title":"not a list"}"#);
    let state = PersistentState::with_shape(
        backend.clone(),
        key(),
        Vec::<Task>::new(),
        StorageOptions::default(),
        collection_shape::<Task>(),
    );
    state.load().await;

    assert!(state.data().is_empty());
    assert!(matches!(
        state.error(),
        Some(StorageError::ShapeValidation { .. })
    ));
    assert_eq!(backend.peek(KEY), None);
}

#[tokio::test]
async fn encrypted_payload_round_trips_through_storage() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let options = StorageOptions::default().with_encryption(true);
    let state = open_strings(&backend, options).await;
    state.save(vec!["meditate".to_string()]).await;

    let raw = backend.peek(KEY).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&raw).is_err());
    assert_eq!(raw, encode(r#"["meditate"]"#));

    let reopened = open_strings(&backend, options).await;
    assert_eq!(reopened.data(), vec!["meditate".to_string()]);
}

#[tokio::test]
async fn plain_payload_is_migrated_to_encoded_on_read() {
    let backend = seeded(r#"["a","b"]"#);
    let state = open_strings(&backend, StorageOptions::default().with_encryption(true)).await;

    assert_eq!(state.data(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(backend.peek(KEY), Some(encode(r#"["a","b"]"#)));
    assert_eq!(backend.write_count(KEY), 1);
}

#[tokio::test]
async fn encoded_payload_is_readable_with_encryption_disabled() {
    let backend = seeded(&encode(r#"["a"]"#));
    let state = open_strings(&backend, StorageOptions::default()).await;
    assert_eq!(state.data(), vec!["a".to_string()]);
    assert_eq!(backend.write_count(KEY), 0);
}

#[tokio::test(start_paused = true)]
async fn saves_inside_debounce_window_collapse_into_one_write() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let options = StorageOptions::default().with_debounce(Duration::from_millis(500));
    let state = open_strings(&backend, options).await;

    state.save(vec!["first".to_string()]).await;
    state
        .update(|prev| {
            let mut next = prev.clone();
            next.push("second".to_string());
            next
        })
        .await;
    assert_eq!(state.data(), vec!["first".to_string(), "second".to_string()]);
    state.save(vec!["third".to_string()]).await;

    assert_eq!(state.data(), vec!["third".to_string()]);
    assert_eq!(backend.write_count(KEY), 0);
    assert!(state.has_pending_write());

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(backend.write_count(KEY), 1);
    assert_eq!(backend.peek(KEY).as_deref(), Some(r#"["third"]"#));
    assert!(!state.has_pending_write());
}

#[tokio::test(start_paused = true)]
async fn flush_writes_pending_value_immediately() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let options = StorageOptions::default().with_debounce(Duration::from_secs(1));
    let state = open_strings(&backend, options).await;

    state.save(vec!["now".to_string()]).await;
    state.flush().await;
    assert_eq!(backend.write_count(KEY), 1);
    assert!(!state.has_pending_write());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.write_count(KEY), 1);

    state.flush().await;
    assert_eq!(backend.write_count(KEY), 1);
}

#[tokio::test(start_paused = true)]
async fn reload_persists_pending_save_before_reading() {
    let backend = seeded(r#"["old"]"#);
    let options = StorageOptions::default().with_debounce(Duration::from_millis(500));
    let state = open_strings(&backend, options).await;
    assert_eq!(state.data(), vec!["old".to_string()]);

    state.save(vec!["new edit".to_string()]).await;
    let snapshot = state.reload().await;

    assert_eq!(snapshot.data, vec!["new edit".to_string()]);
    assert_eq!(backend.peek(KEY).as_deref(), Some(r#"["new edit"]"#));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(state.data(), vec!["new edit".to_string()]);
    assert_eq!(backend.peek(KEY).as_deref(), Some(r#"["new edit"]"#));
    assert_eq!(backend.write_count(KEY), 1);
}

#[tokio::test(start_paused = true)]
async fn reload_keeps_edit_whose_pending_write_failed() {
    let backend = seeded(r#"["old"]"#);
    let options = StorageOptions::default().with_debounce(Duration::from_millis(500));
    let state = open_strings(&backend, options).await;

    state.save(vec!["offline edit".to_string()]).await;
    backend.set_fail_writes(true);
    let snapshot = state.reload().await;

    assert_eq!(snapshot.data, vec!["offline edit".to_string()]);
    assert!(!snapshot.is_loading);
    assert!(matches!(snapshot.error, Some(StorageError::Write { .. })));
    assert_eq!(backend.peek(KEY).as_deref(), Some(r#"["old"]"#));
}

#[tokio::test(start_paused = true)]
async fn flush_racing_the_debounce_timer_writes_once() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let options = StorageOptions::default().with_debounce(Duration::from_millis(500));
    let state = open_strings(&backend, options).await;

    state.save(vec!["raced".to_string()]).await;
    tokio::time::advance(Duration::from_millis(500)).await;
    tokio::join!(state.flush(), state.flush());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.write_count(KEY), 1);
    assert_eq!(backend.peek(KEY).as_deref(), Some(r#"["raced"]"#));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_leave_latest_value_stored() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let state = open_strings(&backend, StorageOptions::default()).await;

    let writers = (0..16)
        .map(|index| {
            let state = state.clone();
            tokio::spawn(async move {
                state.save(vec![format!("edit {index}")]).await;
            })
        })
        .collect::<Vec<_>>();
    for writer in writers {
        writer.await.unwrap();
    }

    let stored = backend.peek(KEY).unwrap();
    assert_eq!(stored, serde_json::to_string(&state.data()).unwrap());
    assert_eq!(backend.write_count(KEY), 16);
}

#[tokio::test]
async fn failed_backup_write_does_not_block_primary_write() {
    let backend = seeded(r#"["old"]"#);
    let options = StorageOptions::default().with_backup(true);
    let state = open_strings(&backend, options).await;

    backend.set_fail_writes_for("@planner_tasks_backup", true);
    state.save(vec!["new".to_string()]).await;

    assert!(state.error().is_none());
    assert_eq!(backend.peek(KEY).as_deref(), Some(r#"["new"]"#));
    assert_eq!(backend.peek("@planner_tasks_backup"), None);
    assert!(!state.restore_backup().await.unwrap());
}

#[tokio::test]
async fn failed_write_keeps_optimistic_data() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let state = open_strings(&backend, StorageOptions::default()).await;

    backend.set_fail_writes(true);
    state.save(vec!["offline edit".to_string()]).await;
    assert_eq!(state.data(), vec!["offline edit".to_string()]);
    assert!(matches!(state.error(), Some(StorageError::Write { .. })));
    assert_eq!(backend.peek(KEY), None);

    backend.set_fail_writes(false);
    state
        .update(|prev| {
            let mut next = prev.clone();
            next.push("online edit".to_string());
            next
        })
        .await;
    assert!(state.error().is_none());
    assert_eq!(
        backend.peek(KEY).as_deref(),
        Some(r#"["offline edit","online edit"]"#)
    );
}

#[tokio::test]
async fn read_failure_keeps_last_known_good_value() {
    let backend = seeded(r#"["kept"]"#);
    let state = open_strings(&backend, StorageOptions::default()).await;
    assert_eq!(state.data(), vec!["kept".to_string()]);

    backend.set_fail_reads(true);
    let snapshot = state.reload().await;
    assert_eq!(snapshot.data, vec!["kept".to_string()]);
    assert!(!snapshot.is_loading);
    assert!(matches!(
        snapshot.error,
        Some(StorageError::StorageRead { .. })
    ));
}

#[tokio::test]
async fn read_failure_on_mount_uses_initial_value() {
    let backend = seeded(r#"["unreachable"]"#);
    backend.set_fail_reads(true);
    let state = open_strings(&backend, StorageOptions::default()).await;
    assert!(state.data().is_empty());
    assert!(matches!(
        state.error(),
        Some(StorageError::StorageRead { .. })
    ));
}

#[tokio::test]
async fn backup_holds_previous_payload_and_can_be_restored() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let state = open_strings(&backend, StorageOptions::default().with_backup(true)).await;
    let backup_key = key().backup();

    state.save(vec!["v1".to_string()]).await;
    assert_eq!(backend.peek(backup_key.as_str()), None);

    state.save(vec!["v2".to_string()]).await;
    assert_eq!(backend.peek(backup_key.as_str()).as_deref(), Some(r#"["v1"]"#));

    assert!(state.restore_backup().await.unwrap());
    assert_eq!(state.data(), vec!["v1".to_string()]);
    assert_eq!(backend.peek(KEY).as_deref(), Some(r#"["v1"]"#));
    assert_eq!(backend.peek(backup_key.as_str()).as_deref(), Some(r#"["v2"]"#));
}

#[tokio::test]
async fn restore_without_backup_reports_false() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let state = open_strings(&backend, StorageOptions::default().with_backup(true)).await;
    assert!(!state.restore_backup().await.unwrap());
}

#[tokio::test]
async fn clear_removes_key_and_resets_memory() {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let state = open_strings(&backend, StorageOptions::default()).await;
    state.save(vec!["gone soon".to_string()]).await;

    state.clear().await.unwrap();
    assert!(state.data().is_empty());
    assert_eq!(backend.get_item(KEY).unwrap(), None);
}
