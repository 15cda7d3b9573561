/// Membership synchronizer tests
///
/// The denormalized member list and the member index must agree after every
/// add/remove, including under concurrent writers.
/// Run with: cargo test --test membership_tests

use chrono::{DateTime, Duration, Utc};
use dae_core::domain::Sheet;
use dae_core::{
    CoreError, DocumentStore, ListForUserQuery, MemberIndexEntry, MemberRole,
    MembershipConfig, MembershipSynchronizer, MemoryDocumentStore, Page, PatchExecutor,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Barrier;
use tokio_test::assert_ok;

async fn setup(sheet_ids: &[&str]) -> (MemoryDocumentStore, Arc<MembershipSynchronizer>) {
    let store = MemoryDocumentStore::new();
    let sheets = PatchExecutor::<Sheet>::new(Arc::new(store.clone()));
    for id in sheet_ids {
        sheets
            .create(&Sheet::new(id, &format!("sheet {id}"), "host", Utc::now()))
            .await
            .unwrap();
    }
    let sync = MembershipSynchronizer::new(Arc::new(store.clone()), MembershipConfig::default()).unwrap();
    (store, Arc::new(sync))
}

async fn assert_consistent(sync: &MembershipSynchronizer, sheet_id: &str) -> BTreeSet<String> {
    let listed: BTreeSet<String> = sync.list_member_ids(sheet_id).await.unwrap().into_iter().collect();
    let indexed: BTreeSet<String> = sync
        .list_index_entries(sheet_id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.user_id)
        .collect();
    assert_eq!(listed, indexed, "list and index diverged for {sheet_id}");
    listed
}

#[tokio::test]
async fn test_add_member_twice_is_noop() {
    let (store, sync) = setup(&["S1"]).await;

    assert_ok!(sync.add_member("S1", "U1").await);
    let writes = store.write_count().await;
    assert_ok!(sync.add_member("S1", "U1").await);

    assert_eq!(store.write_count().await, writes);
    assert_eq!(sync.list_member_ids("S1").await.unwrap(), vec!["U1"]);
    assert_eq!(sync.list_index_entries("S1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_remove_non_member_is_noop() {
    let (store, sync) = setup(&["S1"]).await;
    sync.add_member("S1", "U1").await.unwrap();
    let writes = store.write_count().await;

    sync.remove_member("S1", "U2").await.unwrap();

    assert_eq!(store.write_count().await, writes);
    assert_consistent(&sync, "S1").await;
}

#[tokio::test]
async fn test_concurrent_joins_keep_representations_in_step() {
    let (_store, sync) = setup(&["S1"]).await;
    let num_tasks = 6;
    let barrier = Arc::new(Barrier::new(num_tasks));

    let mut handles = vec![];
    for i in 0..num_tasks {
        let sync = Arc::clone(&sync);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            let user = format!("U{i}");
            barrier.wait().await;
            (user.clone(), sync.add_member("S1", &user).await)
        }));
    }

    let mut joined = BTreeSet::new();
    for handle in handles {
        let (user, result) = handle.await.unwrap();
        match result {
            Ok(()) => {
                joined.insert(user);
            }
            Err(CoreError::ConcurrentUpdate(_)) => {}
            Err(other) => panic!("unexpected error for {user}: {other:?}"),
        }
    }

    assert!(!joined.is_empty());
    assert_eq!(assert_consistent(&sync, "S1").await, joined);
}

#[tokio::test]
async fn test_membership_survives_mixed_add_remove() {
    let (_store, sync) = setup(&["S1"]).await;

    for user in ["A", "B", "C"] {
        sync.add_member("S1", user).await.unwrap();
    }
    sync.remove_member("S1", "B").await.unwrap();
    sync.add_member("S1", "D").await.unwrap();

    assert_eq!(sync.list_member_ids("S1").await.unwrap(), vec!["A", "C", "D"]);
    assert_consistent(&sync, "S1").await;
}

#[tokio::test]
async fn test_roles_recorded_in_index() {
    let (_store, sync) = setup(&["S1"]).await;

    sync.add_member_with_role("S1", "host", MemberRole::Host).await.unwrap();
    sync.add_member("S1", "guest").await.unwrap();

    let entries = sync.list_index_entries("S1").await.unwrap();
    let roles: Vec<(String, MemberRole)> = entries
        .into_iter()
        .map(|entry| (entry.user_id, entry.role))
        .collect();
    assert!(roles.contains(&("host".to_string(), MemberRole::Host)));
    assert!(roles.contains(&("guest".to_string(), MemberRole::Member)));
}

#[tokio::test]
async fn test_list_for_user_default_page_and_cursor() {
    let ids: Vec<String> = (0..25).map(|i| format!("S{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let (_store, sync) = setup(&id_refs).await;
    let base = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    for (i, id) in ids.iter().enumerate() {
        let joined_at = base + Duration::seconds(i as i64);
        sync.repair_index_entry(id, &MemberIndexEntry::new("U1", MemberRole::Member, joined_at))
            .await
            .unwrap();
    }

    let first: Page<Sheet> = sync.list_for_user(&ListForUserQuery::new("U1")).await.unwrap();
    assert_eq!(first.items.len(), 20);
    assert_eq!(first.items[0].id, "S24");
    assert_eq!(first.items[19].id, "S05");
    let cursor = first.next_cursor.clone().expect("more pages");

    let second: Page<Sheet> = sync
        .list_for_user(&ListForUserQuery::new("U1").cursor(cursor))
        .await
        .unwrap();
    let rest: Vec<&str> = second.items.iter().map(|sheet| sheet.id.as_str()).collect();
    assert_eq!(rest, vec!["S04", "S03", "S02", "S01", "S00"]);
    assert!(second.next_cursor.is_none());
}

#[tokio::test]
async fn test_list_for_user_clamps_limit() {
    let ids: Vec<String> = (0..3).map(|i| format!("S{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let (_store, sync) = setup(&id_refs).await;
    for id in &ids {
        sync.add_member(id, "U1").await.unwrap();
    }

    let page: Page<Sheet> = sync
        .list_for_user(&ListForUserQuery::new("U1").limit(10_000))
        .await
        .unwrap();

    assert_eq!(page.items.len(), 3);
    assert!(!page.has_more());
    assert!(page.items.iter().all(|sheet| sheet.is_member("U1")));
}

#[tokio::test]
async fn test_repair_heals_missing_index_entry() {
    let (store, sync) = setup(&["S1"]).await;
    sync.add_member("S1", "U1").await.unwrap();
    let index = sync.index_path("S1", "U1").unwrap();
    let original = store.read(&index).await.unwrap().unwrap();
    store.remove(&index).await;

    let empty: Page<Sheet> = sync.list_for_user(&ListForUserQuery::new("U1")).await.unwrap();
    assert!(empty.items.is_empty());

    let entry: MemberIndexEntry = serde_json::from_value(serde_json::Value::Object(
        original.fields.into_iter().collect(),
    ))
    .unwrap();
    sync.repair_index_entry("S1", &entry).await.unwrap();

    let healed: Page<Sheet> = sync.list_for_user(&ListForUserQuery::new("U1")).await.unwrap();
    assert_eq!(healed.items.len(), 1);
    assert_consistent(&sync, "S1").await;
}
