/// End-to-end tests
///
/// Sheet and order flows through the wired backend, with real concurrency on
/// the idempotent create paths.
/// Run with: cargo test --test end_to_end_tests

use dae_core::domain::{OrderLine, Sheet, SheetStatus};
use dae_core::service::{CreateOrderRequest, CreateSheetRequest};
use dae_core::{
    Backend, CoreConfig, CoreError, ErrorCode, IdempotencyContext, ListForUserQuery, MemberRole,
    MemoryCoordinationStore, MemoryDocumentStore, Page,
};
use std::sync::Arc;
use tokio::sync::Barrier;
use tokio_test::assert_err;
use tokio_util::sync::CancellationToken;

async fn open_sheet(backend: &Backend, key: &str) -> Sheet {
    let mut request = CreateSheetRequest::new("host", "friday lunch");
    request.member_ids = vec!["U1".into()];
    backend
        .sheets()
        .create_sheet(
            &IdempotencyContext::new("CreateSheet").with_key(key),
            &request,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_create_order_dedupes() {
    let backend = Backend::in_memory();
    let sheet = open_sheet(&backend, "sheet-1").await;
    let key = format!("order:create:{}:U1", sheet.id);
    let barrier = Arc::new(Barrier::new(2));

    let mut handles = vec![];
    for _ in 0..2 {
        let backend = backend.clone();
        let barrier = Arc::clone(&barrier);
        let context = IdempotencyContext::new("CreateOrder").with_key(&key);
        let request = CreateOrderRequest::new(&sheet.id, "U1", vec![OrderLine::new("pho", 2)]);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            backend
                .orders()
                .create_order(&context, &request, &CancellationToken::new())
                .await
        }));
    }

    let mut order_ids = vec![];
    for handle in handles {
        order_ids.push(handle.await.unwrap().unwrap().id);
    }

    assert_eq!(order_ids[0], order_ids[1]);
    let stored = backend.orders().get_order(&order_ids[0]).await.unwrap();
    assert_eq!(stored.lines, vec![OrderLine::new("pho", 2)]);
}

#[tokio::test]
async fn test_create_sheet_replays_and_registers_host() {
    let backend = Backend::in_memory();

    let first = open_sheet(&backend, "sheet-1").await;
    let replay = open_sheet(&backend, "sheet-1").await;
    let other = open_sheet(&backend, "sheet-2").await;

    assert_eq!(first.id, replay.id);
    assert_ne!(first.id, other.id);
    assert_eq!(first.member_ids, vec!["host", "U1"]);

    let entries = backend.membership().list_index_entries(&first.id).await.unwrap();
    let host = entries.iter().find(|entry| entry.user_id == "host").unwrap();
    assert_eq!(host.role, MemberRole::Host);
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_write_without_key_rejected() {
    let backend = Backend::in_memory();

    let err = backend
        .sheets()
        .create_sheet(
            &IdempotencyContext::new("CreateSheet"),
            &CreateSheetRequest::new("host", "lunch"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, CoreError::InvalidInput("missing idempotency key".into()));
    assert_eq!(err.code(), ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_join_leave_and_close_rules() {
    let backend = Backend::in_memory();
    let sheet = open_sheet(&backend, "sheet-1").await;
    let sheets = backend.sheets();

    sheets.join_sheet(&sheet.id, "U2").await.unwrap();
    sheets.join_sheet(&sheet.id, "U2").await.unwrap();
    assert_eq!(sheets.members(&sheet.id).await.unwrap(), vec!["host", "U1", "U2"]);

    let host_leave = sheets.leave_sheet(&sheet.id, "host").await.unwrap_err();
    assert!(matches!(host_leave, CoreError::Forbidden(_)));
    sheets.leave_sheet(&sheet.id, "U1").await.unwrap();

    let guest_close = sheets.close_sheet(&sheet.id, "U2").await.unwrap_err();
    assert!(matches!(guest_close, CoreError::Forbidden(_)));
    let closed = sheets.close_sheet(&sheet.id, "host").await.unwrap();
    assert_eq!(closed.status, SheetStatus::Closed);
    // Closing must not clobber the member list written by the synchronizer.
    assert_eq!(closed.member_ids, vec!["host", "U2"]);

    let late_join = sheets.join_sheet(&sheet.id, "U3").await.unwrap_err();
    assert!(matches!(late_join, CoreError::InvalidInput(_)));

    let late_order = backend
        .orders()
        .create_order(
            &IdempotencyContext::new("CreateOrder").with_key("late"),
            &CreateOrderRequest::new(&sheet.id, "U2", vec![OrderLine::new("bun", 1)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(late_order, CoreError::InvalidInput(_)));

    let reopened = sheets.reopen_sheet(&sheet.id, "host").await.unwrap();
    assert!(reopened.is_open());
    sheets.join_sheet(&sheet.id, "U3").await.unwrap();
}

#[tokio::test]
async fn test_failed_create_can_be_retried_with_same_key() {
    let backend = Backend::in_memory();
    let sheet = open_sheet(&backend, "sheet-1").await;
    close_as_host(&backend, &sheet.id).await;
    let context = IdempotencyContext::new("CreateOrder").with_key("retry-me");
    let request = CreateOrderRequest::new(&sheet.id, "U1", vec![OrderLine::new("pho", 1)]);

    assert_err!(
        backend
            .orders()
            .create_order(&context, &request, &CancellationToken::new())
            .await
    );

    backend.sheets().reopen_sheet(&sheet.id, "host").await.unwrap();
    let created = backend
        .orders()
        .create_order(&context, &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(created.user_id, "U1");
}

async fn close_as_host(backend: &Backend, sheet_id: &str) {
    backend.sheets().close_sheet(sheet_id, "host").await.unwrap();
}

#[tokio::test]
async fn test_update_note_through_executor() {
    let backend = Backend::in_memory();
    let sheet = open_sheet(&backend, "sheet-1").await;
    let order = backend
        .orders()
        .create_order(
            &IdempotencyContext::new("CreateOrder").with_key("o-1"),
            &CreateOrderRequest::new(&sheet.id, "U1", vec![OrderLine::new("pho", 1)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let updated = backend.orders().update_note(&order.id, "U1", "no onions").await.unwrap();
    assert_eq!(updated.note, "no onions");
    assert!(updated.updated_at >= order.updated_at);

    let foreign = backend.orders().update_note(&order.id, "U2", "hijack").await.unwrap_err();
    assert!(matches!(foreign, CoreError::Forbidden(_)));
    assert_eq!(backend.orders().get_order(&order.id).await.unwrap().note, "no onions");
}

#[tokio::test]
async fn test_list_for_user_through_service() {
    let coordination = Arc::new(MemoryCoordinationStore::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let config = CoreConfig::from_json_str(r#"{"membership": {"default_page_size": 2}}"#).unwrap();
    let backend = Backend::with_stores(coordination, documents, config).unwrap();

    let mut created = vec![];
    for key in ["a", "b", "c"] {
        created.push(open_sheet(&backend, key).await.id);
    }

    let page: Page<Sheet> = backend
        .sheets()
        .list_for_user(&ListForUserQuery::new("U1"), None)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(page.has_more());

    let next: Page<Sheet> = backend
        .sheets()
        .list_for_user(&ListForUserQuery::new("U1").cursor(page.next_cursor.clone().unwrap()), None)
        .await
        .unwrap();
    let mut seen: Vec<String> = page
        .items
        .iter()
        .chain(next.items.iter())
        .map(|sheet| sheet.id.clone())
        .collect();
    seen.sort();
    created.sort();
    assert_eq!(seen, created);
}

#[tokio::test]
async fn test_list_for_user_filters_by_status() {
    let backend = Backend::in_memory();
    let open = open_sheet(&backend, "open").await;
    let closed = open_sheet(&backend, "closed").await;
    close_as_host(&backend, &closed.id).await;

    let only_open: Page<Sheet> = backend
        .sheets()
        .list_for_user(&ListForUserQuery::new("U1"), Some(SheetStatus::Open))
        .await
        .unwrap();
    let ids: Vec<&str> = only_open.items.iter().map(|sheet| sheet.id.as_str()).collect();
    assert_eq!(ids, vec![open.id.as_str()]);

    let only_closed: Page<Sheet> = backend
        .sheets()
        .list_for_user(&ListForUserQuery::new("U1"), Some(SheetStatus::Closed))
        .await
        .unwrap();
    assert_eq!(only_closed.items.len(), 1);
    assert_eq!(only_closed.items[0].id, closed.id);

    let all: Page<Sheet> = backend
        .sheets()
        .list_for_user(&ListForUserQuery::new("U1"), None)
        .await
        .unwrap();
    assert_eq!(all.items.len(), 2);

    let paused: Page<Sheet> = backend
        .sheets()
        .list_for_user(&ListForUserQuery::new("U1"), Some(SheetStatus::Paused))
        .await
        .unwrap();
    assert!(paused.items.is_empty());
}
