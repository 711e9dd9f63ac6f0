use hamba::config::HambaConfig;
use hamba::database::outbox::{self, Outbox};
use hamba::jobs::{ProcessSummary, SendProcessor};
use hamba::models::{Contact, DataResponse, Email, Folder, ProviderKind, QueuedMessage, now_millis};
use hamba::routes::contacts::search_contacts;
use hamba::routes::outbox::{cancel_scheduled, list_scheduled, schedule_send, send, undo_send};
use hamba::test_support::{
    EmailSeed, FakeProvider, FakeProviderFactory, ProviderCall, TestDatabase, TestFixtures,
    TestRocketBuilder,
};
use rocket::http::{ContentType, Status};
use rocket::routes;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn processor(outbox: Outbox, db: &TestDatabase, provider: &Arc<FakeProvider>) -> SendProcessor {
    let factory = Arc::new(FakeProviderFactory::new(Arc::clone(provider)));
    match outbox {
        Outbox::Scheduled => SendProcessor::scheduled(db.pool_clone(), factory, Duration::from_secs(30)),
        Outbox::Pending => SendProcessor::pending(db.pool_clone(), factory, Duration::from_secs(1)),
    }
}

#[tokio::test]
async fn undo_send_returns_the_message_until_it_is_gone() {
    let db = TestDatabase::new().await.expect("test database");
    let account = TestFixtures::new(db.pool())
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    let config = HambaConfig {
        undo_send_window: Duration::from_secs(10),
        background_jobs: false,
        ..HambaConfig::from_env()
    };
    let client = TestRocketBuilder::new()
        .manage_pool(db.pool_clone())
        .with_config(config)
        .mount_api_routes(routes![send, undo_send])
        .async_client()
        .await;

    let before = now_millis();
    let queued: QueuedMessage = client
        .post("/api/send")
        .header(ContentType::JSON)
        .body(
            json!({
                "accountId": account.id,
                "to": ["friend@example.com"],
                "subject": "Hello",
                "body": "Hi"
            })
            .to_string(),
        )
        .dispatch()
        .await
        .into_json()
        .await
        .expect("queued message");
    assert!(queued.due_at >= before + 10_000);
    assert_eq!(queued.to_addresses, "friend@example.com");

    let undone = client.delete(format!("/api/send/{}", queued.id)).dispatch().await;
    assert_eq!(undone.status(), Status::Ok);
    let restored: QueuedMessage = undone.into_json().await.expect("undone message");
    assert_eq!(restored.subject, "Hello");

    let too_late = client.delete(format!("/api/send/{}", queued.id)).dispatch().await;
    assert_eq!(too_late.status(), Status::NotFound);

    let no_recipients = client
        .post("/api/send")
        .header(ContentType::JSON)
        .body(json!({"accountId": account.id, "to": []}).to_string())
        .dispatch()
        .await;
    assert_eq!(no_recipients.status(), Status::BadRequest);

    let malformed = client
        .post("/api/send")
        .header(ContentType::JSON)
        .body(json!({"accountId": account.id, "to": ["friend@@example.com"]}).to_string())
        .dispatch()
        .await;
    assert_eq!(malformed.status(), Status::BadRequest);

    let unknown_account = client
        .post("/api/send")
        .header(ContentType::JSON)
        .body(json!({"accountId": 999, "to": ["a@b.com"]}).to_string())
        .dispatch()
        .await;
    assert_eq!(unknown_account.status(), Status::NotFound);
}

#[tokio::test]
async fn scheduling_requires_a_future_time() {
    let db = TestDatabase::new().await.expect("test database");
    let account = TestFixtures::new(db.pool())
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");
    let client = TestRocketBuilder::new()
        .manage_pool(db.pool_clone())
        .mount_api_routes(routes![schedule_send, list_scheduled, cancel_scheduled])
        .async_client()
        .await;

    let past = client
        .post("/api/scheduled")
        .header(ContentType::JSON)
        .body(json!({"accountId": account.id, "to": ["a@b.com"], "sendAt": now_millis() - 1}).to_string())
        .dispatch()
        .await;
    assert_eq!(past.status(), Status::BadRequest);

    let send_at = now_millis() + 3_600_000;
    let scheduled: QueuedMessage = client
        .post("/api/scheduled")
        .header(ContentType::JSON)
        .body(json!({"accountId": account.id, "to": ["a@b.com"], "sendAt": send_at}).to_string())
        .dispatch()
        .await
        .into_json()
        .await
        .expect("scheduled");
    assert_eq!(scheduled.due_at, send_at);

    let listed: DataResponse<Vec<QueuedMessage>> = client
        .get(format!("/api/accounts/{}/scheduled", account.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("list");
    assert_eq!(listed.data.len(), 1);

    let cancelled = client.delete(format!("/api/scheduled/{}", scheduled.id)).dispatch().await;
    assert_eq!(cancelled.status(), Status::NoContent);
    let cancelled_again = client.delete(format!("/api/scheduled/{}", scheduled.id)).dispatch().await;
    assert_eq!(cancelled_again.status(), Status::NotFound);
}

#[tokio::test]
async fn pending_processor_sends_due_rows_and_records_side_effects() {
    let db = TestDatabase::new().await.expect("test database");
    let pool = db.pool_clone();
    let account = TestFixtures::new(&pool)
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    let draft_id = sqlx::query("INSERT INTO drafts (account_id, subject, created_at, updated_at) VALUES (?, 'Hello', 0, 0)")
        .bind(account.id)
        .execute(&pool)
        .await
        .expect("draft")
        .last_insert_rowid();

    let now = now_millis();
    let request = serde_json::from_value(json!({
        "accountId": account.id,
        "to": ["friend@example.com"],
        "cc": ["boss@example.com"],
        "subject": "Hello",
        "body": "Hi",
        "draftId": draft_id
    }))
    .expect("compose request");
    let due = outbox::enqueue(&pool, Outbox::Pending, &request, now - 1)
        .await
        .expect("due row");
    outbox::enqueue(&pool, Outbox::Pending, &request, now + 60_000)
        .await
        .expect("future row");

    let provider = FakeProvider::new();
    let summary = processor(Outbox::Pending, &db, &provider)
        .process_ready(now)
        .await
        .expect("process");
    assert_eq!(summary, ProcessSummary { sent: 1, failed: 0 });
    assert_eq!(
        provider.sent(),
        vec![ProviderCall::Send {
            to: vec!["friend@example.com".into()],
            subject: "Hello".into()
        }]
    );

    assert!(outbox::fetch(&pool, Outbox::Pending, due.id).await.expect("fetch").is_none());
    assert_eq!(outbox::list_for_account(&pool, Outbox::Pending, account.id).await.expect("list").len(), 1);

    let sent: Vec<Email> = sqlx::query_as(
        "SELECT * FROM emails WHERE account_id = ? AND folder = 'sent'",
    )
    .bind(account.id)
    .fetch_all(&pool)
    .await
    .expect("sent copy");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_sent);
    assert_eq!(sent[0].folder, Folder::Sent);
    assert_eq!(sent[0].provider_id, "fake-sent-1");

    let drafts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM drafts WHERE id = ?")
        .bind(draft_id)
        .fetch_one(&pool)
        .await
        .expect("draft count");
    assert_eq!(drafts, 0, "the originating draft is removed");

    let client = TestRocketBuilder::new()
        .manage_pool(pool.clone())
        .mount_api_routes(routes![search_contacts])
        .async_client()
        .await;
    let contacts: DataResponse<Vec<Contact>> = client
        .get(format!("/api/accounts/{}/contacts?q=example", account.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("contacts");
    let addresses: Vec<_> = contacts.data.iter().map(|c| c.email.as_str()).collect();
    assert!(addresses.contains(&"friend@example.com"));
    assert!(addresses.contains(&"boss@example.com"));
}

#[tokio::test]
async fn rows_are_removed_even_when_the_provider_fails() {
    let db = TestDatabase::new().await.expect("test database");
    let pool = db.pool_clone();
    let account = TestFixtures::new(&pool)
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    let request = serde_json::from_value(json!({
        "accountId": account.id,
        "to": ["friend@example.com"],
        "sendAt": 1
    }))
    .expect("compose request");
    let row = outbox::enqueue(&pool, Outbox::Scheduled, &request, 1)
        .await
        .expect("scheduled row");

    let provider = FakeProvider::new();
    provider.set_failing(true);
    let scheduled = processor(Outbox::Scheduled, &db, &provider);

    let summary = scheduled.process_ready(now_millis()).await.expect("process");
    assert_eq!(summary, ProcessSummary { sent: 0, failed: 1 });
    assert!(outbox::fetch(&pool, Outbox::Scheduled, row.id).await.expect("fetch").is_none());

    let retry = scheduled.process_ready(now_millis()).await.expect("second pass");
    assert_eq!(retry, ProcessSummary::default(), "failed sends are not retried");
    assert_eq!(provider.sent().len(), 1);

    let sent_copies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails WHERE is_sent = 1")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(sent_copies, 0);
}

#[tokio::test]
async fn first_send_to_a_sender_promotes_their_waiting_mail() {
    let db = TestDatabase::new().await.expect("test database");
    let pool = db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let account = fixtures
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    // Corporate sender on a team list: nothing in the message itself scores.
    let mut waiting = EmailSeed::new(account.id, "c1");
    waiting.from_email = "alex@corp.example".into();
    waiting.to_addresses = "team@corp.example".into();
    let waiting_id = fixtures.insert_email(&waiting).await.expect("inbox email");

    let request = serde_json::from_value(json!({
        "accountId": account.id,
        "to": ["Alex@Corp.example"],
        "subject": "Re: Status",
        "body": "Thanks"
    }))
    .expect("compose request");
    outbox::enqueue(&pool, Outbox::Pending, &request, now_millis() - 1)
        .await
        .expect("pending row");

    let provider = FakeProvider::new();
    let summary = processor(Outbox::Pending, &db, &provider)
        .process_ready(now_millis())
        .await
        .expect("process");
    assert_eq!(summary.sent, 1);

    let important: bool = sqlx::query_scalar("SELECT is_important FROM emails WHERE id = ?")
        .bind(waiting_id)
        .fetch_one(&pool)
        .await
        .expect("flag");
    assert!(important);
}
