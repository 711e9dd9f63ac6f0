use hamba::database::accounts;
use hamba::importance;
use hamba::jobs::TrashCleaner;
use hamba::models::{Email, Folder, ProviderKind, now_millis};
use hamba::realtime::RealtimeHub;
use hamba::routes::accounts::{reclassify_account, sync_account};
use hamba::sync::{SyncError, SyncService};
use hamba::test_support::{
    EmailSeed, FakeProvider, FakeProviderFactory, ProviderCall, TestDatabase, TestFixtures,
    TestRocketBuilder, remote_message,
};
use rocket::http::Status;
use rocket::routes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn service(db: &TestDatabase, provider: &Arc<FakeProvider>, hub: &Arc<RealtimeHub>) -> SyncService {
    SyncService::new(
        db.pool_clone(),
        Arc::new(FakeProviderFactory::new(Arc::clone(provider))),
        Arc::clone(hub),
        50,
    )
}

#[tokio::test]
async fn first_sync_classifies_and_records_senders() {
    let db = TestDatabase::new().await.expect("test database");
    let account = TestFixtures::new(db.pool())
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    let provider = FakeProvider::new();
    provider.set_mailbox(vec![
        remote_message("m1", "friend@gmail.com", "Dinner tonight?", 1_000),
        remote_message("m2", "noreply@shop.example", "50% off everything", 2_000),
    ]);
    let hub = Arc::new(RealtimeHub::new());
    let sync = service(&db, &provider, &hub);

    let first = sync.sync_account(account.id).await.expect("first sync");
    assert_eq!(first.fetched, 2);
    assert_eq!(first.inserted, 2);
    assert_eq!(first.new_email_ids.len(), 2);

    let second = sync.sync_account(account.id).await.expect("second sync");
    assert_eq!(second.inserted, 0);

    let rows: Vec<Email> = sqlx::query_as("SELECT * FROM emails WHERE account_id = ? ORDER BY received_at")
        .bind(account.id)
        .fetch_all(db.pool())
        .await
        .expect("emails");
    assert_eq!(rows.len(), 2);
    assert!(rows[0].is_important, "personal sender writing directly is important");
    assert!(!rows[1].is_important, "automated promotion lands in other");

    let fetches: Vec<_> = provider
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ProviderCall::Fetch { since, .. } => Some(since),
            _ => None,
        })
        .collect();
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[0], None);
    assert!(fetches[1].is_some(), "second sync resumes from the checkpoint");

    let contacts: i64 = sqlx::query_scalar("SELECT contact_count FROM contacts WHERE email = 'friend@gmail.com'")
        .fetch_one(db.pool())
        .await
        .expect("sender contact");
    assert_eq!(contacts, 1);
}

#[tokio::test]
async fn full_batches_resume_where_they_stopped() {
    let db = TestDatabase::new().await.expect("test database");
    let account = TestFixtures::new(db.pool())
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");
    accounts::mark_synced(db.pool(), account.id, 500).await.expect("checkpoint");

    let mailbox = |read_m2: bool| {
        (1..=5)
            .map(|n| {
                let mut message = remote_message(&format!("m{n}"), "friend@gmail.com", "Hi", n * 1_000);
                message.is_read = read_m2 && n == 2;
                message
            })
            .collect::<Vec<_>>()
    };
    let provider = FakeProvider::new();
    provider.set_mailbox(mailbox(false));
    let hub = Arc::new(RealtimeHub::new());
    let sync = SyncService::new(
        db.pool_clone(),
        Arc::new(FakeProviderFactory::new(Arc::clone(&provider))),
        Arc::clone(&hub),
        2,
    );

    let first = sync.sync_account(account.id).await.expect("first batch");
    assert_eq!(first.inserted, 2);
    let checkpoint = accounts::fetch_account(db.pool(), account.id)
        .await
        .expect("account row")
        .and_then(|a| a.last_synced_at);
    assert_eq!(checkpoint, Some(2_000), "a full batch stops at its newest message");

    provider.set_mailbox(mailbox(true));
    let second = sync.sync_account(account.id).await.expect("second batch");
    assert_eq!(second.inserted, 1);
    assert_eq!(second.updated, 1, "the boundary message is refetched and its flags refreshed");

    let mut rounds = 0;
    while sync.sync_account(account.id).await.expect("backlog batch").inserted > 0 {
        rounds += 1;
        assert!(rounds < 10, "backlog never drained");
    }

    let rows: Vec<Email> = sqlx::query_as("SELECT * FROM emails WHERE account_id = ? ORDER BY received_at")
        .bind(account.id)
        .fetch_all(db.pool())
        .await
        .expect("emails");
    let ids: Vec<_> = rows.iter().map(|e| e.provider_id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3", "m4", "m5"]);
    assert!(rows[1].is_read);
}

#[tokio::test]
async fn sync_notifies_only_subscribed_clients() {
    let db = TestDatabase::new().await.expect("test database");
    let fixtures = TestFixtures::new(db.pool());
    let account = fixtures
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    let provider = FakeProvider::new();
    provider.set_mailbox(vec![remote_message("m1", "friend@gmail.com", "Hi", 1_000)]);
    let hub = Arc::new(RealtimeHub::new());
    let (subscriber, mut subscriber_rx) = hub.register();
    let (bystander, mut bystander_rx) = hub.register();
    hub.subscribe(subscriber, [account.id]);
    hub.subscribe(bystander, [account.id + 100]);

    service(&db, &provider, &hub)
        .sync_account(account.id)
        .await
        .expect("sync");

    let new_mail: Value = serde_json::from_str(&subscriber_rx.try_recv().expect("new_mail event")).expect("json");
    assert_eq!(new_mail["type"], "new_mail");
    assert_eq!(new_mail["accountId"], account.id);
    assert_eq!(new_mail["count"], 1);

    let complete: Value =
        serde_json::from_str(&subscriber_rx.try_recv().expect("sync_complete event")).expect("json");
    assert_eq!(complete["type"], "sync_complete");
    assert_eq!(complete["inserted"], 1);

    assert!(bystander_rx.try_recv().is_err());
}

#[tokio::test]
async fn reclassify_route_promotes_senders_the_user_has_written_to() {
    let db = TestDatabase::new().await.expect("test database");
    let fixtures = TestFixtures::new(db.pool());
    let account = fixtures
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    // A corporate sender, not addressed directly, scores zero on its own.
    let mut incoming = remote_message("c1", "alex@corp.example", "Status", 5_000);
    incoming.to = vec!["team@corp.example".into()];

    let provider = FakeProvider::new();
    provider.set_mailbox(vec![incoming]);
    let hub = Arc::new(RealtimeHub::new());
    let sync = service(&db, &provider, &hub);
    sync.sync_account(account.id).await.expect("first sync");

    let flagged: bool = sqlx::query_scalar("SELECT is_important FROM emails WHERE provider_id = 'c1'")
        .fetch_one(db.pool())
        .await
        .expect("flag");
    assert!(!flagged);

    let mut sent = EmailSeed::new(account.id, "s1");
    sent.folder = Folder::Sent;
    sent.is_sent = true;
    sent.from_email = "me@example.com".into();
    sent.to_addresses = "alex@corp.example".into();
    fixtures.insert_email(&sent).await.expect("sent mail");

    let client = TestRocketBuilder::new()
        .manage_pool(db.pool_clone())
        .with_providers(Arc::new(FakeProviderFactory::new(Arc::clone(&provider))))
        .mount_api_routes(routes![reclassify_account, sync_account])
        .async_client()
        .await;

    let response = client
        .post(format!("/api/accounts/{}/reclassify", account.id))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json");
    assert_eq!(body["changed"], 1);

    let flagged: bool = sqlx::query_scalar("SELECT is_important FROM emails WHERE provider_id = 'c1'")
        .fetch_one(db.pool())
        .await
        .expect("flag");
    assert!(flagged);

    let synced = client
        .post(format!("/api/accounts/{}/sync", account.id))
        .dispatch()
        .await;
    assert_eq!(synced.status(), Status::Ok);
    let missing = client.post("/api/accounts/777/sync").dispatch().await;
    assert_eq!(missing.status(), Status::NotFound);
}

#[tokio::test]
async fn sync_of_unknown_account_fails_cleanly() {
    let db = TestDatabase::new().await.expect("test database");
    let provider = FakeProvider::new();
    let hub = Arc::new(RealtimeHub::new());

    let err = service(&db, &provider, &hub)
        .sync_account(42)
        .await
        .expect_err("no such account");
    assert!(matches!(err, SyncError::AccountNotFound(42)));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn trash_cleaner_purges_only_expired_mail() {
    let db = TestDatabase::new().await.expect("test database");
    let fixtures = TestFixtures::new(db.pool());
    let account = fixtures
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    let day = 24 * 60 * 60 * 1000;
    let now = now_millis();
    for (provider_id, trashed_days_ago) in [("old", 31), ("recent", 2)] {
        let mut seed = EmailSeed::new(account.id, provider_id);
        seed.folder = Folder::Trash;
        seed.trashed_at = Some(now - trashed_days_ago * day);
        fixtures.insert_email(&seed).await.expect("trashed email");
    }
    fixtures
        .insert_email(&EmailSeed::new(account.id, "inbox"))
        .await
        .expect("inbox email");

    let cleaner = TrashCleaner::new(db.pool_clone(), 30 * day, Duration::from_secs(3600));
    assert_eq!(cleaner.purge(now).await.expect("purge"), 1);
    assert_eq!(cleaner.purge(now).await.expect("second purge"), 0);
    assert_eq!(fixtures.count("emails", account.id).await.expect("count"), 2);
}

#[tokio::test]
async fn sender_stats_count_whole_addresses_only() {
    let db = TestDatabase::new().await.expect("test database");
    let fixtures = TestFixtures::new(db.pool());
    let account = fixtures
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");

    for (provider_id, to) in [("s1", "jimbob@x.com"), ("s2", "Bob@X.com, carol@y.com")] {
        let mut sent = EmailSeed::new(account.id, provider_id);
        sent.folder = Folder::Sent;
        sent.is_sent = true;
        sent.from_email = "me@example.com".into();
        sent.to_addresses = to.into();
        fixtures.insert_email(&sent).await.expect("sent mail");
    }

    let bob = importance::lookup_sender_stats(db.pool(), account.id, "bob@x.com")
        .await
        .expect("bob stats");
    assert_eq!(bob.sent_to, 1, "jimbob@x.com is a different person");
    let jimbob = importance::lookup_sender_stats(db.pool(), account.id, "jimbob@x.com")
        .await
        .expect("jimbob stats");
    assert_eq!(jimbob.sent_to, 1);
    let carol = importance::lookup_sender_stats(db.pool(), account.id, "carol@y.com")
        .await
        .expect("carol stats");
    assert_eq!(carol.sent_to, 1);
    let ob = importance::lookup_sender_stats(db.pool(), account.id, "ob@x.com")
        .await
        .expect("ob stats");
    assert_eq!(ob.sent_to, 0);
}
