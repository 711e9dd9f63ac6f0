use hamba::database::run_migrations;
use hamba::models::ProviderKind;
use hamba::test_support::{TestDatabase, TestFixtures};

#[tokio::test]
async fn migrations_are_idempotent() {
    let db = TestDatabase::new().await.expect("test database");

    run_migrations(db.pool()).await.expect("second run is a no-op");
    db.reset().await.expect("reset re-runs migrations");

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' AND name != 'sqlite_sequence' ORDER BY name",
    )
    .fetch_all(db.pool())
    .await
    .expect("table listing");

    assert_eq!(
        tables,
        vec![
            "accounts",
            "attachments",
            "contacts",
            "drafts",
            "email_labels",
            "emails",
            "labels",
            "pending_sends",
            "scheduled_emails",
            "signatures",
            "snippets",
        ]
    );
}

#[tokio::test]
async fn foreign_keys_are_enforced() {
    let db = TestDatabase::new().await.expect("test database");

    let orphan = sqlx::query(
        "INSERT INTO drafts (account_id, subject, body, created_at, updated_at) VALUES (999, '', '', 0, 0)",
    )
    .execute(db.pool())
    .await;
    assert!(orphan.is_err(), "insert referencing a missing account must fail");

    let fixtures = TestFixtures::new(db.pool());
    let account = fixtures
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");
    let duplicate = fixtures.insert_account(ProviderKind::Gmail, "me@example.com").await;
    assert!(duplicate.is_err(), "account email is unique");
    assert!(account.id > 0);
}
