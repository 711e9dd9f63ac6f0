use hamba::database::contacts;
use hamba::database::outbox::{self, Outbox};
use hamba::models::{Account, ComposeRequest, DataResponse, ProviderKind, now_millis};
use hamba::routes::accounts::{create_account, delete_account, get_account, list_accounts};
use hamba::test_support::{EmailSeed, TestDatabase, TestFixtures, TestRocketBuilder};
use rocket::http::{ContentType, Status};
use rocket::routes;
use serde_json::{Value, json};

fn compose(account_id: i64) -> ComposeRequest {
    ComposeRequest {
        account_id,
        to: vec!["friend@example.com".into()],
        cc: Vec::new(),
        bcc: Vec::new(),
        subject: "Hello".into(),
        body: "Hi there".into(),
        in_reply_to: None,
        thread_id: None,
        draft_id: None,
        send_at: None,
    }
}

#[tokio::test]
async fn create_then_read_account() {
    let db = TestDatabase::new().await.expect("test database");
    let client = TestRocketBuilder::new()
        .manage_pool(db.pool_clone())
        .mount_api_routes(routes![create_account, get_account, list_accounts])
        .async_client()
        .await;

    let response = client
        .post("/api/accounts")
        .header(ContentType::JSON)
        .body(
            json!({
                "provider": "gmail",
                "email": "me@example.com",
                "displayName": "Me",
                "accessToken": "ya29.secret"
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let raw: Value = response.into_json().await.expect("account JSON");
    assert_eq!(raw["provider"], "gmail");
    assert!(raw.get("accessToken").is_none(), "tokens are never serialized");
    let id = raw["id"].as_i64().expect("numeric id");

    let fetched: Account = client
        .get(format!("/api/accounts/{id}"))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("account");
    assert_eq!(fetched.email, "me@example.com");
    assert_eq!(fetched.provider, ProviderKind::Gmail);

    let listed: DataResponse<Vec<Account>> = client
        .get("/api/accounts")
        .dispatch()
        .await
        .into_json()
        .await
        .expect("list");
    assert_eq!(listed.data.len(), 1);
}

#[tokio::test]
async fn invalid_accounts_are_rejected_with_error_body() {
    let db = TestDatabase::new().await.expect("test database");
    let client = TestRocketBuilder::new()
        .manage_pool(db.pool_clone())
        .mount_api_routes(routes![create_account, get_account])
        .async_client()
        .await;

    let unknown = client
        .post("/api/accounts")
        .header(ContentType::JSON)
        .body(json!({"provider": "aol", "email": "me@aol.com"}).to_string())
        .dispatch()
        .await;
    assert_eq!(unknown.status(), Status::BadRequest);
    let body: Value = unknown.into_json().await.expect("error JSON");
    assert!(body["error"].as_str().unwrap().contains("aol"));

    let missing_password = client
        .post("/api/accounts")
        .header(ContentType::JSON)
        .body(json!({"provider": "yahoo", "email": "me@yahoo.com"}).to_string())
        .dispatch()
        .await;
    assert_eq!(missing_password.status(), Status::BadRequest);

    let payload = json!({"provider": "microsoft", "email": "me@outlook.com", "accessToken": "t"}).to_string();
    let first = client
        .post("/api/accounts")
        .header(ContentType::JSON)
        .body(payload.clone())
        .dispatch()
        .await;
    assert_eq!(first.status(), Status::Ok);
    let duplicate = client
        .post("/api/accounts")
        .header(ContentType::JSON)
        .body(payload)
        .dispatch()
        .await;
    assert_eq!(duplicate.status(), Status::BadRequest);

    let not_found = client.get("/api/accounts/4242").dispatch().await;
    assert_eq!(not_found.status(), Status::NotFound);
    let body: Value = not_found.into_json().await.expect("error JSON");
    assert_eq!(body["error"], "Account 4242 not found");

    let bad_id = client.get("/api/accounts/0").dispatch().await;
    assert_eq!(bad_id.status(), Status::BadRequest);
}

#[tokio::test]
async fn deleting_an_account_cascades_to_everything_it_owns() {
    let db = TestDatabase::new().await.expect("test database");
    let pool = db.pool_clone();
    let fixtures = TestFixtures::new(&pool);

    let account = fixtures
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");
    let other = fixtures
        .insert_account(ProviderKind::Gmail, "other@example.com")
        .await
        .expect("other account");

    let email_id = fixtures
        .insert_email(&EmailSeed::new(account.id, "m1"))
        .await
        .expect("email");
    fixtures
        .insert_email(&EmailSeed::new(other.id, "m1"))
        .await
        .expect("other email");

    let label_id = sqlx::query("INSERT INTO labels (account_id, name, created_at) VALUES (?, 'Work', 0)")
        .bind(account.id)
        .execute(&pool)
        .await
        .expect("label")
        .last_insert_rowid();
    sqlx::query("INSERT INTO email_labels (email_id, label_id) VALUES (?, ?)")
        .bind(email_id)
        .bind(label_id)
        .execute(&pool)
        .await
        .expect("email label");
    sqlx::query("INSERT INTO drafts (account_id, created_at, updated_at) VALUES (?, 0, 0)")
        .bind(account.id)
        .execute(&pool)
        .await
        .expect("draft");
    sqlx::query("INSERT INTO signatures (account_id, name, body, created_at, updated_at) VALUES (?, 'Sig', '--', 0, 0)")
        .bind(account.id)
        .execute(&pool)
        .await
        .expect("signature");
    contacts::record_contact(&pool, account.id, "friend@example.com", None, now_millis())
        .await
        .expect("contact");
    outbox::enqueue(&pool, Outbox::Scheduled, &compose(account.id), now_millis() + 60_000)
        .await
        .expect("scheduled");
    outbox::enqueue(&pool, Outbox::Pending, &compose(account.id), now_millis() + 10_000)
        .await
        .expect("pending");

    let client = TestRocketBuilder::new()
        .manage_pool(pool.clone())
        .mount_api_routes(routes![delete_account])
        .async_client()
        .await;

    let response = client.delete(format!("/api/accounts/{}", account.id)).dispatch().await;
    assert_eq!(response.status(), Status::NoContent);

    for table in [
        "emails",
        "labels",
        "drafts",
        "contacts",
        "signatures",
        "scheduled_emails",
        "pending_sends",
    ] {
        assert_eq!(fixtures.count(table, account.id).await.expect(table), 0, "{table} not cleared");
    }
    let email_labels: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_labels")
        .fetch_one(&pool)
        .await
        .expect("email_labels count");
    assert_eq!(email_labels, 0);
    assert_eq!(fixtures.count("emails", other.id).await.expect("other"), 1);

    let again = client.delete(format!("/api/accounts/{}", account.id)).dispatch().await;
    assert_eq!(again.status(), Status::NotFound);
}
