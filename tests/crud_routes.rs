use hamba::models::{DataResponse, Draft, ProviderKind, Signature, Snippet};
use hamba::routes::drafts::{create_draft, delete_draft, get_draft, list_drafts, update_draft};
use hamba::routes::signatures::{create_signature, delete_signature, list_signatures, update_signature};
use hamba::routes::snippets::{create_snippet, delete_snippet, list_snippets, update_snippet};
use hamba::test_support::{TestDatabase, TestFixtures, TestRocketBuilder};
use rocket::http::{ContentType, Status};
use rocket::routes;
use serde_json::json;

#[tokio::test]
async fn drafts_round_trip_through_the_api() {
    let db = TestDatabase::new().await.expect("test database");
    let fixtures = TestFixtures::new(db.pool());
    let account = fixtures
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");
    let other = fixtures
        .insert_account(ProviderKind::Gmail, "other@example.com")
        .await
        .expect("other account");

    let client = TestRocketBuilder::new()
        .manage_pool(db.pool_clone())
        .mount_api_routes(routes![create_draft, get_draft, list_drafts, update_draft, delete_draft])
        .async_client()
        .await;

    let created: Draft = client
        .post("/api/drafts")
        .header(ContentType::JSON)
        .body(json!({"accountId": account.id, "to": ["a@b.com", "c@d.com"], "subject": "Plans"}).to_string())
        .dispatch()
        .await
        .into_json()
        .await
        .expect("draft");
    assert_eq!(created.to_addresses, "a@b.com, c@d.com");
    assert_eq!(created.body, "");

    let updated: Draft = client
        .put(format!("/api/drafts/{}", created.id))
        .header(ContentType::JSON)
        .body(json!({"accountId": account.id, "to": ["a@b.com"], "subject": "Plans", "body": "Friday?"}).to_string())
        .dispatch()
        .await
        .into_json()
        .await
        .expect("updated draft");
    assert_eq!(updated.body, "Friday?");
    assert_eq!(updated.to_addresses, "a@b.com");
    assert!(updated.updated_at >= created.updated_at);

    let moved = client
        .put(format!("/api/drafts/{}", created.id))
        .header(ContentType::JSON)
        .body(json!({"accountId": other.id}).to_string())
        .dispatch()
        .await;
    assert_eq!(moved.status(), Status::BadRequest);

    let listed: DataResponse<Vec<Draft>> = client
        .get(format!("/api/accounts/{}/drafts", account.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("drafts");
    assert_eq!(listed.data.len(), 1);
    assert_eq!(listed.data[0].subject, "Plans");

    let deleted = client.delete(format!("/api/drafts/{}", created.id)).dispatch().await;
    assert_eq!(deleted.status(), Status::NoContent);
    let gone = client.get(format!("/api/drafts/{}", created.id)).dispatch().await;
    assert_eq!(gone.status(), Status::NotFound);
}

#[tokio::test]
async fn snippet_shortcuts_are_unique_and_validated() {
    let db = TestDatabase::new().await.expect("test database");
    let client = TestRocketBuilder::new()
        .manage_pool(db.pool_clone())
        .mount_api_routes(routes![create_snippet, list_snippets, update_snippet, delete_snippet])
        .async_client()
        .await;

    let created: Snippet = client
        .post("/api/snippets")
        .header(ContentType::JSON)
        .body(json!({"shortcut": "ty", "title": "Thanks", "body": "Thank you!"}).to_string())
        .dispatch()
        .await
        .into_json()
        .await
        .expect("snippet");
    assert_eq!(created.shortcut, "ty");

    let duplicate = client
        .post("/api/snippets")
        .header(ContentType::JSON)
        .body(json!({"shortcut": "ty", "title": "Again", "body": ""}).to_string())
        .dispatch()
        .await;
    assert_eq!(duplicate.status(), Status::BadRequest);

    let spaced = client
        .post("/api/snippets")
        .header(ContentType::JSON)
        .body(json!({"shortcut": "thank you", "title": "Thanks", "body": ""}).to_string())
        .dispatch()
        .await;
    assert_eq!(spaced.status(), Status::BadRequest);

    let renamed: Snippet = client
        .put(format!("/api/snippets/{}", created.id))
        .header(ContentType::JSON)
        .body(json!({"shortcut": "thx", "title": "Thanks", "body": "Thanks a lot"}).to_string())
        .dispatch()
        .await
        .into_json()
        .await
        .expect("renamed");
    assert_eq!(renamed.shortcut, "thx");

    let listed: DataResponse<Vec<Snippet>> = client
        .get("/api/snippets")
        .dispatch()
        .await
        .into_json()
        .await
        .expect("snippets");
    assert_eq!(listed.data.len(), 1);

    let deleted = client.delete(format!("/api/snippets/{}", created.id)).dispatch().await;
    assert_eq!(deleted.status(), Status::NoContent);
}

#[tokio::test]
async fn only_one_signature_per_account_is_default() {
    let db = TestDatabase::new().await.expect("test database");
    let account = TestFixtures::new(db.pool())
        .insert_account(ProviderKind::Gmail, "me@example.com")
        .await
        .expect("account");
    let client = TestRocketBuilder::new()
        .manage_pool(db.pool_clone())
        .mount_api_routes(routes![create_signature, list_signatures, update_signature, delete_signature])
        .async_client()
        .await;

    let create = |name: &'static str| {
        json!({"name": name, "body": format!("-- {name}"), "isDefault": true}).to_string()
    };

    let work: Signature = client
        .post(format!("/api/accounts/{}/signatures", account.id))
        .header(ContentType::JSON)
        .body(create("Work"))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("work signature");
    assert!(work.is_default);

    let personal: Signature = client
        .post(format!("/api/accounts/{}/signatures", account.id))
        .header(ContentType::JSON)
        .body(create("Personal"))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("personal signature");
    assert!(personal.is_default);

    let listed: DataResponse<Vec<Signature>> = client
        .get(format!("/api/accounts/{}/signatures", account.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("signatures");
    let defaults: Vec<_> = listed.data.iter().filter(|s| s.is_default).map(|s| s.id).collect();
    assert_eq!(defaults, vec![personal.id]);

    let promoted: Signature = client
        .put(format!("/api/signatures/{}", work.id))
        .header(ContentType::JSON)
        .body(create("Work"))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("promoted");
    assert!(promoted.is_default);

    let listed: DataResponse<Vec<Signature>> = client
        .get(format!("/api/accounts/{}/signatures", account.id))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("signatures");
    assert_eq!(listed.data[0].id, work.id);
    assert!(!listed.data[1].is_default);

    let unnamed = client
        .post(format!("/api/accounts/{}/signatures", account.id))
        .header(ContentType::JSON)
        .body(json!({"name": "  ", "body": ""}).to_string())
        .dispatch()
        .await;
    assert_eq!(unnamed.status(), Status::BadRequest);

    let deleted = client.delete(format!("/api/signatures/{}", personal.id)).dispatch().await;
    assert_eq!(deleted.status(), Status::NoContent);
}
