use crate::models::Contact;
use sqlx::SqlitePool;

/// Count one more exchange with `email`, creating the contact on first sight.
pub async fn record_contact(
    pool: &SqlitePool,
    account_id: i64,
    email: &str,
    name: Option<&str>,
    at: i64,
) -> Result<(), sqlx::Error> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Ok(());
    }
    let name = name.map(str::trim).filter(|n| !n.is_empty());

    sqlx::query(
        r#"INSERT INTO contacts (account_id, email, name, contact_count, last_contacted_at)
           VALUES (?, ?, ?, 1, ?)
           ON CONFLICT (account_id, email) DO UPDATE SET
               contact_count = contacts.contact_count + 1,
               name = COALESCE(excluded.name, contacts.name),
               last_contacted_at = MAX(COALESCE(contacts.last_contacted_at, 0), excluded.last_contacted_at)"#,
    )
    .bind(account_id)
    .bind(&email)
    .bind(name)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Autocomplete: case-insensitive substring match on address or name, most
/// contacted first.
pub async fn search_contacts(
    pool: &SqlitePool,
    account_id: i64,
    query: Option<&str>,
    limit: i64,
) -> Result<Vec<Contact>, sqlx::Error> {
    let pattern = format!("%{}%", query.unwrap_or("").trim().to_lowercase());
    sqlx::query_as::<_, Contact>(
        r#"SELECT id, account_id, email, name, contact_count, last_contacted_at
           FROM contacts
           WHERE account_id = ? AND (email LIKE ? OR lower(COALESCE(name, '')) LIKE ?)
           ORDER BY contact_count DESC, last_contacted_at DESC, email ASC
           LIMIT ?"#,
    )
    .bind(account_id)
    .bind(&pattern)
    .bind(&pattern)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;
    use crate::test_support::{TestDatabase, TestFixtures};

    #[tokio::test]
    async fn search_matches_anywhere_in_address_or_name() {
        let db = TestDatabase::new().await.expect("test database");
        let account = TestFixtures::new(db.pool())
            .insert_account(ProviderKind::Gmail, "me@example.com")
            .await
            .expect("account");
        let pool = db.pool();
        record_contact(pool, account.id, "Friend@Example.com", Some("Pat Lee"), 10)
            .await
            .expect("friend");
        record_contact(pool, account.id, "boss@work.test", None, 20)
            .await
            .expect("boss");
        record_contact(pool, account.id, "boss@work.test", None, 30)
            .await
            .expect("boss again");

        let emails = |found: Vec<Contact>| found.into_iter().map(|c| c.email).collect::<Vec<_>>();

        let middle = search_contacts(pool, account.id, Some("IEND"), 10).await.expect("search");
        assert_eq!(emails(middle), vec!["friend@example.com"]);

        let by_name = search_contacts(pool, account.id, Some("lee"), 10).await.expect("search");
        assert_eq!(emails(by_name), vec!["friend@example.com"]);

        let everyone = search_contacts(pool, account.id, None, 10).await.expect("search");
        assert_eq!(emails(everyone), vec!["boss@work.test", "friend@example.com"]);
    }
}
