use crate::models::{Account, NewAccount, ProviderKind, now_millis};
use sqlx::SqlitePool;

const ACCOUNT_COLUMNS: &str = "id, provider, email, display_name, access_token, refresh_token, \
token_expires_at, imap_host, imap_port, smtp_host, smtp_port, username, password, \
last_synced_at, created_at";

pub async fn fetch_account(pool: &SqlitePool, account_id: i64) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
        .bind(account_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_accounts(pool: &SqlitePool) -> Result<Vec<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"))
        .fetch_all(pool)
        .await
}

pub async fn insert_account(
    pool: &SqlitePool,
    provider: ProviderKind,
    account: &NewAccount,
) -> Result<Account, sqlx::Error> {
    let id = sqlx::query(
        r#"INSERT INTO accounts (provider, email, display_name, access_token, refresh_token,
                                 token_expires_at, imap_host, imap_port, smtp_host, smtp_port,
                                 username, password, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(provider)
    .bind(account.email.trim())
    .bind(&account.display_name)
    .bind(&account.access_token)
    .bind(&account.refresh_token)
    .bind(account.token_expires_at)
    .bind(&account.imap_host)
    .bind(account.imap_port)
    .bind(&account.smtp_host)
    .bind(account.smtp_port)
    .bind(&account.username)
    .bind(&account.password)
    .bind(now_millis())
    .execute(pool)
    .await?
    .last_insert_rowid();

    fetch_account(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

/// Delete an account; every dependent row goes with it through `ON DELETE CASCADE`.
pub async fn delete_account(pool: &SqlitePool, account_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_synced(pool: &SqlitePool, account_id: i64, at: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE accounts SET last_synced_at = ? WHERE id = ?")
        .bind(at)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}
