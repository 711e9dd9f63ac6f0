//! Shared queries for the two outbox tables.

use crate::models::{ComposeRequest, QueuedMessage, join_addresses, now_millis};
use sqlx::SqlitePool;

/// Which outbox table a queued message lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbox {
    /// `scheduled_emails`, due at `send_at`.
    Scheduled,
    /// `pending_sends`, due at `send_after` once the undo window closes.
    Pending,
}

impl Outbox {
    fn table(self) -> &'static str {
        match self {
            Outbox::Scheduled => "scheduled_emails",
            Outbox::Pending => "pending_sends",
        }
    }

    fn due_column(self) -> &'static str {
        match self {
            Outbox::Scheduled => "send_at",
            Outbox::Pending => "send_after",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Outbox::Scheduled => "scheduled",
            Outbox::Pending => "pending",
        }
    }

    fn select(self) -> String {
        format!(
            "SELECT id, account_id, to_addresses, cc_addresses, bcc_addresses, subject, body, \
             in_reply_to, thread_id, draft_id, {} AS due_at, created_at FROM {}",
            self.due_column(),
            self.table()
        )
    }
}

pub async fn enqueue(
    pool: &SqlitePool,
    outbox: Outbox,
    request: &ComposeRequest,
    due_at: i64,
) -> Result<QueuedMessage, sqlx::Error> {
    let id = sqlx::query(&format!(
        "INSERT INTO {} (account_id, to_addresses, cc_addresses, bcc_addresses, subject, body, \
         in_reply_to, thread_id, draft_id, {}, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        outbox.table(),
        outbox.due_column()
    ))
    .bind(request.account_id)
    .bind(join_addresses(&request.to))
    .bind(join_addresses(&request.cc))
    .bind(join_addresses(&request.bcc))
    .bind(&request.subject)
    .bind(&request.body)
    .bind(&request.in_reply_to)
    .bind(&request.thread_id)
    .bind(request.draft_id)
    .bind(due_at)
    .bind(now_millis())
    .execute(pool)
    .await?
    .last_insert_rowid();

    fetch(pool, outbox, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn fetch(pool: &SqlitePool, outbox: Outbox, id: i64) -> Result<Option<QueuedMessage>, sqlx::Error> {
    sqlx::query_as::<_, QueuedMessage>(&format!("{} WHERE id = ?", outbox.select()))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_for_account(
    pool: &SqlitePool,
    outbox: Outbox,
    account_id: i64,
) -> Result<Vec<QueuedMessage>, sqlx::Error> {
    sqlx::query_as::<_, QueuedMessage>(&format!(
        "{} WHERE account_id = ? ORDER BY {} ASC, id ASC",
        outbox.select(),
        outbox.due_column()
    ))
    .bind(account_id)
    .fetch_all(pool)
    .await
}

/// Rows whose due time is at or before `now`, oldest first.
pub async fn due(pool: &SqlitePool, outbox: Outbox, now: i64) -> Result<Vec<QueuedMessage>, sqlx::Error> {
    sqlx::query_as::<_, QueuedMessage>(&format!(
        "{} WHERE {} <= ? ORDER BY {} ASC, id ASC",
        outbox.select(),
        outbox.due_column(),
        outbox.due_column()
    ))
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Delete a row. `false` means it was already gone (sent or cancelled).
pub async fn remove(pool: &SqlitePool, outbox: Outbox, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", outbox.table()))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
