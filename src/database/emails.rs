//! Email storage: provider upserts, listing, folder moves and trash expiry.

use crate::models::{Attachment, Email, EmailSummary, Folder, join_addresses, now_millis};
use crate::providers::{OutgoingMessage, RemoteMessage, SentReceipt};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::atomic::{AtomicU64, Ordering};

const EMAIL_COLUMNS: &str = "id, account_id, provider_id, thread_id, message_id, in_reply_to, \
from_name, from_email, to_addresses, cc_addresses, subject, snippet, body_text, body_html, \
received_at, is_read, is_starred, is_important, is_sent, has_list_unsubscribe, category, folder, \
trashed_at, created_at";

const SUMMARY_COLUMNS: &str = "id, account_id, thread_id, from_name, from_email, to_addresses, \
subject, snippet, received_at, is_read, is_starred, is_important, folder";

/// Prefix of provider ids minted for sent mail the provider did not identify.
pub const LOCAL_PROVIDER_PREFIX: &str = "local-";

static LOCAL_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// What an upsert did to the `(account_id, provider_id)` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
    Unchanged(i64),
}

/// Insert a provider message, or refresh the read/starred flags of the copy
/// already stored. Never creates a second row for the same provider id.
pub async fn upsert_remote(
    pool: &SqlitePool,
    account_id: i64,
    message: &RemoteMessage,
    is_important: bool,
) -> Result<UpsertOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM emails WHERE account_id = ? AND provider_id = ?")
            .bind(account_id)
            .bind(&message.provider_id)
            .fetch_optional(&mut *tx)
            .await?;

    let outcome = if let Some(id) = existing {
        let changed = sqlx::query(
            r#"UPDATE emails SET is_read = ?, is_starred = ?
               WHERE id = ? AND (is_read != ? OR is_starred != ?)"#,
        )
        .bind(message.is_read)
        .bind(message.is_starred)
        .bind(id)
        .bind(message.is_read)
        .bind(message.is_starred)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if changed > 0 {
            UpsertOutcome::Updated(id)
        } else {
            UpsertOutcome::Unchanged(id)
        }
    } else {
        let trashed_at = (message.folder == Folder::Trash).then(now_millis);
        let id = sqlx::query(
            r#"INSERT INTO emails (account_id, provider_id, thread_id, message_id, in_reply_to,
                                   from_name, from_email, to_addresses, cc_addresses, subject,
                                   snippet, body_text, body_html, received_at, is_read, is_starred,
                                   is_important, is_sent, has_list_unsubscribe, category, folder,
                                   trashed_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(account_id)
        .bind(&message.provider_id)
        .bind(&message.thread_id)
        .bind(&message.message_id)
        .bind(&message.in_reply_to)
        .bind(&message.from_name)
        .bind(message.from_email.to_lowercase())
        .bind(join_addresses(&message.to))
        .bind(join_addresses(&message.cc))
        .bind(&message.subject)
        .bind(&message.snippet)
        .bind(&message.body_text)
        .bind(&message.body_html)
        .bind(message.received_at)
        .bind(message.is_read)
        .bind(message.is_starred)
        .bind(is_important)
        .bind(message.folder == Folder::Sent)
        .bind(message.has_list_unsubscribe)
        .bind(&message.category)
        .bind(message.folder)
        .bind(trashed_at)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for attachment in &message.attachments {
            sqlx::query(
                r#"INSERT OR IGNORE INTO attachments (email_id, filename, mime_type, size, provider_attachment_id)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(id)
            .bind(&attachment.filename)
            .bind(&attachment.mime_type)
            .bind(attachment.size)
            .bind(&attachment.provider_attachment_id)
            .execute(&mut *tx)
            .await?;
        }

        UpsertOutcome::Inserted(id)
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Which half of the Split Inbox to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxSplit {
    Important,
    Other,
}

#[derive(Debug, Clone)]
pub struct EmailFilter {
    pub account_id: i64,
    pub folder: Folder,
    pub split: Option<InboxSplit>,
    pub unread_only: bool,
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &EmailFilter) {
    builder
        .push(" WHERE account_id = ")
        .push_bind(filter.account_id)
        .push(" AND folder = ")
        .push_bind(filter.folder);
    match filter.split {
        Some(InboxSplit::Important) => {
            builder.push(" AND is_important = 1");
        }
        Some(InboxSplit::Other) => {
            builder.push(" AND is_important = 0");
        }
        None => {}
    }
    if filter.unread_only {
        builder.push(" AND is_read = 0");
    }
}

/// One page of summaries, newest first, plus the total row count.
pub async fn list_emails(
    pool: &SqlitePool,
    filter: &EmailFilter,
    page: i64,
    size: i64,
) -> Result<(Vec<EmailSummary>, i64), sqlx::Error> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM emails");
    push_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {SUMMARY_COLUMNS} FROM emails"));
    push_filter(&mut select, filter);
    select
        .push(" ORDER BY received_at DESC, id DESC LIMIT ")
        .push_bind(size)
        .push(" OFFSET ")
        .push_bind((page - 1) * size);
    let rows = select.build_query_as::<EmailSummary>().fetch_all(pool).await?;

    Ok((rows, total))
}

/// Substring search over sender, subject and body outside the trash.
pub async fn search_emails(
    pool: &SqlitePool,
    account_id: i64,
    query: &str,
    page: i64,
    size: i64,
) -> Result<(Vec<EmailSummary>, i64), sqlx::Error> {
    let pattern = format!("%{}%", query.trim().to_lowercase());
    const WHERE: &str = "WHERE account_id = ? AND folder != 'trash' AND (
        lower(subject) LIKE ? OR lower(snippet) LIKE ? OR lower(from_email) LIKE ?
        OR lower(COALESCE(from_name, '')) LIKE ? OR lower(COALESCE(body_text, '')) LIKE ?)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM emails {WHERE}"))
        .bind(account_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query_as::<_, EmailSummary>(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM emails {WHERE} ORDER BY received_at DESC, id DESC LIMIT ? OFFSET ?"
    ))
    .bind(account_id)
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .bind(size)
    .bind((page - 1) * size)
    .fetch_all(pool)
    .await?;

    Ok((rows, total))
}

pub async fn fetch_email(pool: &SqlitePool, email_id: i64) -> Result<Option<Email>, sqlx::Error> {
    sqlx::query_as::<_, Email>(&format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?"))
        .bind(email_id)
        .fetch_optional(pool)
        .await
}

pub async fn thread_emails(
    pool: &SqlitePool,
    account_id: i64,
    thread_id: &str,
) -> Result<Vec<Email>, sqlx::Error> {
    sqlx::query_as::<_, Email>(&format!(
        "SELECT {EMAIL_COLUMNS} FROM emails WHERE account_id = ? AND thread_id = ? ORDER BY received_at ASC, id ASC"
    ))
    .bind(account_id)
    .bind(thread_id)
    .fetch_all(pool)
    .await
}

pub async fn attachments_for(pool: &SqlitePool, email_id: i64) -> Result<Vec<Attachment>, sqlx::Error> {
    sqlx::query_as::<_, Attachment>(
        r#"SELECT id, email_id, filename, mime_type, size, provider_attachment_id
           FROM attachments WHERE email_id = ? ORDER BY id"#,
    )
    .bind(email_id)
    .fetch_all(pool)
    .await
}

pub async fn set_flags(
    pool: &SqlitePool,
    email_id: i64,
    is_read: Option<bool>,
    is_starred: Option<bool>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE emails
           SET is_read = COALESCE(?, is_read), is_starred = COALESCE(?, is_starred)
           WHERE id = ?"#,
    )
    .bind(is_read)
    .bind(is_starred)
    .bind(email_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Move an email between folders, stamping `trashed_at` when it enters the trash.
pub async fn move_to_folder(pool: &SqlitePool, email_id: i64, folder: Folder) -> Result<(), sqlx::Error> {
    let trashed_at = (folder == Folder::Trash).then(now_millis);
    sqlx::query("UPDATE emails SET folder = ?, trashed_at = ? WHERE id = ?")
        .bind(folder)
        .bind(trashed_at)
        .bind(email_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_email(pool: &SqlitePool, email_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM emails WHERE id = ?")
        .bind(email_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Permanently remove trashed emails whose `trashed_at` is before `cutoff`.
pub async fn purge_trash_before(pool: &SqlitePool, cutoff: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM emails WHERE folder = 'trash' AND trashed_at IS NOT NULL AND trashed_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Keep a local copy of a message this account just sent.
pub async fn insert_sent(
    pool: &SqlitePool,
    account_id: i64,
    message: &OutgoingMessage,
    receipt: &SentReceipt,
) -> Result<i64, sqlx::Error> {
    let now = now_millis();
    let provider_id = receipt.provider_id.clone().unwrap_or_else(|| {
        format!(
            "{LOCAL_PROVIDER_PREFIX}{}-{}",
            now,
            LOCAL_ID_SEQ.fetch_add(1, Ordering::Relaxed)
        )
    });

    let id = sqlx::query(
        r#"INSERT INTO emails (account_id, provider_id, thread_id, message_id, in_reply_to,
                               from_name, from_email, to_addresses, cc_addresses, subject, snippet,
                               body_text, received_at, is_read, is_sent, folder, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 1, 'sent', ?)
           ON CONFLICT (account_id, provider_id) DO UPDATE SET is_sent = 1"#,
    )
    .bind(account_id)
    .bind(&provider_id)
    .bind(receipt.thread_id.as_ref().or(message.thread_id.as_ref()))
    .bind(&receipt.message_id)
    .bind(&message.in_reply_to)
    .bind(&message.from_name)
    .bind(message.from.to_lowercase())
    .bind(join_addresses(&message.to))
    .bind(join_addresses(&message.cc))
    .bind(&message.subject)
    .bind(crate::providers::message::make_snippet(&message.body))
    .bind(&message.body)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}
