//! Account synchronisation.
//!
//! A sync pulls recent messages from an account's provider and folds them
//! into the local store:
//!
//! 1. **Fetch**: ask the provider for messages received since the last
//!    completed sync (or the newest batch on the first run).
//! 2. **Classify**: score each new inbox message with the importance rules,
//!    oldest first, so sender statistics reflect earlier mail in the batch.
//! 3. **Upsert**: keyed by `(account_id, provider_id)`; a message seen twice
//!    only has its read/starred flags refreshed.
//! 4. **Contacts**: every new sender is recorded for autocomplete.
//! 5. **Checkpoint**: `last_synced_at` moves to the instant the sync started,
//!    unless the batch came back full. Then it stops at the newest message
//!    fetched and the next sync picks up the rest of the backlog. The first
//!    sync of an account only takes the newest batch.
//! 6. **Notify**: `new_mail` (when anything was inserted) and `sync_complete`
//!    go out through the realtime hub.
//!
//! Syncs of the same account are serialised with a per-account lock so an
//! IDLE wake-up and the periodic loop never race on the same rows.

use crate::database::{accounts, contacts, emails};
use crate::database::emails::UpsertOutcome;
use crate::importance::{self, ImportanceSignals};
use crate::models::{Folder, now_millis};
use crate::providers::{FetchRequest, ProviderError, ProviderFactory, RemoteMessage};
use crate::realtime::{RealtimeEvent, RealtimeHub};
use dashmap::DashMap;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("account {0} not found")]
    AccountNotFound(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Outcome of one account sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub account_id: i64,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Ids of newly stored inbox messages.
    pub new_email_ids: Vec<i64>,
}

pub struct SyncService {
    pool: SqlitePool,
    providers: Arc<dyn ProviderFactory>,
    hub: Arc<RealtimeHub>,
    batch_size: usize,
    account_locks: DashMap<i64, Arc<Mutex<()>>>,
}

fn signals_for(message: &RemoteMessage, account_email: &str) -> ImportanceSignals {
    ImportanceSignals {
        from_email: message.from_email.clone(),
        subject: message.subject.clone(),
        snippet: message.snippet.clone(),
        to_addresses: message.to.clone(),
        account_email: account_email.to_string(),
        labels: message.category.clone().into_iter().collect(),
        has_list_unsubscribe: message.has_list_unsubscribe,
        is_starred: message.is_starred,
    }
}

/// Where the next sync resumes. `messages` is sorted oldest first.
fn next_checkpoint(
    since: Option<i64>,
    messages: &[RemoteMessage],
    batch_size: usize,
    started_at: i64,
) -> i64 {
    let Some(since) = since else {
        return started_at;
    };
    if messages.len() < batch_size {
        return started_at;
    }
    match messages.last() {
        Some(newest) if newest.received_at > since => newest.received_at,
        _ => {
            log::warn!(
                "sync: a full batch shares timestamp {}; stepping past it",
                since
            );
            since + 1
        }
    }
}

impl SyncService {
    pub fn new(
        pool: SqlitePool,
        providers: Arc<dyn ProviderFactory>,
        hub: Arc<RealtimeHub>,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            providers,
            hub,
            batch_size: batch_size.max(1),
            account_locks: DashMap::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn lock_for(&self, account_id: i64) -> Arc<Mutex<()>> {
        self.account_locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the lock of a deleted account.
    pub fn forget(&self, account_id: i64) {
        self.account_locks.remove(&account_id);
    }

    pub async fn sync_account(&self, account_id: i64) -> Result<SyncReport, SyncError> {
        let lock = self.lock_for(account_id);
        let _guard = lock.lock().await;

        let account = accounts::fetch_account(&self.pool, account_id)
            .await?
            .ok_or(SyncError::AccountNotFound(account_id))?;
        let provider = self.providers.for_account(&account)?;

        let started_at = now_millis();
        let mut messages = provider
            .fetch_messages(FetchRequest {
                since: account.last_synced_at,
                limit: self.batch_size,
            })
            .await?;
        messages.sort_by_key(|m| m.received_at);

        let mut report = SyncReport {
            account_id,
            fetched: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            let is_important = if message.folder == Folder::Inbox {
                importance::classify(&self.pool, account_id, &signals_for(message, &account.email)).await?
            } else {
                false
            };

            match emails::upsert_remote(&self.pool, account_id, message, is_important).await? {
                UpsertOutcome::Inserted(id) => {
                    report.inserted += 1;
                    if message.folder == Folder::Inbox {
                        report.new_email_ids.push(id);
                    }
                    if message.folder != Folder::Sent {
                        contacts::record_contact(
                            &self.pool,
                            account_id,
                            &message.from_email,
                            message.from_name.as_deref(),
                            message.received_at,
                        )
                        .await?;
                    }
                }
                UpsertOutcome::Updated(_) => report.updated += 1,
                UpsertOutcome::Unchanged(_) => {}
            }
        }

        let checkpoint = next_checkpoint(account.last_synced_at, &messages, self.batch_size, started_at);
        accounts::mark_synced(&self.pool, account_id, checkpoint).await?;

        log::info!(
            "sync: account {} fetched {} inserted {} updated {}",
            account_id,
            report.fetched,
            report.inserted,
            report.updated
        );

        if !report.new_email_ids.is_empty() {
            self.hub.broadcast(&RealtimeEvent::NewMail {
                account_id,
                count: report.new_email_ids.len(),
                email_ids: report.new_email_ids.clone(),
            });
        }
        self.hub.broadcast(&RealtimeEvent::SyncComplete {
            account_id,
            inserted: report.inserted,
            updated: report.updated,
        });

        Ok(report)
    }

    /// Sync every account; failures are logged and do not stop the others.
    pub async fn sync_all(&self) -> Result<Vec<SyncReport>, SyncError> {
        self.sync_matching(|_| true).await
    }

    /// Sync accounts that do not get IDLE push notifications.
    pub async fn sync_polled_accounts(&self) -> Result<Vec<SyncReport>, SyncError> {
        self.sync_matching(|kind| !kind.supports_idle()).await
    }

    async fn sync_matching(
        &self,
        include: impl Fn(crate::models::ProviderKind) -> bool,
    ) -> Result<Vec<SyncReport>, SyncError> {
        let mut reports = Vec::new();
        for account in accounts::list_accounts(&self.pool).await? {
            if !include(account.provider) {
                continue;
            }
            match self.sync_account(account.id).await {
                Ok(report) => reports.push(report),
                Err(e) => log::error!("sync: account {} ({}) failed: {}", account.id, account.email, e),
            }
        }
        Ok(reports)
    }
}
