//! Scheduled and undo-window sends.
//!
//! Each tick selects the rows that are due, deletes a row, then hands the
//! message to the provider. Deleting first means a row is attempted at most
//! once: a provider failure is logged and the message is dropped, and a
//! cancelled pending send that was already claimed is simply not found.

use crate::database::outbox::{self, Outbox};
use crate::database::{accounts, contacts, emails};
use crate::importance;
use crate::models::{QueuedMessage, now_millis, split_addresses};
use crate::providers::{OutgoingMessage, ProviderError, ProviderFactory, SentReceipt};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("account {0} no longer exists")]
    AccountMissing(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Counts from one pass over an outbox table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub sent: usize,
    pub failed: usize,
}

fn outgoing(queued: &QueuedMessage, from: &str, from_name: Option<&str>) -> OutgoingMessage {
    OutgoingMessage {
        from: from.to_string(),
        from_name: from_name.map(str::to_string),
        to: split_addresses(&queued.to_addresses),
        cc: split_addresses(&queued.cc_addresses),
        bcc: split_addresses(&queued.bcc_addresses),
        subject: queued.subject.clone(),
        body: queued.body.clone(),
        in_reply_to: queued.in_reply_to.clone(),
        thread_id: queued.thread_id.clone(),
    }
}

/// Send one queued message and record its side effects locally: a `sent`
/// copy for sender statistics, contact counts for each recipient, and removal
/// of the draft it came from. Writing to someone for the first time re-scores
/// the inbox so their waiting mail moves to Important.
pub async fn deliver(
    pool: &SqlitePool,
    providers: &dyn ProviderFactory,
    queued: &QueuedMessage,
) -> Result<SentReceipt, SendError> {
    let account = accounts::fetch_account(pool, queued.account_id)
        .await?
        .ok_or(SendError::AccountMissing(queued.account_id))?;
    let provider = providers.for_account(&account)?;
    let message = outgoing(queued, &account.email, account.display_name.as_deref());

    let mut first_contact = false;
    for recipient in message.to.iter().chain(&message.cc) {
        if importance::lookup_sender_stats(pool, account.id, recipient).await?.sent_to == 0 {
            first_contact = true;
            break;
        }
    }

    let receipt = provider.send(&message).await?;

    let now = now_millis();
    emails::insert_sent(pool, account.id, &message, &receipt).await?;
    for recipient in message.to.iter().chain(&message.cc).chain(&message.bcc) {
        contacts::record_contact(pool, account.id, recipient, None, now).await?;
    }
    if first_contact {
        match importance::reclassify_account(pool, account.id, &account.email).await {
            Ok(changed) if changed > 0 => {
                log::info!("account {}: {} inbox messages re-scored after send", account.id, changed)
            }
            Ok(_) => {}
            Err(e) => log::warn!("account {}: re-scoring after send failed: {}", account.id, e),
        }
    }
    if let Some(draft_id) = queued.draft_id {
        sqlx::query("DELETE FROM drafts WHERE id = ? AND account_id = ?")
            .bind(draft_id)
            .bind(account.id)
            .execute(pool)
            .await?;
    }

    Ok(receipt)
}

/// Polls one outbox table and sends whatever is due.
pub struct SendProcessor {
    outbox: Outbox,
    pool: SqlitePool,
    providers: Arc<dyn ProviderFactory>,
    interval: Duration,
}

impl SendProcessor {
    pub fn scheduled(pool: SqlitePool, providers: Arc<dyn ProviderFactory>, interval: Duration) -> Self {
        Self {
            outbox: Outbox::Scheduled,
            pool,
            providers,
            interval,
        }
    }

    pub fn pending(pool: SqlitePool, providers: Arc<dyn ProviderFactory>, interval: Duration) -> Self {
        Self {
            outbox: Outbox::Pending,
            pool,
            providers,
            interval,
        }
    }

    /// One pass: claim-by-delete and send every row due at `now`.
    pub async fn process_ready(&self, now: i64) -> Result<ProcessSummary, sqlx::Error> {
        let mut summary = ProcessSummary::default();

        for queued in outbox::due(&self.pool, self.outbox, now).await? {
            if !outbox::remove(&self.pool, self.outbox, queued.id).await? {
                continue;
            }

            match deliver(&self.pool, self.providers.as_ref(), &queued).await {
                Ok(_) => {
                    summary.sent += 1;
                    log::info!(
                        "{} send {}: delivered for account {}",
                        self.outbox.name(),
                        queued.id,
                        queued.account_id
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    log::error!(
                        "{} send {}: dropped after failure: {}",
                        self.outbox.name(),
                        queued.id,
                        e
                    );
                }
            }
        }

        Ok(summary)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        log::info!(
            "{} send processor started (every {:?})",
            self.outbox.name(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.process_ready(now_millis()).await {
                        log::error!("{} send processor: poll failed: {}", self.outbox.name(), e);
                    }
                }
            }
        }
        log::info!("{} send processor stopped", self.outbox.name());
    }
}
