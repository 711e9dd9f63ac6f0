//! IMAP IDLE push for IMAP and Yahoo accounts.
//!
//! Each watched account gets one blocking thread holding an IDLE connection
//! and one async task that turns "mailbox changed" wake-ups into syncs. The
//! blocking side reconnects after a fixed delay whenever the connection
//! closes or fails, until the account is unwatched. IDLE is re-issued every
//! `idle_timeout` so servers never see a silent connection for 30 minutes.
//!
//! The blocking wait cannot be interrupted, so an unwatched thread lingers
//! until its current wait ends. The async task stops immediately and the
//! thread exits as soon as it notices its channel or token is closed.

use crate::database::accounts;
use crate::models::Account;
use crate::providers::{ImapEndpoint, ImapSession, ProviderResult};
use crate::sync::SyncService;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const INBOX: &str = "INBOX";
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Result of one IDLE wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    MailboxChanged,
    TimedOut,
}

/// An open connection parked in IDLE.
pub trait IdleConnection: Send {
    /// Block until the server reports a change or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> ProviderResult<IdleEvent>;
}

/// Opens IDLE connections for an account.
pub trait MailboxWatcher: Send + Sync {
    fn open(&self, account: &Account) -> ProviderResult<Box<dyn IdleConnection>>;
}

/// The real watcher: TLS IMAP session with INBOX selected.
pub struct ImapWatcher;

struct ImapIdleConnection {
    session: ImapSession,
}

impl IdleConnection for ImapIdleConnection {
    fn wait(&mut self, timeout: Duration) -> ProviderResult<IdleEvent> {
        let handle = self.session.idle()?;
        match handle.wait_with_timeout(timeout)? {
            ::imap::extensions::idle::WaitOutcome::MailboxChanged => Ok(IdleEvent::MailboxChanged),
            ::imap::extensions::idle::WaitOutcome::TimedOut => Ok(IdleEvent::TimedOut),
        }
    }
}

impl Drop for ImapIdleConnection {
    fn drop(&mut self) {
        let _ = self.session.logout();
    }
}

impl MailboxWatcher for ImapWatcher {
    fn open(&self, account: &Account) -> ProviderResult<Box<dyn IdleConnection>> {
        let mut session = ImapEndpoint::for_account(account)?.connect()?;
        session.select(INBOX)?;
        Ok(Box::new(ImapIdleConnection { session }))
    }
}

/// Sleep in short slices so cancellation is noticed during the reconnect delay.
fn interruptible_sleep(delay: Duration, stop: &CancellationToken) {
    let mut remaining = delay;
    while !remaining.is_zero() && !stop.is_cancelled() {
        let step = remaining.min(SLEEP_SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
}

struct IdleLoop {
    account: Account,
    watcher: Arc<dyn MailboxWatcher>,
    events: mpsc::UnboundedSender<()>,
    stop: CancellationToken,
    reconnect_delay: Duration,
    idle_timeout: Duration,
}

impl IdleLoop {
    fn run(self) {
        let id = self.account.id;
        log::info!("idle {}: watching {}", id, self.account.email);

        'outer: while !self.stop.is_cancelled() {
            match self.watcher.open(&self.account) {
                Ok(mut connection) => {
                    log::debug!("idle {}: connected", id);
                    while !self.stop.is_cancelled() {
                        match connection.wait(self.idle_timeout) {
                            Ok(IdleEvent::MailboxChanged) => {
                                if self.events.send(()).is_err() {
                                    break 'outer;
                                }
                            }
                            Ok(IdleEvent::TimedOut) => {}
                            Err(e) => {
                                log::warn!("idle {}: connection lost: {}", id, e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => log::warn!("idle {}: connect failed: {}", id, e),
            }

            if self.stop.is_cancelled() {
                break;
            }
            log::debug!("idle {}: reconnecting in {:?}", id, self.reconnect_delay);
            interruptible_sleep(self.reconnect_delay, &self.stop);
        }

        log::info!("idle {}: stopped", id);
    }
}

struct WatchHandle {
    stop: CancellationToken,
    consumer: JoinHandle<()>,
}

/// One IDLE watcher per IMAP-capable account.
pub struct IdleManager {
    sync: Arc<SyncService>,
    watcher: Arc<dyn MailboxWatcher>,
    reconnect_delay: Duration,
    idle_timeout: Duration,
    watchers: DashMap<i64, WatchHandle>,
}

impl IdleManager {
    pub fn new(
        sync: Arc<SyncService>,
        watcher: Arc<dyn MailboxWatcher>,
        reconnect_delay: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sync,
            watcher,
            reconnect_delay,
            idle_timeout,
            watchers: DashMap::new(),
        }
    }

    /// Start watching an account. Returns `false` when the provider has no
    /// IDLE support or the account is already watched.
    pub fn watch(&self, account: &Account) -> bool {
        if !account.provider.supports_idle() {
            return false;
        }
        // The entry holds its shard lock until the handle is stored.
        let slot = match self.watchers.entry(account.id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => slot,
        };

        let stop = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let idle_loop = IdleLoop {
            account: account.clone(),
            watcher: Arc::clone(&self.watcher),
            events: tx,
            stop: stop.clone(),
            reconnect_delay: self.reconnect_delay,
            idle_timeout: self.idle_timeout,
        };
        tokio::task::spawn_blocking(move || idle_loop.run());

        let sync = Arc::clone(&self.sync);
        let account_id = account.id;
        let consumer_stop = stop.clone();
        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = consumer_stop.cancelled() => break,
                    event = rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                        // Several EXISTS notifications in a row need only one sync.
                        while rx.try_recv().is_ok() {}
                        match sync.sync_account(account_id).await {
                            Ok(report) => log::debug!(
                                "idle {}: sync after push inserted {}",
                                account_id,
                                report.inserted
                            ),
                            Err(e) => log::error!("idle {}: sync after push failed: {}", account_id, e),
                        }
                    }
                }
            }
        });

        slot.insert(WatchHandle { stop, consumer });
        true
    }

    pub fn unwatch(&self, account_id: i64) -> bool {
        match self.watchers.remove(&account_id) {
            Some((_, handle)) => {
                handle.stop.cancel();
                handle.consumer.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, account_id: i64) -> bool {
        self.watchers.contains_key(&account_id)
    }

    /// Ids of the accounts currently watched, ascending.
    pub fn watched(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.watchers.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Watch every IMAP-capable account in the database.
    pub async fn watch_all(&self, pool: &SqlitePool) -> Result<usize, sqlx::Error> {
        let started = accounts::list_accounts(pool)
            .await?
            .iter()
            .filter(|account| self.watch(account))
            .count();
        Ok(started)
    }

    pub fn shutdown(&self) {
        let ids = self.watched();
        for id in &ids {
            self.unwatch(*id);
        }
        if !ids.is_empty() {
            log::info!("idle: stopped {} watchers", ids.len());
        }
    }
}
