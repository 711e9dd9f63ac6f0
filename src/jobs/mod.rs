//! Background jobs started on liftoff.
//!
//! - **outbox**: scheduled sends and undo-window sends.
//! - **cleanup**: trash expiry.
//! - **periodic sync**: polls accounts that have no IDLE push.
//!
//! All jobs share one [`CancellationToken`]; cancelling it on shutdown ends
//! every loop at its next tick.

pub mod cleanup;
pub mod outbox;

use crate::config::HambaConfig;
use crate::idle::IdleManager;
use crate::providers::ProviderFactory;
use crate::sync::SyncService;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use cleanup::TrashCleaner;
pub use outbox::{ProcessSummary, SendProcessor};

/// Sync accounts without IDLE on a fixed interval.
pub async fn run_periodic_sync(sync: Arc<SyncService>, interval: Duration, shutdown: CancellationToken) {
    log::info!("periodic sync started (every {:?})", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match sync.sync_polled_accounts().await {
                Ok(reports) => log::debug!("periodic sync: {} accounts synced", reports.len()),
                Err(e) => log::error!("periodic sync failed: {}", e),
            },
        }
    }
}

/// Everything a job needs, cloned out of Rocket's managed state.
pub struct JobContext {
    pub pool: SqlitePool,
    pub config: HambaConfig,
    pub providers: Arc<dyn ProviderFactory>,
    pub sync: Arc<SyncService>,
    pub idle: Arc<IdleManager>,
}

/// Spawn every background loop and start IDLE watchers for existing accounts.
pub async fn spawn_all(ctx: JobContext, shutdown: CancellationToken) {
    let JobContext {
        pool,
        config,
        providers,
        sync,
        idle,
    } = ctx;

    tokio::spawn(
        SendProcessor::scheduled(pool.clone(), Arc::clone(&providers), config.scheduled_poll_interval)
            .run(shutdown.clone()),
    );
    tokio::spawn(
        SendProcessor::pending(pool.clone(), Arc::clone(&providers), config.pending_poll_interval)
            .run(shutdown.clone()),
    );
    tokio::spawn(
        TrashCleaner::new(pool.clone(), config.trash_retention_millis(), config.cleanup_interval)
            .run(shutdown.clone()),
    );
    tokio::spawn(run_periodic_sync(
        Arc::clone(&sync),
        config.sync_interval,
        shutdown.clone(),
    ));

    match idle.watch_all(&pool).await {
        Ok(count) => log::info!("idle: watching {} accounts", count),
        Err(e) => log::error!("idle: failed to load accounts: {}", e),
    }
}
