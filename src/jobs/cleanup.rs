use crate::database::emails;
use crate::models::now_millis;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Permanently deletes emails that have sat in the trash past the retention period.
pub struct TrashCleaner {
    pool: SqlitePool,
    retention_millis: i64,
    interval: Duration,
}

impl TrashCleaner {
    pub fn new(pool: SqlitePool, retention_millis: i64, interval: Duration) -> Self {
        Self {
            pool,
            retention_millis,
            interval,
        }
    }

    pub async fn purge(&self, now: i64) -> Result<u64, sqlx::Error> {
        emails::purge_trash_before(&self.pool, now - self.retention_millis).await
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.purge(now_millis()).await {
                    Ok(0) => {}
                    Ok(removed) => log::info!("trash cleanup: removed {} expired emails", removed),
                    Err(e) => log::error!("trash cleanup failed: {}", e),
                },
            }
        }
    }
}
