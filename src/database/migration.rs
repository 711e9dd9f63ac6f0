//! Schema migrations applied before the API serves requests.

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Bring the database up to the latest schema.
///
/// Idempotent: migrations already recorded in `_sqlx_migrations` are skipped
/// after their checksums are verified.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}
