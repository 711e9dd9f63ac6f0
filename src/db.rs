use rocket_db_pools::{sqlx, Database};

#[derive(Database)]
#[database("hamba_db")]
pub struct HambaDb(sqlx::SqlitePool);
