//! Connection pool and embedded migrations for the PostgreSQL store.

pub mod models;

use std::time::Duration;

use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::info;

use crate::error::{LedgerError, Result};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn new_pool(database_url: &str, max_size: u32, connect_timeout: Duration) -> Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .connection_timeout(connect_timeout)
        .build(manager)
        .map_err(|e| LedgerError::Storage(format!("DB connection failed: {}", e)))
}

/// Apply pending migrations and return the versions that were applied.
pub fn apply_database_migrations(conn: &mut PgConnection) -> Result<Vec<String>> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| LedgerError::Storage(format!("Applying database migrations failed: {}", e)))?;
    let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>();
    if names.is_empty() {
        info!("Database schema is up to date; no migrations were applied");
    } else {
        info!("Applied {} database migration(s): {}", names.len(), names.join(", "));
    }
    Ok(names)
}
