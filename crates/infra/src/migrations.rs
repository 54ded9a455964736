//! Embedded schema migrations.
//!
//! Files under `migrations/` are applied in version order, each in its own
//! transaction; applied versions are tracked by sqlx in `_sqlx_migrations`.

use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::instrument;

use crate::store::StoreError;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[instrument(skip(pool), err)]
pub async fn run(pool: &PgPool) -> Result<(), StoreError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;

    let latest = MIGRATOR.iter().map(|m| m.version).max().unwrap_or_default();
    tracing::info!(latest, "schema up to date");
    Ok(())
}
