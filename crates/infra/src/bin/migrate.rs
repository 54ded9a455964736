//! Apply pending schema migrations to `DATABASE_URL`.

use anyhow::Context;

use depot_infra::config::DepotConfig;
use depot_infra::migrations;
use depot_infra::store::PostgresUnitStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    depot_observability::init();

    let config = DepotConfig::from_env().context("invalid configuration")?;
    let store = PostgresUnitStore::connect(&config)
        .await
        .context("failed to connect to postgres")?;
    migrations::run(store.pool())
        .await
        .context("failed to apply migrations")?;

    tracing::info!("migrations complete");
    Ok(())
}
