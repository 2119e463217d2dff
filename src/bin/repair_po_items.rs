//! Materializes checklist items for purchase orders that were created without
//! them. Safe to run repeatedly.

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use procurement_portal::{
    infrastructure::{config::Config, db, state::AppState},
    services::{directory, orders::OrderService},
    telemetry,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    telemetry::init();

    let config = Arc::new(Config::from_env()?);
    let pool = db::connect(&config.database).await?;
    db::run_migrations(&pool).await?;
    let anchors = directory::resolve_anchors(&pool, &config.workflow)
        .await
        .context("failed to resolve finance and purchasing departments")?;
    let state = Arc::new(AppState::new(config, pool, anchors));

    let report = OrderService::new(state)
        .repair_all()
        .await
        .context("purchase order item repair failed")?;

    info!(
        orders_scanned = report.orders_scanned,
        orders_repaired = report.orders_repaired,
        items_inserted = report.items_inserted,
        "purchase order item repair finished"
    );
    Ok(())
}
