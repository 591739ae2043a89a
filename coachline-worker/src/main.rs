use anyhow::Context;
use coachline_booking::BookingService;
use coachline_core::ScopedAuthorizer;
use coachline_store::{Config, DbClient, PgBookingStore, PgTripDirectory};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod events;
mod sweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coachline_worker=debug,coachline_booking=info,coachline_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Coachline worker");

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .context("Failed to load business rules")?;
    tracing::info!(
        "Business rules: hold {}s, commission {} bps, fee proration {}",
        rules.booking_hold_seconds,
        rules.commission_rate_bps,
        rules.default_fee_proration.as_str()
    );

    let service = Arc::new(BookingService::new(
        Arc::new(PgBookingStore::new(db.pool.clone(), rules.default_fee_proration)),
        Arc::new(PgTripDirectory::new(db.pool.clone())),
        Arc::new(ScopedAuthorizer),
        rules.engine_settings(&config.worker),
    ));

    tokio::spawn(events::log_events(service.subscribe()));

    let every = Duration::from_secs(config.worker.sweep_interval_seconds.max(1));
    tokio::select! {
        _ = sweeper::run_sweeper(service.clone(), every) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
    }

    Ok(())
}
