use coachline_booking::FeeProration;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::BusinessRules;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    rule_key: String,
    rule_value: Value,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay operator-edited rules from the `business_rules` table onto the
    /// file/env configuration.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows = sqlx::query_as::<_, RuleRow>("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for row in rows {
            apply_rule(&mut rules, &row.rule_key, &row.rule_value);
        }
        Ok(rules)
    }
}

/// Values are stored as `{"value": <number|string>}`
fn apply_rule(rules: &mut BusinessRules, key: &str, raw: &Value) {
    let Some(v) = raw.get("value") else {
        warn!("Business rule {} has no value field, ignoring", key);
        return;
    };

    match key {
        "booking_hold_seconds" => {
            if let Some(u) = v.as_u64() {
                rules.booking_hold_seconds = u;
            }
        }
        "commission_rate_bps" => {
            if let Some(u) = v.as_u64().and_then(|u| u32::try_from(u).ok()) {
                rules.commission_rate_bps = u;
            }
        }
        "sweep_batch" => {
            if let Some(u) = v.as_u64().and_then(|u| usize::try_from(u).ok()) {
                rules.sweep_batch = u;
            }
        }
        "default_fee_proration" => match v.as_str().map(str::parse::<FeeProration>) {
            Some(Ok(proration)) => rules.default_fee_proration = proration,
            _ => warn!("Business rule default_fee_proration has an unusable value {}", v),
        },
        _ => {}
    }
}
