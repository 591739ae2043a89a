use chrono::Duration;
use coachline_booking::{EngineSettings, FeeProration};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub business_rules: BusinessRules,
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub booking_hold_seconds: u64,
    pub commission_rate_bps: u32,
    /// Used for stored policies that do not say how to split their fee
    #[serde(default)]
    pub default_fee_proration: FeeProration,
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch: usize,
}

fn default_sweep_batch() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    256
}

impl BusinessRules {
    pub fn engine_settings(&self, worker: &WorkerConfig) -> EngineSettings {
        EngineSettings {
            booking_hold: Duration::seconds(i64::try_from(self.booking_hold_seconds).unwrap_or(i64::MAX / 1000)),
            commission_rate_bps: self.commission_rate_bps,
            sweep_batch: self.sweep_batch,
            event_buffer: worker.event_buffer,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. COACHLINE_DATABASE__URL
            .add_source(config::Environment::with_prefix("COACHLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_deserialize_with_defaults() {
        let source = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [database]
                url = "postgres://localhost/coachline"

                [business_rules]
                booking_hold_seconds = 900
                commission_rate_bps = 1200

                [worker]
                sweep_interval_seconds = 30
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = source.try_deserialize().unwrap();

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.business_rules.default_fee_proration, FeeProration::PerPassenger);

        let settings = config.business_rules.engine_settings(&config.worker);
        assert_eq!(settings.booking_hold, Duration::minutes(15));
        assert_eq!(settings.commission_rate_bps, 1200);
        assert_eq!(settings.event_buffer, 256);
    }
}
