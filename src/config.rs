use std::env;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

/// Runtime configuration, read once at startup. Every knob has a default so
/// a bare `cargo run` against a local mongod works.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub bind_address: String,
    pub mongodb_uri: String,
    pub database_name: String,
    /// Offset of the organization's operating timezone from UTC, in hours.
    /// Calling hours are evaluated in this one reference zone, not per
    /// recipient.
    pub civic_utc_offset_hours: i32,
    pub scheduler_poll_interval: Duration,
    pub send_concurrency: usize,
    pub send_timeout: Duration,
    pub delivery_batch_size: i64,
    pub seed_demo_data: bool,
}

impl EngineConfig {
    pub fn from_env() -> EngineConfig {
        EngineConfig {
            bind_address: var_or("BIND_ADDRESS", "127.0.0.1:8080"),
            mongodb_uri: var_or("MONGODB_URI", "mongodb://localhost:27017"),
            database_name: var_or("DATABASE_NAME", "canvass"),
            civic_utc_offset_hours: parsed_var_or("CIVIC_UTC_OFFSET_HOURS", -6),
            scheduler_poll_interval: Duration::from_secs(parsed_var_or(
                "SCHEDULER_POLL_SECS",
                30,
            )),
            send_concurrency: parsed_var_or("SEND_CONCURRENCY", 8),
            send_timeout: Duration::from_secs(parsed_var_or("SEND_TIMEOUT_SECS", 30)),
            delivery_batch_size: parsed_var_or("DELIVERY_BATCH_SIZE", 100),
            seed_demo_data: parsed_var_or("SEED_DEMO_DATA", false),
        }
    }

    pub fn civic_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.civic_utc_offset_hours.clamp(-23, 23) * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
