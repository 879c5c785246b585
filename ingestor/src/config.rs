use crate::rules::{DEFAULT_STAGE2_THRESHOLD, DEFAULT_WARN_THRESHOLD};
use crate::validate::ThresholdDefaults;
use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_addr: String,
    pub channel_capacity: usize,
    pub thresholds: ThresholdDefaults,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://event-log.db".to_string()),
            http_addr: env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            channel_capacity: env_or("CHANNEL_CAPACITY", 1024),
            thresholds: ThresholdDefaults {
                warn_threshold: env_or("WARN_THRESHOLD_C", DEFAULT_WARN_THRESHOLD),
                stage2_threshold: env_or("STAGE2_THRESHOLD_C", DEFAULT_STAGE2_THRESHOLD),
            },
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring {}={:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
