//! Service configuration.

use anyhow::{Context, Result};
use rand::Rng;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to.
    pub listen_addr: String,
    pub stream: StreamConfig,
    pub gateway: GatewayConfig,
}

/// Event stream connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL of the event service.
    pub url: String,
    /// Topic to listen on and acknowledge against.
    pub topic: String,
    /// Bound on batches buffered between the receive loop and reconciliation.
    pub channel_capacity: usize,
    pub reconnection: ReconnectionConfig,
}

/// Ledger REST gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

/// Reconnection backoff.
#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            topic: topic.into(),
            channel_capacity: 16,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let reconnection = ReconnectionConfig {
            initial_backoff_secs: parse_or("RECONNECT_INITIAL_BACKOFF_SECS", 1)?,
            max_backoff_secs: parse_or("RECONNECT_MAX_BACKOFF_SECS", 60)?,
        };
        Ok(Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            stream: StreamConfig {
                url: env::var("EVENT_STREAM_URL").context("EVENT_STREAM_URL must be set")?,
                topic: env::var("EVENT_STREAM_TOPIC").unwrap_or_else(|_| "dev".to_string()),
                channel_capacity: parse_or("BATCH_CHANNEL_CAPACITY", 16)?,
                reconnection,
            },
            gateway: GatewayConfig {
                url: env::var("GATEWAY_URL").context("GATEWAY_URL must be set")?,
                username: env::var("GATEWAY_USERNAME").ok(),
                password: env::var("GATEWAY_PASSWORD").ok(),
                timeout_secs: parse_or("GATEWAY_TIMEOUT_SECS", 30)?,
            },
        })
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}

/// Bounded exponential backoff with jitter: doubles per consecutive failure up to the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectionConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, without jitter.
    pub fn base_delay(&self) -> Duration {
        let initial = self.config.initial_backoff_secs.max(1);
        let factor = 1u64.checked_shl(self.attempt.min(32)).unwrap_or(u64::MAX);
        let secs = initial
            .saturating_mul(factor)
            .min(self.config.max_backoff_secs.max(initial));
        Duration::from_secs(secs)
    }

    /// Delay before the next attempt; advances the backoff.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
        base + jitter
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
