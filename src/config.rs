use crate::error::{RelayError, Result};

/// Process-wide configuration for the relay worker and its HTTP clients.
///
/// Every component receives this (or a slice of it) through its constructor;
/// nothing reads environment variables after startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub database_url: String,
    /// Worker polling cadence, seconds between ticks.
    pub poll_interval_secs: u64,
    /// How long a task may sit in `processing` before startup reconciliation
    /// returns it to the eligible pool.
    pub processing_grace_secs: u64,
    /// Request timeout for fiscal provider calls.
    pub provider_timeout_secs: u64,
    /// Request timeout for relay and chat deliveries.
    pub notify_timeout_secs: u64,
    /// Base URL of the proxied official API; empty when unconfigured.
    pub proxy_base_url: String,
    /// Base URL of the consumer-facing fiscal API.
    pub consumer_base_url: String,
    /// Base URL of the bot messaging API used for chat notifications.
    pub chat_api_base_url: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/receipt_relay_development".to_string(),
            poll_interval_secs: 5,
            processing_grace_secs: 300,
            provider_timeout_secs: 20,
            notify_timeout_secs: 15,
            proxy_base_url: String::new(),
            consumer_base_url: "https://lknpd.nalog.ru".to_string(),
            chat_api_base_url: "https://api.telegram.org".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(interval) = std::env::var("RELAY_POLL_INTERVAL_SECS") {
            config.poll_interval_secs = interval.parse().map_err(|e| {
                RelayError::ConfigurationError(format!("Invalid poll_interval_secs: {e}"))
            })?;
        }

        if let Ok(grace) = std::env::var("RELAY_PROCESSING_GRACE_SECS") {
            config.processing_grace_secs = grace.parse().map_err(|e| {
                RelayError::ConfigurationError(format!("Invalid processing_grace_secs: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("RELAY_PROVIDER_TIMEOUT_SECS") {
            config.provider_timeout_secs = timeout.parse().map_err(|e| {
                RelayError::ConfigurationError(format!("Invalid provider_timeout_secs: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("RELAY_NOTIFY_TIMEOUT_SECS") {
            config.notify_timeout_secs = timeout.parse().map_err(|e| {
                RelayError::ConfigurationError(format!("Invalid notify_timeout_secs: {e}"))
            })?;
        }

        if let Ok(url) = std::env::var("RELAY_PROXY_BASE_URL") {
            config.proxy_base_url = url;
        }

        if let Ok(url) = std::env::var("RELAY_CONSUMER_BASE_URL") {
            config.consumer_base_url = url;
        }

        if let Ok(url) = std::env::var("RELAY_CHAT_API_BASE_URL") {
            config.chat_api_base_url = url;
        }

        Ok(config)
    }
}
