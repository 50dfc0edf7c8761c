//! # Notification Fan-out
//!
//! Independent, isolated delivery to each configured sink for one logical
//! event: relay targets mirror the raw payment payload to third parties,
//! chat channels carry operator-facing text messages. Failures here never
//! escalate into task failures; relays aggregate into a single coarse
//! status, chat deliveries are best-effort per channel.

pub mod chat;
pub mod relay;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::models::{ChatChannel, RelayTarget, StoreRecord};

/// Coarse delivery status aggregated across all relay targets of a store,
/// the worst outcome observed winning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelayStatus {
    NoTargets,
    Success,
    PartialError,
    Error,
}

impl RelayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoTargets => "no_targets",
            Self::Success => "success",
            Self::PartialError => "partial_error",
            Self::Error => "error",
        }
    }

    /// The worse of two observed outcomes.
    pub fn worse(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seam between the worker and the outbound notification transports.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Mirror an event payload to every active relay target of a store.
    async fn relay_event(
        &self,
        store: &StoreRecord,
        targets: &[RelayTarget],
        payload: &Value,
        receipt_url: &str,
    ) -> RelayStatus;

    /// Send a text message to every matching chat channel.
    async fn notify_channels(
        &self,
        channels: &[ChatChannel],
        event_name: &str,
        message: &str,
        receipt_url: &str,
    );
}

/// Production sink delivering over HTTP.
pub struct HttpNotifier {
    http: reqwest::Client,
    chat_api_base_url: String,
}

impl HttpNotifier {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.notify_timeout_secs))
            .build()
            .map_err(|e| RelayError::ConfigurationError(format!("http client: {e}")))?;
        Ok(Self {
            http,
            chat_api_base_url: config.chat_api_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for HttpNotifier {
    async fn relay_event(
        &self,
        store: &StoreRecord,
        targets: &[RelayTarget],
        payload: &Value,
        receipt_url: &str,
    ) -> RelayStatus {
        relay::deliver_relays(&self.http, store, targets, payload, receipt_url).await
    }

    async fn notify_channels(
        &self,
        channels: &[ChatChannel],
        event_name: &str,
        message: &str,
        receipt_url: &str,
    ) {
        chat::deliver_chat(
            &self.http,
            &self.chat_api_base_url,
            channels,
            event_name,
            message,
            receipt_url,
        )
        .await;
    }
}
