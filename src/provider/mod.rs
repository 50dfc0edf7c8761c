//! # Fiscal Provider Client
//!
//! Capability-polymorphic client for the external tax-reporting backend.
//! Two interchangeable variants implement the same contract, selected by the
//! credential profile's provider enum:
//!
//! - [`ConsumerApiClient`] — consumer-facing API driven by a cookie/token
//!   session with device identity and CSRF handling.
//! - [`ProxyApiClient`] — proxied official API driven by a bearer token
//!   against a configured base URL.
//!
//! Authentication failures are a distinguished condition
//! ([`ProviderError::AuthRequired`]) so the worker can suspend the task
//! instead of burning retries.

pub mod consumer;
pub mod credentials;
pub mod proxy;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::RelayConfig;
use crate::models::{TaxProfile, TaxProvider};

pub use consumer::ConsumerApiClient;
pub use proxy::ProxyApiClient;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The stored credential was rejected; the task suspends until an
    /// operator re-authenticates the profile.
    #[error("provider authentication required: {0}")]
    AuthRequired(String),

    /// Any other provider-side rejection, with diagnostics.
    #[error("provider rejected the request with status {status}: {body}")]
    Api {
        status: u16,
        body: String,
        /// Best-effort parsed response payload.
        details: Option<Value>,
    },

    /// Network or timeout failure before a response was received.
    #[error("provider transport failure: {0}")]
    Transport(String),

    /// The variant cannot be built or called with the current configuration.
    #[error("provider configuration error: {0}")]
    Configuration(String),
}

/// Arguments for issuing one receipt.
#[derive(Debug, Clone)]
pub struct ReceiptRequest {
    pub description: String,
    pub amount: f64,
    pub payment_id: String,
    /// Full raw webhook payload; variants may consult it to pick cash vs.
    /// cashless framing.
    pub event_payload: Value,
}

/// A successfully issued receipt.
#[derive(Debug, Clone)]
pub struct IssuedReceipt {
    pub receipt_id: String,
    pub receipt_url: String,
    pub raw: Value,
}

/// Uniform contract over both backend variants.
#[async_trait]
pub trait FiscalProvider: Send + Sync {
    async fn create_receipt(
        &self,
        request: &ReceiptRequest,
    ) -> Result<IssuedReceipt, ProviderError>;

    async fn cancel_receipt(&self, receipt_id: &str) -> Result<Value, ProviderError>;
}

/// Builds the provider variant selected by a credential profile.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, profile: &TaxProfile) -> Result<Box<dyn FiscalProvider>, ProviderError>;
}

/// Production factory: one shared HTTP client, variant picked per profile.
pub struct HttpProviderFactory {
    http: reqwest::Client,
    consumer_base_url: String,
    proxy_base_url: String,
}

impl HttpProviderFactory {
    pub fn new(config: &RelayConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            consumer_base_url: config.consumer_base_url.clone(),
            proxy_base_url: config.proxy_base_url.clone(),
        })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, profile: &TaxProfile) -> Result<Box<dyn FiscalProvider>, ProviderError> {
        match profile.provider {
            TaxProvider::ConsumerApi => Ok(Box::new(ConsumerApiClient::from_profile(
                self.http.clone(),
                &self.consumer_base_url,
                profile,
            ))),
            TaxProvider::ProxyApi => Ok(Box::new(ProxyApiClient::from_profile(
                self.http.clone(),
                &self.proxy_base_url,
                profile,
            ))),
        }
    }
}

/// Map a provider response to the uniform result shape.
///
/// 401/403 take the authentication path before any other status handling;
/// any other status ≥ 400 is a provider error carrying the body; an empty
/// success body is an empty object; a non-JSON success body is wrapped
/// rather than crashing the caller.
pub(crate) fn interpret_response(status: u16, body: &str) -> Result<Value, ProviderError> {
    if status == 401 || status == 403 {
        return Err(ProviderError::AuthRequired(format!(
            "credential rejected with status {status}"
        )));
    }
    if status >= 400 {
        return Err(ProviderError::Api {
            status,
            body: body.to_string(),
            details: serde_json::from_str(body).ok(),
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    Ok(serde_json::from_str(body).unwrap_or_else(|_| serde_json::json!({ "raw": body })))
}

/// Whether an auth rejection carries a challenge payload (a `requestId`
/// field), which gates the consumer variant's single fallback attempt.
pub(crate) fn is_auth_challenge(status: u16, body: &str) -> bool {
    (status == 401 || status == 403)
        && serde_json::from_str::<Value>(body)
            .map(|v| v.get("requestId").is_some())
            .unwrap_or(false)
}
