//! # Proxy API Variant
//!
//! Drives the official fiscal API through a configured proxy with a plain
//! bearer token and a simplified JSON body. No device identity or cookie
//! handling.

use serde_json::Value;

use super::credentials::normalize_access_token;
use super::{interpret_response, FiscalProvider, IssuedReceipt, ProviderError, ReceiptRequest};
use crate::models::TaxProfile;

pub struct ProxyApiClient {
    http: reqwest::Client,
    base_url: String,
    authenticated: bool,
    bearer: String,
}

impl ProxyApiClient {
    pub fn from_profile(http: reqwest::Client, base_url: &str, profile: &TaxProfile) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            authenticated: profile.is_authenticated,
            bearer: normalize_access_token(&profile.access_token),
        }
    }

    fn ensure_ready(&self) -> Result<(), ProviderError> {
        if !self.authenticated {
            return Err(ProviderError::AuthRequired(
                "profile is not authenticated".to_string(),
            ));
        }
        if self.bearer.is_empty() {
            return Err(ProviderError::AuthRequired(
                "no access token for the proxy API".to_string(),
            ));
        }
        if self.base_url.is_empty() {
            return Err(ProviderError::Configuration(
                "proxy base URL is not configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.bearer))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        interpret_response(status, &text)
    }
}

#[async_trait::async_trait]
impl FiscalProvider for ProxyApiClient {
    async fn create_receipt(
        &self,
        request: &ReceiptRequest,
    ) -> Result<IssuedReceipt, ProviderError> {
        self.ensure_ready()?;
        let body = serde_json::json!({
            "description": request.description,
            "amount": request.amount,
            "payment_id": request.payment_id,
        });
        let raw = self.post("/receipts", &body).await?;

        let receipt_id = raw
            .get("receipt_id")
            .and_then(Value::as_str)
            .unwrap_or(&request.payment_id)
            .to_string();
        let receipt_url = raw
            .get("receipt_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(IssuedReceipt { receipt_id, receipt_url, raw })
    }

    async fn cancel_receipt(&self, receipt_id: &str) -> Result<Value, ProviderError> {
        self.ensure_ready()?;
        let body = serde_json::json!({ "receipt_id": receipt_id });
        self.post("/receipts/cancel", &body).await
    }
}
