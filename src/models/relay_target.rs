use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configured outbound webhook endpoint that mirrors payment events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayTarget {
    pub id: i64,
    pub store_id: i64,
    pub name: String,
    pub url: String,
    pub method: String,
    /// Static headers sent with every delivery, stored as a JSON object of
    /// string values.
    pub headers: serde_json::Value,
    /// Optional template applied to the outbound body; empty means the raw
    /// payload is sent as-is.
    pub payload_template: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl RelayTarget {
    pub fn new(store_id: i64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: 0,
            store_id,
            name: name.into(),
            url: url.into(),
            method: "POST".to_string(),
            headers: serde_json::json!({}),
            payload_template: String::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
