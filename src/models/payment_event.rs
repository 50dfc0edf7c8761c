//! # Payment Event Model
//!
//! One inbound webhook notification. The payload is immutable once created;
//! status, relay status, and the processed timestamp are written only by the
//! worker when the derived task completes or fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::states::EventStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: i64,
    pub store_id: i64,
    pub event_type: String,
    pub payment_id: String,
    pub payload: serde_json::Value,

    pub status: EventStatus,
    /// Coarse relay delivery code: `pending`, `no_targets`, `success`,
    /// `partial_error`, or `error`.
    pub relay_status: String,
    pub error_message: String,

    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Payment event for creation, produced by the ingestion surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentEvent {
    pub store_id: i64,
    pub event_type: String,
    pub payment_id: String,
    pub payload: serde_json::Value,
}
