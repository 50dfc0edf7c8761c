//! # Store Model
//!
//! A store is one configured webhook source: it owns the field-path mappings
//! used to pull payment data out of arbitrary gateway payloads, the
//! description template rendered onto issued receipts, and the relay/chat
//! delivery policy applied after issuance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::states::RelayMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: i64,
    pub name: String,
    pub is_active: bool,

    /// Template rendered against the event context for the receipt text.
    pub description_template: String,
    /// Dotted path to the external payment identifier in the raw payload.
    pub payment_id_path: String,
    /// Dotted path to the payment amount in the raw payload.
    pub amount_path: String,
    /// Dotted path to the customer display name in the raw payload.
    pub customer_name_path: String,

    pub relay_mode: RelayMode,
    pub relay_retry_limit: i32,
    pub include_receipt_url_in_relay: bool,

    pub tax_profile_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoreRecord {
    /// A store with the default extraction paths and delivery policy; the
    /// management surface overrides fields as operators configure them.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            is_active: true,
            description_template: "Payment for order {{payment_id}}".to_string(),
            payment_id_path: "object.id".to_string(),
            amount_path: "object.amount.value".to_string(),
            customer_name_path: "object.metadata.customer_name".to_string(),
            relay_mode: RelayMode::RetryUntil200,
            relay_retry_limit: 5,
            include_receipt_url_in_relay: false,
            tax_profile_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
