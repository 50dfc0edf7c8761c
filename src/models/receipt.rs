//! # Receipt Model
//!
//! The fiscal document resulting from a successful `create_receipt` task.
//! At most one non-canceled receipt is "current" per `(store, payment_id)`;
//! cancellation marks the most recent one by creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::states::ReceiptStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: i64,
    pub store_id: i64,
    pub task_id: i64,
    pub payment_id: String,

    pub provider_receipt_id: String,
    pub receipt_url: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,

    pub status: ReceiptStatus,
    pub raw_response: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

/// Receipt for creation (without generated fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReceipt {
    pub store_id: i64,
    pub task_id: i64,
    pub payment_id: String,
    pub provider_receipt_id: String,
    pub receipt_url: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub raw_response: serde_json::Value,
}
