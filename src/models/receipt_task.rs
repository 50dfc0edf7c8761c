//! # Receipt Task Model
//!
//! One unit of queued work against the fiscal provider, derived from a
//! payment event by the ingestion surface and advanced exclusively by the
//! worker. Tasks are never deleted; `success` and `failed` are terminal.
//!
//! ## Eligibility
//!
//! A task may be claimed when its status is `pending` or `waiting_auth` and
//! `next_retry_at` has passed. Claiming marks it `processing` and increments
//! `attempts` in the same atomic operation, before any external I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::states::{TaskKind, TaskStatus};

/// Default ceiling on delivery attempts before a task goes terminal.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptTask {
    pub id: i64,
    pub store_id: i64,
    pub event_id: i64,
    pub payment_id: String,
    pub kind: TaskKind,
    /// Kind-specific payload; `cancel_receipt` tasks carry `receipt_uuid`.
    pub payload: serde_json::Value,

    pub status: TaskStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub error_message: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReceiptTask {
    /// Whether the task belongs to the eligible pool at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_eligible() && self.next_retry_at <= now
    }

    /// Whether the attempt ceiling has been reached.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Receipt task for creation (without generated fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReceiptTask {
    pub store_id: i64,
    pub event_id: i64,
    pub payment_id: String,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    /// Defaults to [`DEFAULT_MAX_ATTEMPTS`] if not provided.
    pub max_attempts: Option<i32>,
}
