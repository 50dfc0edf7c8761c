//! # Durable Storage
//!
//! Persistence seam for the task queue. The worker only ever talks to the
//! [`Storage`] trait; [`PgStorage`] is the production PostgreSQL
//! implementation, [`InMemoryStorage`] backs tests and embedded runs.
//!
//! ## Transaction boundaries
//!
//! Two commits per worker pass, both atomic:
//!
//! 1. [`Storage::claim_next_task`] — selection and the `processing` mark
//!    (with the attempts increment) are one atomic operation, committed
//!    before any external I/O. Concurrent workers can never claim the same
//!    task.
//! 2. [`Storage::apply_outcome`] — the task transition, event update,
//!    receipt write, and credential-profile mutation for the pass commit
//!    together or not at all.
//!
//! Outbound network calls happen between the two and are deliberately not
//! transactional; their results feed into the [`TaskOutcome`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::error::Result;
use crate::models::{
    ChatChannel, EventStatus, NewPaymentEvent, NewReceipt, NewReceiptTask, PaymentEvent, Receipt,
    ReceiptTask, RelayTarget, StoreRecord, TaskStatus, TaxProfile,
};

pub use memory::InMemoryStorage;
pub use postgres::PgStorage;

/// Terminal or retry decision for the claimed task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskDisposition {
    Success,
    Retry { next_retry_at: DateTime<Utc> },
    WaitingAuth { next_retry_at: DateTime<Utc> },
    Failed,
}

impl TaskDisposition {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Success => TaskStatus::Success,
            Self::Retry { .. } => TaskStatus::Pending,
            Self::WaitingAuth { .. } => TaskStatus::WaitingAuth,
            Self::Failed => TaskStatus::Failed,
        }
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Retry { next_retry_at } | Self::WaitingAuth { next_retry_at } => {
                Some(*next_retry_at)
            }
            _ => None,
        }
    }
}

/// Event mutation applied with the pass.
#[derive(Debug, Clone)]
pub struct EventUpdate {
    pub event_id: i64,
    pub status: EventStatus,
    pub error_message: String,
    pub processed_at: Option<DateTime<Utc>>,
    /// `None` leaves the stored relay status untouched.
    pub relay_status: Option<String>,
}

/// Receipt mutation applied with the pass.
#[derive(Debug, Clone)]
pub enum ReceiptWrite {
    Create(NewReceipt),
    /// Mark the most recent non-canceled receipt for `(store, payment_id)`
    /// canceled; a missing receipt is a no-op.
    Cancel {
        store_id: i64,
        payment_id: String,
        canceled_at: DateTime<Utc>,
    },
}

/// Credential-profile mutation applied with the pass. `None` fields are left
/// untouched.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub profile_id: i64,
    pub is_authenticated: Option<bool>,
    pub last_error: Option<String>,
    pub device_id: Option<String>,
}

/// Everything one worker pass writes after dispatch, committed atomically.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: i64,
    pub disposition: TaskDisposition,
    pub error_message: String,
    pub event: Option<EventUpdate>,
    pub receipt: Option<ReceiptWrite>,
    pub profile: Option<ProfileUpdate>,
}

/// Per-status queue counts for dashboarding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub success: i64,
    pub failed: i64,
    pub waiting_auth: i64,
}

impl QueueCounts {
    /// Tasks still owed work: everything non-terminal.
    pub fn depth(&self) -> i64 {
        self.pending + self.processing + self.waiting_auth
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Atomically claim the oldest eligible task: status `pending` or
    /// `waiting_auth`, `next_retry_at <= now`, creation order, exactly one.
    /// The claimed task comes back already marked `processing` with
    /// `attempts` incremented.
    async fn claim_next_task(&self, now: DateTime<Utc>) -> Result<Option<ReceiptTask>>;

    /// Commit every write of one pass atomically.
    async fn apply_outcome(&self, now: DateTime<Utc>, outcome: &TaskOutcome) -> Result<()>;

    async fn task_by_id(&self, task_id: i64) -> Result<Option<ReceiptTask>>;
    async fn store_by_id(&self, store_id: i64) -> Result<Option<StoreRecord>>;
    async fn profile_by_id(&self, profile_id: i64) -> Result<Option<TaxProfile>>;
    async fn event_by_id(&self, event_id: i64) -> Result<Option<PaymentEvent>>;

    /// Active relay targets of a store.
    async fn relay_targets(&self, store_id: i64) -> Result<Vec<RelayTarget>>;
    /// Active chat channels of a store.
    async fn chat_channels(&self, store_id: i64) -> Result<Vec<ChatChannel>>;

    /// The most recent receipt for `(store, payment_id)`, canceled or not.
    async fn latest_receipt(&self, store_id: i64, payment_id: &str) -> Result<Option<Receipt>>;

    /// Ingestion interface: persist an inbound payment event.
    async fn insert_event(&self, event: NewPaymentEvent) -> Result<PaymentEvent>;
    /// Ingestion interface: enqueue a receipt task.
    async fn enqueue_task(&self, task: NewReceiptTask) -> Result<ReceiptTask>;

    /// Manual requeue: back to `pending`, error cleared, due immediately,
    /// regardless of prior state. Returns the refreshed task, or `None` for
    /// an unknown id.
    async fn requeue_task(&self, task_id: i64, now: DateTime<Utc>) -> Result<Option<ReceiptTask>>;

    /// Startup reconciliation: any task stuck in `processing` past the grace
    /// period returns to `pending` with `attempts` unchanged. Returns the
    /// affected task ids.
    async fn recover_stale_processing(
        &self,
        now: DateTime<Utc>,
        grace: std::time::Duration,
    ) -> Result<Vec<i64>>;

    async fn queue_counts(&self) -> Result<QueueCounts>;

    /// Best-effort audit append; callers swallow errors.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
}
