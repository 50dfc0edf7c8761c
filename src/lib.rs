//! # Receipt Relay
//!
//! Durable task queue that relays payment-gateway webhook events into
//! fiscal-receipt issuance with a third-party tax authority API, then fans
//! the result out to downstream notification channels.
//!
//! ## Overview
//!
//! Ingestion (external) persists payment events and enqueues receipt tasks;
//! the [`worker::ReceiptWorker`] polling loop claims at most one eligible
//! task per tick, drives it through a pluggable [`provider::FiscalProvider`]
//! variant, records the resulting [`models::Receipt`], and delivers
//! notifications through [`notify`] sinks. Transient failures retry with
//! bounded linear backoff; authentication failures suspend the task in
//! `waiting_auth` until the credential profile is renewed out-of-band.
//!
//! ## Module Organization
//!
//! - [`models`] - Domain records and state enums
//! - [`storage`] - Durable queue operations behind a trait seam
//! - [`worker`] - The polling state machine
//! - [`provider`] - Fiscal provider variants (consumer and proxy APIs)
//! - [`notify`] - Relay and chat fan-out
//! - [`template`] - `{{dotted.path}}` rendering and payload extraction
//! - [`audit`] - Best-effort durable audit trail
//! - [`config`] - Process configuration
//! - [`error`] - Crate-level error type

pub mod audit;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod notify;
pub mod provider;
pub mod storage;
pub mod template;
pub mod worker;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use models::{
    ChatChannel, EventStatus, NewPaymentEvent, NewReceipt, NewReceiptTask, PaymentEvent, Receipt,
    ReceiptStatus, ReceiptTask, RelayMode, RelayTarget, StoreRecord, TaskKind, TaskStatus,
    TaxProfile, TaxProvider,
};
pub use notify::{HttpNotifier, NotificationSink, RelayStatus};
pub use provider::{
    FiscalProvider, HttpProviderFactory, IssuedReceipt, ProviderError, ProviderFactory,
    ReceiptRequest,
};
pub use storage::{InMemoryStorage, PgStorage, QueueCounts, Storage, TaskOutcome};
pub use worker::{ReceiptWorker, WorkerConfig};
