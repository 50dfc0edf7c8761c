//! # Data Model Layer
//!
//! Domain records for the receipt relay: configured stores and their
//! notification sinks, credential profiles, inbound payment events, queued
//! receipt tasks, and issued receipts. Persistence lives behind the
//! [`crate::storage::Storage`] trait; these types carry no query logic.

pub mod chat_channel;
pub mod payment_event;
pub mod receipt;
pub mod receipt_task;
pub mod relay_target;
pub mod states;
pub mod store;
pub mod tax_profile;

pub use chat_channel::ChatChannel;
pub use payment_event::{NewPaymentEvent, PaymentEvent};
pub use receipt::{NewReceipt, Receipt};
pub use receipt_task::{NewReceiptTask, ReceiptTask, DEFAULT_MAX_ATTEMPTS};
pub use relay_target::RelayTarget;
pub use states::{EventStatus, ReceiptStatus, RelayMode, TaskKind, TaskStatus, TaxProvider};
pub use store::StoreRecord;
pub use tax_profile::TaxProfile;
