//! # Audit Trail
//!
//! Durable, best-effort record of every queue transition. The audit log is a
//! side channel, not part of the state machine's correctness: a failed
//! append is logged and dropped, never propagated into a transition.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit event to append: tag, severity, free text, structured context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub store_id: Option<i64>,
    pub level: AuditLevel,
    pub event: String,
    pub message: String,
    pub context: Value,
}

impl AuditEntry {
    pub fn new(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            store_id: None,
            level: AuditLevel::Info,
            event: event.into(),
            message: message.into(),
            context: serde_json::json!({}),
        }
    }

    pub fn with_store(mut self, store_id: i64) -> Self {
        self.store_id = Some(store_id);
        self
    }

    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// A persisted audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub store_id: Option<i64>,
    pub level: String,
    pub event: String,
    pub message: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

/// Mirrors every entry to tracing and appends it durably; append failures
/// are swallowed after a warning.
pub struct AuditLogger {
    storage: Arc<dyn Storage>,
}

impl AuditLogger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn record(&self, entry: AuditEntry) {
        match entry.level {
            AuditLevel::Info => tracing::info!(
                event = %entry.event,
                store_id = entry.store_id,
                context = %entry.context,
                "{}",
                entry.message
            ),
            AuditLevel::Warn => tracing::warn!(
                event = %entry.event,
                store_id = entry.store_id,
                context = %entry.context,
                "{}",
                entry.message
            ),
            AuditLevel::Error => tracing::error!(
                event = %entry.event,
                store_id = entry.store_id,
                context = %entry.context,
                "{}",
                entry.message
            ),
        }

        if let Err(error) = self.storage.append_audit(&entry).await {
            warn!(event = %entry.event, error = %error, "audit append failed");
        }
    }
}
