use serde::{Deserialize, Serialize};
use std::fmt;

/// Receipt task state definitions.
///
/// `Processing` is a transient marker held for the duration of one worker
/// pass; crash recovery returns stale `Processing` tasks to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue for its next attempt
    Pending,
    /// Claimed by the worker for the current pass
    Processing,
    /// Terminal: the fiscal operation completed
    Success,
    /// Terminal: attempts exhausted or a non-retryable failure
    Failed,
    /// Suspended until the credential profile is re-authenticated
    WaitingAuth,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Check if this state belongs to the eligible pool (may be claimed once
    /// `next_retry_at` passes)
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Pending | Self::WaitingAuth)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::WaitingAuth => write!(f, "waiting_auth"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "waiting_auth" => Ok(Self::WaitingAuth),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Kind of fiscal operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CreateReceipt,
    CancelReceipt,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateReceipt => write!(f, "create_receipt"),
            Self::CancelReceipt => write!(f, "cancel_receipt"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_receipt" => Ok(Self::CreateReceipt),
            "cancel_receipt" => Ok(Self::CancelReceipt),
            _ => Err(format!("Invalid task kind: {s}")),
        }
    }
}

/// Payment event processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Received,
    Processed,
    Failed,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Processed => write!(f, "processed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid event status: {s}")),
        }
    }
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::Received
    }
}

/// Fiscal receipt document state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Created,
    Canceled,
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid receipt status: {s}")),
        }
    }
}

/// Backend variant selector for a credential profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxProvider {
    /// Consumer-facing API: cookie/token session with device identity
    ConsumerApi,
    /// Proxied official API: bearer token against a configured base URL
    ProxyApi,
}

impl fmt::Display for TaxProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConsumerApi => write!(f, "consumer_api"),
            Self::ProxyApi => write!(f, "proxy_api"),
        }
    }
}

impl std::str::FromStr for TaxProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consumer_api" => Ok(Self::ConsumerApi),
            "proxy_api" => Ok(Self::ProxyApi),
            _ => Err(format!("Invalid tax provider: {s}")),
        }
    }
}

/// Per-store delivery mode for relay targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// One attempt per target, outcome ignored
    FireAndForget,
    /// Repeat until HTTP 200, bounded by the store's retry limit
    RetryUntil200,
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FireAndForget => write!(f, "fire_and_forget"),
            Self::RetryUntil200 => write!(f, "retry_until_200"),
        }
    }
}

impl std::str::FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fire_and_forget" => Ok(Self::FireAndForget),
            "retry_until_200" => Ok(Self::RetryUntil200),
            _ => Err(format!("Invalid relay mode: {s}")),
        }
    }
}
