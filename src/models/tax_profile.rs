//! # Tax Profile Model
//!
//! Credential record for one fiscal provider session. The worker treats this
//! as mutable shared state: it may flip `is_authenticated` to false on an
//! auth failure, record the provider error, and fill in a generated device id
//! on successful use. The management surface owns creation and re-login.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::states::TaxProvider;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxProfile {
    pub id: i64,
    pub name: String,
    pub provider: TaxProvider,

    pub taxpayer_id: String,
    pub phone: String,

    /// Bearer token, either flat or a JSON-encoded session object; the
    /// provider client normalizes both shapes.
    pub access_token: String,
    pub refresh_token: String,
    /// Cookie session, either a raw header string or a JSON-encoded object.
    pub cookie_blob: String,
    pub device_id: String,

    pub is_authenticated: bool,
    pub last_error: String,
    pub last_auth_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaxProfile {
    pub fn new(name: impl Into<String>, provider: TaxProvider) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            provider,
            taxpayer_id: String::new(),
            phone: String::new(),
            access_token: String::new(),
            refresh_token: String::new(),
            cookie_blob: String::new(),
            device_id: String::new(),
            is_authenticated: false,
            last_error: String::new(),
            last_auth_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
