use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bot messaging sink for operator-facing notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChannel {
    pub id: i64,
    pub store_id: i64,
    pub name: String,
    pub bot_token: String,
    pub chat_id: String,
    /// Optional forum thread/topic id appended to the message payload.
    pub topic_id: Option<i64>,
    /// Event-name filter; an empty list receives every event.
    pub events: Vec<String>,
    pub include_receipt_url: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatChannel {
    pub fn new(
        store_id: i64,
        name: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            store_id,
            name: name.into(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            topic_id: None,
            events: Vec::new(),
            include_receipt_url: true,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Whether this channel accepts the given event name.
    pub fn accepts(&self, event_name: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event_name)
    }
}
