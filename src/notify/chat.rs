//! Chat delivery: one message per matching channel through the bot
//! messaging API. Channels are independent; a failed delivery is logged and
//! never blocks the others.

use serde_json::Value;
use tracing::warn;

use crate::models::ChatChannel;

pub(crate) async fn deliver_chat(
    http: &reqwest::Client,
    api_base_url: &str,
    channels: &[ChatChannel],
    event_name: &str,
    message: &str,
    receipt_url: &str,
) {
    for channel in channels {
        if !channel.accepts(event_name) {
            continue;
        }

        let mut text = message.to_string();
        if channel.include_receipt_url && !receipt_url.is_empty() {
            text.push_str(&format!("\nReceipt: {receipt_url}"));
        }

        let mut payload = serde_json::json!({
            "chat_id": channel.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(topic_id) = channel.topic_id {
            payload["message_thread_id"] = Value::from(topic_id);
        }

        let url = format!("{api_base_url}/bot{}/sendMessage", channel.bot_token);
        if let Err(error) = http.post(url).json(&payload).send().await {
            warn!(
                channel = %channel.name,
                event = event_name,
                error = %error,
                "chat delivery failed"
            );
        }
    }
}
