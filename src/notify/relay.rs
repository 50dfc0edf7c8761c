//! Relay delivery: mirrors the event payload to each active target,
//! honoring the store's delivery mode and optional payload template.

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use super::RelayStatus;
use crate::models::{RelayMode, RelayTarget, StoreRecord};
use crate::template::render_template;

pub(crate) async fn deliver_relays(
    http: &reqwest::Client,
    store: &StoreRecord,
    targets: &[RelayTarget],
    payload: &Value,
    receipt_url: &str,
) -> RelayStatus {
    if targets.is_empty() {
        return RelayStatus::NoTargets;
    }

    let mut status = RelayStatus::Success;
    for target in targets {
        let body = build_body(store, target, payload, receipt_url);

        match store.relay_mode {
            RelayMode::FireAndForget => {
                if let Err(error) = send_once(http, target, &body).await {
                    debug!(target = %target.name, error = %error, "fire-and-forget relay failed");
                    status = status.worse(RelayStatus::PartialError);
                }
            }
            RelayMode::RetryUntil200 => {
                let limit = store.relay_retry_limit.max(1);
                let mut delivered = false;
                for _ in 0..limit {
                    match send_once(http, target, &body).await {
                        Ok(code) if code == 200 => {
                            delivered = true;
                            break;
                        }
                        Ok(_) => {}
                        Err(error) => {
                            debug!(target = %target.name, error = %error, "relay attempt failed");
                        }
                    }
                }
                if !delivered {
                    warn!(target = %target.name, "relay target never returned 200");
                    status = status.worse(RelayStatus::Error);
                }
            }
        }
    }

    status
}

/// The outbound body: raw payload, optionally tagged with the receipt URL,
/// optionally transformed through the store's payload template. A rendered
/// template that parses as JSON replaces the body; anything else is wrapped.
fn build_body(
    store: &StoreRecord,
    target: &RelayTarget,
    payload: &Value,
    receipt_url: &str,
) -> Value {
    let mut body = payload.clone();
    if store.include_receipt_url_in_relay && !receipt_url.is_empty() {
        if let Some(map) = body.as_object_mut() {
            map.insert(
                "generated_receipt_url".to_string(),
                Value::String(receipt_url.to_string()),
            );
        }
    }

    if target.payload_template.is_empty() {
        return body;
    }

    // Template context: the body under "payload" plus its top-level keys.
    let mut context = serde_json::Map::new();
    if let Some(map) = body.as_object() {
        context.extend(map.clone());
    }
    context.insert("payload".to_string(), body.clone());

    let rendered = render_template(&target.payload_template, &Value::Object(context));
    match serde_json::from_str(&rendered) {
        Ok(parsed) => parsed,
        Err(_) => serde_json::json!({ "rendered_payload": rendered, "payload": body }),
    }
}

async fn send_once(
    http: &reqwest::Client,
    target: &RelayTarget,
    body: &Value,
) -> Result<u16, reqwest::Error> {
    let method = Method::from_bytes(target.method.to_uppercase().as_bytes())
        .unwrap_or(Method::POST);
    let mut request = http.request(method, &target.url).json(body);
    if let Some(headers) = target.headers.as_object() {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                request = request.header(name.as_str(), value);
            }
        }
    }
    let response = request.send().await?;
    Ok(response.status().as_u16())
}
