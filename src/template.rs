//! # Template Renderer
//!
//! Pure `{{dotted.path}}` substitution over a JSON context, shared by the
//! receipt description and relay payload templates. Unresolved paths render
//! as the empty string; objects and arrays render as compact JSON text.
//!
//! The same dotted-path lookup extracts payment id, amount, and customer
//! name from arbitrary webhook payloads, tolerating missing intermediate
//! keys by returning a caller-supplied default.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::models::StoreRecord;

static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid token pattern"));

/// Walk `root` along a dotted path, returning `None` when any intermediate
/// key is missing or not an object.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Dotted-path lookup with a caller-supplied default for missing paths.
pub fn lookup_or(root: &Value, path: &str, default: Value) -> Value {
    lookup_path(root, path).cloned().unwrap_or(default)
}

/// Substitute every `{{path}}` token in `source` against `context`.
pub fn render_template(source: &str, context: &Value) -> String {
    VARIABLE_PATTERN
        .replace_all(source, |caps: &regex::Captures<'_>| {
            match lookup_path(context, &caps[1]) {
                Some(value) => value_text(value),
                None => String::new(),
            }
        })
        .into_owned()
}

/// Build the rendering context for a payment event: the extracted fields
/// under stable names, the raw event name, and the full payload.
pub fn build_event_context(payload: &Value, store: &StoreRecord) -> Value {
    serde_json::json!({
        "payment_id": lookup_or(payload, &store.payment_id_path, Value::String(String::new())),
        "amount": lookup_or(payload, &store.amount_path, Value::from(0)),
        "customer_name": lookup_or(payload, &store.customer_name_path, Value::String(String::new())),
        "event": payload.get("event").cloned().unwrap_or(Value::String(String::new())),
        "payload": payload,
    })
}

/// Coerce an extracted amount value to a number; missing or unparseable
/// amounts are treated as zero.
pub fn coerce_amount(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
        other => other.to_string(),
    }
}
