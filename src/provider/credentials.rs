//! # Credential Normalization
//!
//! Token and cookie values on a profile may arrive as flat strings or as
//! JSON-encoded session objects pasted from a browser export. The consumer
//! client only ever sees the flat shapes produced here: a bare bearer token
//! and a `name=value; name=value` cookie header.

use serde_json::Value;
use uuid::Uuid;

/// Cookie holding the CSRF token on the consumer API.
pub const CSRF_COOKIE: &str = "XSRF-TOKEN";

/// Flatten an access-token value to a bare bearer token.
///
/// Accepts a raw token string, a JSON string, or a JSON object carrying
/// `token` / `accessToken` (with `refreshToken` tolerated and ignored).
pub fn normalize_access_token(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(token)) => token,
        Ok(Value::Object(map)) => map
            .get("token")
            .or_else(|| map.get("accessToken"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => trimmed.to_string(),
    }
}

/// Flatten a cookie value to a `name=value; name=value` header string.
///
/// Accepts a raw header string, a JSON string, or a JSON object carrying
/// either `cookie` (flat string) or `cookies` (array of `{name, value}`
/// entries, or a name→value map).
pub fn normalize_cookie_blob(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(cookie)) => cookie,
        Ok(Value::Object(map)) => {
            if let Some(cookie) = map.get("cookie").and_then(Value::as_str) {
                return cookie.to_string();
            }
            match map.get("cookies") {
                Some(Value::Array(entries)) => entries
                    .iter()
                    .filter_map(|entry| {
                        let name = entry.get("name")?.as_str()?;
                        let value = entry.get("value")?.as_str()?;
                        Some(format!("{name}={value}"))
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
                Some(Value::Object(pairs)) => pairs
                    .iter()
                    .filter_map(|(name, value)| {
                        Some(format!("{name}={}", value.as_str()?))
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
                _ => String::new(),
            }
        }
        _ => trimmed.to_string(),
    }
}

/// Pull one cookie's value out of a flat cookie header.
pub fn extract_cookie_value(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key.trim() == name {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

/// Stable synthetic device id for profiles that never recorded one.
pub fn generate_device_id() -> String {
    Uuid::new_v4().simple().to_string()
}
