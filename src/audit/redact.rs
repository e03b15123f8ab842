use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a field as secret-bearing. Matched case-insensitively
/// against keys with `-` and `_` stripped.
const SECRET_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "authorization",
    "credential",
    "privatekey",
    "cookie",
    "session",
];

pub fn is_secret_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();
    SECRET_KEY_FRAGMENTS
        .iter()
        .any(|fragment| normalized.contains(fragment))
}

/// Replaces the value of every secret-bearing key, at any depth, with [`REDACTED`].
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| {
                    if is_secret_key(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

/// True when no secret-bearing key under `value` still holds a raw value.
pub fn is_redacted(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().all(|(key, inner)| {
            if is_secret_key(key) {
                inner.as_str() == Some(REDACTED)
            } else {
                is_redacted(inner)
            }
        }),
        Value::Array(items) => items.iter().all(is_redacted),
        _ => true,
    }
}
