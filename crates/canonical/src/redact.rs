//! Secret redaction for audit summaries.
//!
//! Applied to argument values before they are written to the audit log or
//! echoed back in approval notifications.  Redaction is lossy on purpose:
//! the audit trail records *what shape* of request was made, never the
//! credential material inside it.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Keys whose values are always replaced, regardless of content.
fn secret_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)password|secret|token|api[_-]?key|auth|credential|bearer")
            .expect("static pattern compiles")
    })
}

/// String prefixes that mark a value as credential material.
const TOKEN_PREFIXES: &[&str] = &[
    "sk-", "pk-", "xoxp-", "xoxb-", "xoxo-", "xoxa-", "ghp_", "gho_", "Bearer ",
];

const REDACTED: &str = "[REDACTED]";

/// Maximum array elements kept in a redacted summary.
const MAX_ARRAY_ELEMENTS: usize = 10;

/// Produce a redacted copy of `value` suitable for logs and notifications.
///
/// - values under secret-looking keys become `[REDACTED]`
/// - strings with credential prefixes become `[REDACTED]`
/// - strings longer than `max_chars` are truncated with an elision marker
///   recording how much was removed
/// - arrays are truncated to 10 elements
/// - nested objects are redacted recursively
pub fn redact_secrets(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                if secret_key_re().is_match(key) {
                    out.insert(key.clone(), Value::String(REDACTED.into()));
                } else {
                    out.insert(key.clone(), redact_secrets(v, max_chars));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_ARRAY_ELEMENTS)
                .map(|v| redact_secrets(v, max_chars))
                .collect(),
        ),
        Value::String(s) => Value::String(redact_string(s, max_chars)),
        other => other.clone(),
    }
}

fn redact_string(s: &str, max_chars: usize) -> String {
    if TOKEN_PREFIXES.iter().any(|p| s.starts_with(p)) {
        return REDACTED.into();
    }
    let total = s.chars().count();
    if total > max_chars {
        let kept: String = s.chars().take(max_chars).collect();
        return format!("{kept}...[truncated {} chars]", total - max_chars);
    }
    s.to_string()
}
