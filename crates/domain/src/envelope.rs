//! Request envelope — the normalized request object that clients post.
//!
//! `POST /tool/:tool_name` accepts one envelope per tool invocation.  The
//! envelope carries the caller's identity, the tool arguments, taint labels
//! describing where the content came from, and the retry/bypass machinery
//! (idempotency key, capability token, dry-run flag).
//!
//! Unknown top-level fields are rejected so that a misspelled security
//! field (e.g. `capabiltyToken`) cannot silently pass through.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who is making the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub name: String,
    /// Principal-policy lookup key.  Falls back to `name` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Correlates all requests issued by one agent run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Agent,
    User,
}

impl Actor {
    /// The role used for principal lookup: `role` if set, else `name`.
    pub fn effective_role(&self) -> &str {
        self.role.as_deref().unwrap_or(&self.name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Origin / taint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the request content originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    UserDirect,
    ModelInferred,
    ExternalContent,
    BackgroundJob,
}

/// Reference to a context object that influenced the request, with its own
/// taint labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taint: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool request.  Lives only for the duration of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Envelope {
    /// Unique per retry-group boundary; doubles as the idempotency key
    /// when `idempotency_key` is absent.
    pub request_id: Uuid,
    pub actor: Actor,
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    /// Taint labels on the content that produced this request
    /// (e.g. `external`, `untrusted`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_refs: Option<Vec<ContextRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Evaluate only; never execute.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl Envelope {
    /// True when the envelope carries a taint label that crosses the
    /// operator's trust boundary.
    pub fn is_tainted(&self) -> bool {
        self.taint
            .as_deref()
            .map(|labels| {
                labels
                    .iter()
                    .any(|l| l == "external" || l == "untrusted")
            })
            .unwrap_or(false)
    }

    /// The effective idempotency key: explicit key, else the request ID.
    pub fn effective_idempotency_key(&self) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| self.request_id.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_envelope_json() -> serde_json::Value {
        serde_json::json!({
            "requestId": "550e8400-e29b-41d4-a716-446655440000",
            "actor": { "type": "agent", "name": "pilot" },
            "args": { "command": "ls" }
        })
    }

    #[test]
    fn deserializes_minimal_envelope() {
        let env: Envelope = serde_json::from_value(minimal_envelope_json()).unwrap();
        assert_eq!(env.actor.name, "pilot");
        assert!(!env.dry_run);
        assert!(env.taint.is_none());
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let mut v = minimal_envelope_json();
        v["capabiltyToken"] = serde_json::json!("typo");
        assert!(serde_json::from_value::<Envelope>(v).is_err());
    }

    #[test]
    fn rejects_non_uuid_request_id() {
        let mut v = minimal_envelope_json();
        v["requestId"] = serde_json::json!("not-a-uuid");
        assert!(serde_json::from_value::<Envelope>(v).is_err());
    }

    #[test]
    fn effective_role_falls_back_to_name() {
        let env: Envelope = serde_json::from_value(minimal_envelope_json()).unwrap();
        assert_eq!(env.actor.effective_role(), "pilot");
    }

    #[test]
    fn taint_detection() {
        let mut v = minimal_envelope_json();
        v["taint"] = serde_json::json!(["external"]);
        let env: Envelope = serde_json::from_value(v).unwrap();
        assert!(env.is_tainted());

        let mut v = minimal_envelope_json();
        v["taint"] = serde_json::json!(["reviewed"]);
        let env: Envelope = serde_json::from_value(v).unwrap();
        assert!(!env.is_tainted());
    }

    #[test]
    fn effective_idempotency_key_defaults_to_request_id() {
        let env: Envelope = serde_json::from_value(minimal_envelope_json()).unwrap();
        assert_eq!(
            env.effective_idempotency_key(),
            "550e8400-e29b-41d4-a716-446655440000"
        );

        let mut v = minimal_envelope_json();
        v["idempotencyKey"] = serde_json::json!("k1");
        let env: Envelope = serde_json::from_value(v).unwrap();
        assert_eq!(env.effective_idempotency_key(), "k1");
    }
}
