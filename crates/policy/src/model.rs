//! Declarative policy model — what the YAML source deserializes into.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use gk_domain::evaluation::Decision;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-tool rule set: a configured default decision plus optional
/// constraint fields.  Which constraints apply depends on the tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolPolicy {
    /// Decision rendered when no rule fires.
    pub decision: Decision,

    // ── Patterns (all tools) ────────────────────────────────────────
    /// Case-insensitive regexes matched against the canonicalized args.
    #[serde(default, deserialize_with = "lossy_strings")]
    pub deny_patterns: Vec<String>,

    // ── shell.exec ──────────────────────────────────────────────────
    /// First token of the command must be one of these (empty = any).
    #[serde(default, deserialize_with = "lossy_strings")]
    pub allowed_commands: Vec<String>,
    #[serde(default, deserialize_with = "lossy_strings")]
    pub allowed_cwd_prefixes: Vec<String>,
    /// Ceiling on the caller-requested timeout.
    #[serde(default)]
    pub max_timeout_ms: Option<u64>,
    /// Per-stream output buffer cap.
    #[serde(default)]
    pub max_output_bytes: Option<u64>,

    // ── files.write ─────────────────────────────────────────────────
    #[serde(default, deserialize_with = "lossy_strings")]
    pub allowed_paths: Vec<String>,
    #[serde(default, deserialize_with = "lossy_strings")]
    pub deny_extensions: Vec<String>,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,

    // ── http.request ────────────────────────────────────────────────
    #[serde(default, deserialize_with = "lossy_strings")]
    pub allowed_methods: Vec<String>,
    /// Exact hostnames or `*.suffix` / `.suffix` forms.
    #[serde(default, deserialize_with = "lossy_strings")]
    pub allowed_domains: Vec<String>,
    #[serde(default, deserialize_with = "lossy_strings")]
    pub deny_domains: Vec<String>,
    /// CIDRs that resolved addresses must not fall into.
    #[serde(default, deserialize_with = "lossy_strings")]
    pub deny_ip_ranges: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_body_bytes: Option<u64>,
    #[serde(default)]
    pub max_redirects: Option<u32>,
}

impl ToolPolicy {
    /// A policy with the given default decision and no constraints.
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            deny_patterns: Vec::new(),
            allowed_commands: Vec::new(),
            allowed_cwd_prefixes: Vec::new(),
            max_timeout_ms: None,
            max_output_bytes: None,
            allowed_paths: Vec::new(),
            deny_extensions: Vec::new(),
            max_size_bytes: None,
            allowed_methods: Vec::new(),
            allowed_domains: Vec::new(),
            deny_domains: Vec::new(),
            deny_ip_ranges: Vec::new(),
            timeout_ms: None,
            max_body_bytes: None,
            max_redirects: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Principal policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Role-scoped restrictions layered on top of the tool rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrincipalPolicy {
    /// Empty = inherit whatever the tool's own policy decides.
    #[serde(default, deserialize_with = "lossy_strings")]
    pub allowed_tools: Vec<String>,
    #[serde(default, deserialize_with = "lossy_strings")]
    pub deny_patterns: Vec<String>,
    /// Tools this role always needs a human for.
    #[serde(default, deserialize_with = "lossy_strings")]
    pub require_approval: Vec<String>,
    #[serde(default)]
    pub alert_budget: Option<AlertBudget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertBudget {
    pub max_per_hour: u32,
    pub severity_threshold: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The effective rule set.  BTreeMaps keep serialization deterministic so
/// the canonical hash is stable across loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolPolicy>,
    #[serde(default)]
    pub principals: BTreeMap<String, PrincipalPolicy>,
    #[serde(default, deserialize_with = "lossy_strings")]
    pub global_deny_patterns: Vec<String>,
}

impl Policy {
    /// `sha256:<hex>` over the canonicalized policy; doubles as the
    /// `policyVersion` echoed in every response.
    pub fn hash(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        format!("sha256:{}", gk_canonical::hash_canonical(&value))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deser helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// String arrays accept only strings; non-string elements are dropped
/// with a warning instead of failing the whole load.
fn lossy_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Value> = Vec::deserialize(deserializer)?;
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        match item {
            Value::String(s) => out.push(s),
            other => {
                tracing::warn!(dropped = %other, "dropping non-string element from policy list");
            }
        }
    }
    Ok(out)
}
