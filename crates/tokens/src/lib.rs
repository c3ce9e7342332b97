//! Capability tokens — pre-authorized bypass of human approval.
//!
//! A token binds an exact `(tool, argsHash)` pair, optionally an actor,
//! and an expiry.  Shape: `base64url(payload_json) + "." + hex_hmac` where
//! the HMAC is computed over the encoded payload with the process secret.
//! When a token verifies and the base evaluation is APPROVE, the
//! orchestrator upgrades the decision to ALLOW.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use gk_canonical::hmac_sha256_hex;
use gk_domain::reason;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the token authorizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityPayload {
    pub tool: String,
    /// `sha256(canonicalize(args))` of the exact argument set.
    pub args_hash: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,
}

/// What the orchestrator presents for verification.
#[derive(Debug, Clone)]
pub struct VerifyRequest<'a> {
    pub token: &'a str,
    pub tool_name: &'a str,
    pub args_hash: &'a str,
    pub actor_role: Option<&'a str>,
    pub actor_name: Option<&'a str>,
}

/// Verification outcome with a specific reason code on failure.
#[derive(Debug, Clone)]
pub struct Verification {
    pub valid: bool,
    pub reason_code: &'static str,
    pub payload: Option<CapabilityPayload>,
}

impl Verification {
    fn invalid(reason_code: &'static str) -> Self {
        Self {
            valid: false,
            reason_code,
            payload: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Issue / verify
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sign a payload into a bearer token.
pub fn issue(payload: &CapabilityPayload, secret: &str) -> gk_domain::Result<String> {
    let json = serde_json::to_string(payload)?;
    let encoded = URL_SAFE_NO_PAD.encode(json.as_bytes());
    let signature = hmac_sha256_hex(&encoded, secret.as_bytes());
    Ok(format!("{encoded}.{signature}"))
}

/// Verify a presented token against the request it claims to authorize.
///
/// Checks run in a fixed order: structure and signature first, then the
/// tool, args, and actor bindings, then expiry.
pub fn verify(req: &VerifyRequest<'_>, secret: &str, now: DateTime<Utc>) -> Verification {
    let Some((encoded, presented_sig)) = req.token.split_once('.') else {
        return Verification::invalid(reason::CAPABILITY_TOKEN_INVALID);
    };

    let expected_sig = hmac_sha256_hex(encoded, secret.as_bytes());
    if expected_sig
        .as_bytes()
        .ct_eq(presented_sig.as_bytes())
        .unwrap_u8()
        != 1
    {
        return Verification::invalid(reason::CAPABILITY_TOKEN_INVALID);
    }

    let Ok(raw) = URL_SAFE_NO_PAD.decode(encoded) else {
        return Verification::invalid(reason::CAPABILITY_TOKEN_INVALID);
    };
    let Ok(payload) = serde_json::from_slice::<CapabilityPayload>(&raw) else {
        return Verification::invalid(reason::CAPABILITY_TOKEN_INVALID);
    };

    if payload.tool != req.tool_name {
        return Verification::invalid(reason::CAPABILITY_TOOL_MISMATCH);
    }
    if payload.args_hash != req.args_hash {
        return Verification::invalid(reason::CAPABILITY_ARGS_MISMATCH);
    }
    if let Some(required_role) = payload.actor_role.as_deref() {
        if req.actor_role != Some(required_role) {
            return Verification::invalid(reason::CAPABILITY_ROLE_MISMATCH);
        }
    }
    if let Some(required_name) = payload.actor_name.as_deref() {
        if req.actor_name != Some(required_name) {
            return Verification::invalid(reason::CAPABILITY_ACTOR_MISMATCH);
        }
    }
    if now > payload.expires_at {
        return Verification::invalid(reason::CAPABILITY_EXPIRED);
    }

    Verification {
        valid: true,
        reason_code: reason::CAPABILITY_TOKEN_ALLOW,
        payload: Some(payload),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
