//! Reason codes carried on every decision, denial, and error response.
//!
//! Codes are stable machine-readable strings; the prose next to them is
//! free to change.

// ── Policy defaults ─────────────────────────────────────────────────
pub const POLICY_ALLOW: &str = "POLICY_ALLOW";
pub const POLICY_DENY: &str = "POLICY_DENY";
pub const POLICY_APPROVAL_REQUIRED: &str = "POLICY_APPROVAL_REQUIRED";

// ── Structural ──────────────────────────────────────────────────────
pub const UNKNOWN_TOOL: &str = "UNKNOWN_TOOL";
pub const INVALID_ENVELOPE: &str = "INVALID_ENVELOPE";
pub const INVALID_ARGS: &str = "INVALID_ARGS";
pub const INTERNAL: &str = "INTERNAL";

// ── Taint rules ─────────────────────────────────────────────────────
pub const TAINTED_EXEC: &str = "TAINTED_EXEC";
pub const TAINTED_WRITE: &str = "TAINTED_WRITE";
pub const TAINTED_WRITE_SYSTEM_PATH: &str = "TAINTED_WRITE_SYSTEM_PATH";
pub const TAINTED_INTERNAL_HOST: &str = "TAINTED_INTERNAL_HOST";

// ── Principal rules ─────────────────────────────────────────────────
pub const PRINCIPAL_DENY_PATTERN: &str = "PRINCIPAL_DENY_PATTERN";
pub const PRINCIPAL_APPROVAL_REQUIRED: &str = "PRINCIPAL_APPROVAL_REQUIRED";
pub const PRINCIPAL_TOOL_NOT_ALLOWED: &str = "PRINCIPAL_TOOL_NOT_ALLOWED";

// ── Pattern rules ───────────────────────────────────────────────────
pub const GLOBAL_DENY_PATTERN: &str = "GLOBAL_DENY_PATTERN";
pub const TOOL_DENY_PATTERN: &str = "TOOL_DENY_PATTERN";

// ── shell.exec validators ───────────────────────────────────────────
pub const CWD_NOT_ALLOWED: &str = "CWD_NOT_ALLOWED";
pub const COMMAND_NOT_ALLOWED: &str = "COMMAND_NOT_ALLOWED";
pub const TIMEOUT_EXCEEDED: &str = "TIMEOUT_EXCEEDED";

// ── files.write validators ──────────────────────────────────────────
pub const MISSING_PATH: &str = "MISSING_PATH";
pub const PATH_NOT_ALLOWED: &str = "PATH_NOT_ALLOWED";
pub const EXTENSION_DENIED: &str = "EXTENSION_DENIED";
pub const SIZE_EXCEEDED: &str = "SIZE_EXCEEDED";

// ── http.request validators ─────────────────────────────────────────
pub const MISSING_URL: &str = "MISSING_URL";
pub const INVALID_URL: &str = "INVALID_URL";
pub const METHOD_NOT_ALLOWED: &str = "METHOD_NOT_ALLOWED";
pub const DOMAIN_DENIED: &str = "DOMAIN_DENIED";
pub const DOMAIN_NOT_ALLOWED: &str = "DOMAIN_NOT_ALLOWED";

// ── Capability tokens ───────────────────────────────────────────────
pub const CAPABILITY_TOKEN_ALLOW: &str = "CAPABILITY_TOKEN_ALLOW";
pub const CAPABILITY_TOKEN_INVALID: &str = "CAPABILITY_TOKEN_INVALID";
pub const CAPABILITY_TOOL_MISMATCH: &str = "CAPABILITY_TOOL_MISMATCH";
pub const CAPABILITY_ARGS_MISMATCH: &str = "CAPABILITY_ARGS_MISMATCH";
pub const CAPABILITY_ROLE_MISMATCH: &str = "CAPABILITY_ROLE_MISMATCH";
pub const CAPABILITY_ACTOR_MISMATCH: &str = "CAPABILITY_ACTOR_MISMATCH";
pub const CAPABILITY_EXPIRED: &str = "CAPABILITY_EXPIRED";

// ── Idempotency ─────────────────────────────────────────────────────
pub const IDEMPOTENCY_KEY_CONFLICT: &str = "IDEMPOTENCY_KEY_CONFLICT";
pub const IDEMPOTENCY_IN_PROGRESS: &str = "IDEMPOTENCY_IN_PROGRESS";

// ── Approvals ───────────────────────────────────────────────────────
pub const APPROVAL_EXPIRED: &str = "APPROVAL_EXPIRED";
