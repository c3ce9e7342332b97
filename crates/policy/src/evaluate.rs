//! The policy evaluator — a pure function from request to decision.
//!
//! Rule groups run in a fixed order; the first match within a group wins:
//! unknown tool → taint rules → principal rules → global deny patterns →
//! tool deny patterns → per-tool validators → the tool's configured
//! default.

use serde_json::{Map, Value};
use url::Url;

use gk_canonical::ip::{is_private_addr, parse_ip};
use gk_domain::envelope::Envelope;
use gk_domain::evaluation::{Decision, Evaluation};
use gk_domain::reason;

use crate::model::ToolPolicy;
use crate::store::PolicySnapshot;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Paths a tainted request may never write to, regardless of policy.
const SYSTEM_PATH_PREFIXES: &[&str] = &[
    "/etc/", "/usr/", "/bin/", "/sbin/", "/lib/", "/var/", "/root/", "/boot/",
    "/sys/", "/proc/", "/dev/", r"c:\windows", r"c:\program files", r"c:\system32",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluate one request against a policy snapshot.  Deterministic, no I/O.
pub fn evaluate(
    tool_name: &str,
    args: &Map<String, Value>,
    snapshot: &PolicySnapshot,
    envelope: Option<&Envelope>,
) -> Evaluation {
    // 1. Unknown tool.
    let Some(tool_policy) = snapshot.policy.tools.get(tool_name) else {
        return Evaluation::deny(
            reason::UNKNOWN_TOOL,
            format!("tool '{tool_name}' is not configured in the policy"),
        )
        .with_remediation("add the tool to the policy, or check the tool name")
        .with_flags(["unknown_tool"]);
    };

    let canonical_args = gk_canonical::canonicalize(&Value::Object(args.clone()));

    // 2. Taint rules.
    if let Some(env) = envelope {
        if env.is_tainted() {
            if let Some(eval) = taint_rules(tool_name, args) {
                return eval;
            }
        }
    }

    // 3. Principal rules.
    if let Some(env) = envelope {
        let role = env.actor.effective_role();
        if let Some(principal) = snapshot.policy.principals.get(role) {
            if let Some(compiled) = snapshot.principal_patterns.get(role) {
                for pattern in compiled {
                    if pattern.regex.is_match(&canonical_args) {
                        return Evaluation::deny(
                            reason::PRINCIPAL_DENY_PATTERN,
                            format!("blocked for role '{role}' by pattern '{}'", pattern.raw),
                        )
                        .with_flags(["principal_pattern_match".to_string(), format!("role:{role}")]);
                    }
                }
            }
            if principal.require_approval.iter().any(|t| t == tool_name) {
                return Evaluation::approve(
                    reason::PRINCIPAL_APPROVAL_REQUIRED,
                    format!("role '{role}' requires human approval for {tool_name}"),
                )
                .with_flags(["principal_approval".to_string(), format!("role:{role}")]);
            }
            if !principal.allowed_tools.is_empty()
                && !principal.allowed_tools.iter().any(|t| t == tool_name)
            {
                return Evaluation::deny(
                    reason::PRINCIPAL_TOOL_NOT_ALLOWED,
                    format!("role '{role}' may not use {tool_name}"),
                )
                .with_remediation(format!(
                    "use one of the tools allowed for '{role}', or request a role change"
                ))
                .with_flags([format!("role:{role}")]);
            }
        }
    }

    // 4. Global deny patterns.
    for pattern in &snapshot.global_patterns {
        if pattern.regex.is_match(&canonical_args) {
            return Evaluation::deny(
                reason::GLOBAL_DENY_PATTERN,
                format!("blocked by global pattern '{}'", pattern.raw),
            )
            .with_flags([format!("global_pattern_match:{}", pattern.raw)]);
        }
    }

    // 5. Tool deny patterns.
    if let Some(compiled) = snapshot.tool_patterns.get(tool_name) {
        for pattern in compiled {
            if pattern.regex.is_match(&canonical_args) {
                return Evaluation::deny(
                    reason::TOOL_DENY_PATTERN,
                    format!("blocked by policy pattern '{}'", pattern.raw),
                )
                .with_explanation(format!(
                    "the arguments match the deny pattern '{}' configured for {tool_name}",
                    pattern.raw
                ))
                .with_remediation("rewrite the request to avoid the blocked pattern")
                .with_flags([format!("pattern_match:{}", pattern.raw)]);
            }
        }
    }

    // 6. Per-tool validators.
    if let Some(eval) = match tool_name {
        "shell.exec" => validate_shell(args, tool_policy),
        "files.write" => validate_files_write(args, tool_policy),
        "http.request" => validate_http(args, tool_policy),
        _ => None,
    } {
        return eval;
    }

    // 7. Configured default.
    match tool_policy.decision {
        Decision::Allow => Evaluation::allow(
            reason::POLICY_ALLOW,
            format!("{tool_name} is allowed by policy"),
        ),
        Decision::Approve => Evaluation::approve(
            reason::POLICY_APPROVAL_REQUIRED,
            format!("{tool_name} requires human approval by policy"),
        )
        .with_remediation("wait for a human to approve the request"),
        Decision::Deny => Evaluation::deny(
            reason::POLICY_DENY,
            format!("{tool_name} is denied by policy"),
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Taint rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn taint_rules(tool_name: &str, args: &Map<String, Value>) -> Option<Evaluation> {
    match tool_name {
        "shell.exec" => Some(
            Evaluation::approve(
                reason::TAINTED_EXEC,
                "shell execution influenced by external content requires approval",
            )
            .with_remediation("a human must confirm the command before it runs")
            .with_flags(["tainted_exec", "external_content"]),
        ),
        "files.write" => {
            let path = args.get("path").and_then(Value::as_str).unwrap_or("");
            let lowered = path.to_ascii_lowercase();
            if SYSTEM_PATH_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
                Some(
                    Evaluation::deny(
                        reason::TAINTED_WRITE_SYSTEM_PATH,
                        format!("externally-influenced write to system path '{path}' is blocked"),
                    )
                    .with_flags(["tainted_write", "system_path", "external_content"]),
                )
            } else {
                Some(
                    Evaluation::approve(
                        reason::TAINTED_WRITE,
                        "file write influenced by external content requires approval",
                    )
                    .with_flags(["tainted_write", "external_content"]),
                )
            }
        }
        "http.request" => {
            let url = args.get("url").and_then(Value::as_str).unwrap_or("");
            let host = Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string));
            match host {
                Some(h) if is_internal_hostname(&h) => Some(
                    Evaluation::deny(
                        reason::TAINTED_INTERNAL_HOST,
                        format!("externally-influenced request to internal host '{h}' is blocked"),
                    )
                    .with_flags(["internal_host"]),
                ),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Hosts that count as "internal" for tainted requests: localhost, any
/// private/link-local/loopback literal, and `*.local` / `*.internal`.
fn is_internal_hostname(host: &str) -> bool {
    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered.ends_with(".local") || lowered.ends_with(".internal") {
        return true;
    }
    match parse_ip(&lowered) {
        Some(ip) => is_private_addr(&ip),
        None => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-tool validators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn validate_shell(args: &Map<String, Value>, tp: &ToolPolicy) -> Option<Evaluation> {
    if let Some(cwd) = args.get("cwd").and_then(Value::as_str) {
        if !tp.allowed_cwd_prefixes.is_empty()
            && !tp.allowed_cwd_prefixes.iter().any(|p| cwd.starts_with(p))
        {
            return Some(
                Evaluation::deny(
                    reason::CWD_NOT_ALLOWED,
                    format!("working directory '{cwd}' is outside the allowed prefixes"),
                )
                .with_remediation("run the command from an allowed directory"),
            );
        }
    }

    if !tp.allowed_commands.is_empty() {
        let command = args.get("command").and_then(Value::as_str).unwrap_or("");
        let first_token = command.split_whitespace().next().unwrap_or("");
        if !tp.allowed_commands.iter().any(|c| c == first_token) {
            return Some(
                Evaluation::deny(
                    reason::COMMAND_NOT_ALLOWED,
                    format!("command '{first_token}' is not in the allowed command list"),
                )
                .with_remediation(format!(
                    "use one of the allowed commands: {}",
                    tp.allowed_commands.join(", ")
                )),
            );
        }
    }

    if let (Some(requested), Some(max)) = (
        args.get("timeoutMs").and_then(Value::as_u64),
        tp.max_timeout_ms,
    ) {
        if requested > max {
            return Some(Evaluation::deny(
                reason::TIMEOUT_EXCEEDED,
                format!("requested timeout {requested}ms exceeds the policy maximum of {max}ms"),
            ));
        }
    }

    None
}

fn validate_files_write(args: &Map<String, Value>, tp: &ToolPolicy) -> Option<Evaluation> {
    let Some(path) = args.get("path").and_then(Value::as_str) else {
        return Some(Evaluation::deny(
            reason::MISSING_PATH,
            "files.write requires a path",
        ));
    };

    if !tp.allowed_paths.is_empty() && !tp.allowed_paths.iter().any(|p| path.starts_with(p)) {
        return Some(
            Evaluation::deny(
                reason::PATH_NOT_ALLOWED,
                format!("path '{path}' is outside the allowed write roots"),
            )
            .with_remediation(format!(
                "write under one of: {}",
                tp.allowed_paths.join(", ")
            )),
        );
    }

    if !tp.deny_extensions.is_empty() {
        if let Some(ext) = file_extension(path) {
            if tp
                .deny_extensions
                .iter()
                .any(|d| d.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            {
                return Some(Evaluation::deny(
                    reason::EXTENSION_DENIED,
                    format!("writing '.{ext}' files is denied by policy"),
                ));
            }
        }
    }

    if let Some(max) = tp.max_size_bytes {
        let content = args.get("content").and_then(Value::as_str).unwrap_or("");
        let size = content.len() as u64;
        if size > max {
            return Some(Evaluation::deny(
                reason::SIZE_EXCEEDED,
                format!("content is {size} bytes; the policy caps writes at {max} bytes"),
            ));
        }
    }

    None
}

fn file_extension(path: &str) -> Option<String> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

fn validate_http(args: &Map<String, Value>, tp: &ToolPolicy) -> Option<Evaluation> {
    let Some(raw_url) = args.get("url").and_then(Value::as_str) else {
        return Some(Evaluation::deny(
            reason::MISSING_URL,
            "http.request requires a url",
        ));
    };

    let url = match Url::parse(raw_url) {
        Ok(u) => u,
        Err(e) => {
            return Some(Evaluation::deny(
                reason::INVALID_URL,
                format!("url does not parse: {e}"),
            ));
        }
    };

    let method = args
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_ascii_uppercase();
    if !tp.allowed_methods.is_empty()
        && !tp
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&method))
    {
        return Some(
            Evaluation::deny(
                reason::METHOD_NOT_ALLOWED,
                format!("method {method} is not allowed for http.request"),
            )
            .with_remediation(format!(
                "use one of: {}",
                tp.allowed_methods.join(", ")
            )),
        );
    }

    let Some(host) = url.host_str() else {
        return Some(Evaluation::deny(
            reason::INVALID_URL,
            "url has no host",
        ));
    };

    if tp
        .deny_domains
        .iter()
        .any(|d| d.eq_ignore_ascii_case(host))
    {
        return Some(Evaluation::deny(
            reason::DOMAIN_DENIED,
            format!("domain '{host}' is on the deny list"),
        ));
    }

    if !tp.allowed_domains.is_empty()
        && !tp.allowed_domains.iter().any(|d| domain_matches(host, d))
    {
        return Some(
            Evaluation::deny(
                reason::DOMAIN_NOT_ALLOWED,
                format!("domain '{host}' is not in the allowed domain list"),
            )
            .with_remediation(format!(
                "request one of: {}",
                tp.allowed_domains.join(", ")
            )),
        );
    }

    None
}

/// Match a hostname against a domain rule.  `*.example.com` and
/// `.example.com` cover subdomains but not the apex; anything else is an
/// exact (case-insensitive) match.
pub fn domain_matches(host: &str, rule: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let rule = rule.to_ascii_lowercase();
    if let Some(suffix) = rule.strip_prefix("*.") {
        return host.ends_with(&format!(".{suffix}"));
    }
    if rule.starts_with('.') {
        return host.ends_with(&rule);
    }
    host == rule
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
