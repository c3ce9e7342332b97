//! Append-only audit trail.
//!
//! Every decision the gateway renders becomes one immutable NDJSON record
//! in a daily-rotated file under the audit directory.  Audit writes are
//! best-effort: a failed write is logged and dropped, never surfaced to
//! the request path.  Records are never rewritten.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use gk_domain::envelope::{Actor, ContextRef, Origin};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decision recorded on an audit entry.  `Executed` and
/// `ApprovalConsumed` are follow-up records emitted after the initial
/// request decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Allow,
    Approve,
    Deny,
    Executed,
    ApprovalConsumed,
}

/// Wall-clock receipt for one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl ExecutionReceipt {
    pub fn new(started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub tool: String,
    pub decision: AuditDecision,
    pub actor: Actor,
    /// Redacted view of the arguments — safe for logs and dashboards.
    pub args_summary: Value,
    pub args_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_receipt: Option<ExecutionReceipt>,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Filled by the sink when left empty.
    #[serde(default)]
    pub policy_hash: String,
    #[serde(default)]
    pub gatekeeper_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<Uuid>,
    /// `approved` / `denied`, on approval-consumed records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_refs: Option<Vec<ContextRef>>,
}

impl AuditEntry {
    /// A minimal entry; callers fill in the shape-specific fields.
    pub fn new(
        request_id: Uuid,
        tool: impl Into<String>,
        decision: AuditDecision,
        actor: Actor,
        args_summary: Value,
        args_hash: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id,
            tool: tool.into(),
            decision,
            actor,
            args_summary,
            args_hash: args_hash.into(),
            result_summary: None,
            execution_receipt: None,
            risk_flags: Vec::new(),
            reason_code: None,
            human_explanation: None,
            remediation: None,
            policy_hash: String::new(),
            gatekeeper_version: String::new(),
            approval_id: None,
            action: None,
            origin: None,
            taint: None,
            context_refs: None,
        }
    }
}

/// Redacted argument view used for `args_summary` and notifications.
pub fn summarize_args(args: &serde_json::Map<String, Value>) -> Value {
    gk_canonical::redact::redact_secrets(&Value::Object(args.clone()), 200)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where audit records go.  Implementations must never fail the caller.
pub trait AuditSink: Send + Sync {
    fn write(&self, entry: AuditEntry);
    /// No-op for file sinks.
    fn flush(&self) {}
}

type HashProvider = Box<dyn Fn() -> String + Send + Sync>;

/// Daily-rotated NDJSON files: `{audit_dir}/{YYYY-MM-DD}.jsonl`.
pub struct FileAuditSink {
    dir: PathBuf,
    version: String,
    policy_hash: HashProvider,
    /// `(date, handle)` for the currently open day file.
    current: Mutex<Option<(String, File)>>,
}

impl FileAuditSink {
    pub fn new(dir: PathBuf, version: impl Into<String>, policy_hash: HashProvider) -> Self {
        Self {
            dir,
            version: version.into(),
            policy_hash,
            current: Mutex::new(None),
        }
    }

    fn append(&self, line: &str, date: &str) -> std::io::Result<()> {
        let mut current = self.current.lock();
        let needs_open = match current.as_ref() {
            Some((open_date, _)) => open_date != date,
            None => true,
        };
        if needs_open {
            std::fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(format!("{date}.jsonl")))?;
            *current = Some((date.to_string(), file));
        }
        let (_, file) = current.as_mut().expect("file opened above");
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }
}

impl AuditSink for FileAuditSink {
    fn write(&self, mut entry: AuditEntry) {
        entry.gatekeeper_version = self.version.clone();
        if entry.policy_hash.is_empty() {
            entry.policy_hash = (self.policy_hash)();
        }

        let date = entry.timestamp.format("%Y-%m-%d").to_string();
        let line = match serde_json::to_string(&entry) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, request_id = %entry.request_id, "failed to serialize audit entry; dropping");
                return;
            }
        };
        if let Err(e) = self.append(&line, &date) {
            tracing::error!(error = %e, request_id = %entry.request_id, "failed to append audit entry; dropping");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use gk_domain::envelope::ActorKind;
    use serde_json::json;
    use tempfile::TempDir;

    fn actor() -> Actor {
        Actor {
            kind: ActorKind::Agent,
            name: "pilot".into(),
            role: None,
            run_id: None,
        }
    }

    fn entry() -> AuditEntry {
        AuditEntry::new(
            Uuid::new_v4(),
            "shell.exec",
            AuditDecision::Deny,
            actor(),
            json!({"command": "rm -rf /"}),
            "abc123",
        )
    }

    fn sink(dir: &TempDir) -> FileAuditSink {
        FileAuditSink::new(
            dir.path().to_path_buf(),
            "0.1.0-test",
            Box::new(|| "sha256:feedface".to_string()),
        )
    }

    #[test]
    fn writes_one_json_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);
        sink.write(entry());
        sink.write(entry());

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let content = std::fs::read_to_string(dir.path().join(format!("{date}.jsonl"))).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["decision"], "deny");
            assert_eq!(parsed["tool"], "shell.exec");
        }
    }

    #[test]
    fn injects_version_and_policy_hash() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);
        sink.write(entry());

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let content = std::fs::read_to_string(dir.path().join(format!("{date}.jsonl"))).unwrap();
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["policyHash"], "sha256:feedface");
        assert_eq!(parsed["gatekeeperVersion"], "0.1.0-test");
    }

    #[test]
    fn caller_provided_policy_hash_wins() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);
        let mut e = entry();
        e.policy_hash = "sha256:snapshot-at-evaluation".into();
        sink.write(e);

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let content = std::fs::read_to_string(dir.path().join(format!("{date}.jsonl"))).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["policyHash"], "sha256:snapshot-at-evaluation");
    }

    #[test]
    fn appends_never_rewrite_earlier_records() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir);
        sink.write(entry());

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let path = dir.path().join(format!("{date}.jsonl"));
        let before = std::fs::read_to_string(&path).unwrap();

        sink.write(entry());
        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(&before));
        assert_eq!(after.lines().count(), before.lines().count() + 1);
    }

    #[test]
    fn write_failure_is_swallowed() {
        // A directory path that cannot be created (parent is a file).
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let sink = FileAuditSink::new(
            blocker.join("audit"),
            "0.1.0-test",
            Box::new(String::new),
        );
        // Must not panic.
        sink.write(entry());
        sink.flush();
    }

    #[test]
    fn execution_receipt_duration() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(1500);
        let receipt = ExecutionReceipt::new(start, end);
        assert_eq!(receipt.duration_ms, 1500);
    }

    #[test]
    fn summarize_redacts_and_caps() {
        let args = json!({"command": "curl", "apiKey": "sk-secret"})
            .as_object()
            .unwrap()
            .clone();
        let summary = summarize_args(&args);
        assert_eq!(summary["apiKey"], "[REDACTED]");
        assert_eq!(summary["command"], "curl");
    }
}
