//! The three dangerous tool executors.
//!
//! Each executor returns a structured [`ExecOutcome`] and never lets an
//! error escape its boundary — a failed execution is still a completed
//! request from the gateway's point of view.  Policy-level validation has
//! already happened by the time an executor runs; the checks here are the
//! execution-time layer of the same defenses (symlink resolution, per-hop
//! address validation, resource caps).

pub mod files;
pub mod http;
pub mod shell;

use serde::Serialize;
use serde_json::Value;

pub use files::{files_write, FilesWriteArgs};
pub use http::{HttpExecutor, HttpRequestArgs};
pub use shell::{shell_exec, ShellExecArgs};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What an executor hands back to the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecOutcome {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn fail_with(error: impl Into<String>, output: Value) -> Self {
        Self {
            success: false,
            output: Some(output),
            error: Some(error.into()),
        }
    }
}
