//! Tool registry and execution dispatch.
//!
//! The three executors are the only tools the gateway knows how to run.
//! Argument schemas are strict: unknown fields are rejected before the
//! request reaches policy evaluation, so a typo'd constraint field cannot
//! silently widen a request.

use serde_json::{Map, Value};

use gk_policy::ToolPolicy;
use gk_tools::{files_write, shell_exec, ExecOutcome, FilesWriteArgs, HttpRequestArgs, ShellExecArgs};

use crate::state::AppState;

/// The tools this gateway can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ShellExec,
    FilesWrite,
    HttpRequest,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "shell.exec" => Some(ToolKind::ShellExec),
            "files.write" => Some(ToolKind::FilesWrite),
            "http.request" => Some(ToolKind::HttpRequest),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::ShellExec => "shell.exec",
            ToolKind::FilesWrite => "files.write",
            ToolKind::HttpRequest => "http.request",
        }
    }
}

/// Validated, typed arguments ready to execute.
#[derive(Debug, Clone)]
pub enum ToolArgs {
    ShellExec(ShellExecArgs),
    FilesWrite(FilesWriteArgs),
    HttpRequest(HttpRequestArgs),
}

/// Strictly parse raw args into the tool's schema.
pub fn parse_args(kind: ToolKind, args: &Map<String, Value>) -> Result<ToolArgs, String> {
    let value = Value::Object(args.clone());
    match kind {
        ToolKind::ShellExec => serde_json::from_value(value)
            .map(ToolArgs::ShellExec)
            .map_err(|e| format!("invalid shell.exec arguments: {e}")),
        ToolKind::FilesWrite => serde_json::from_value(value)
            .map(ToolArgs::FilesWrite)
            .map_err(|e| format!("invalid files.write arguments: {e}")),
        ToolKind::HttpRequest => serde_json::from_value(value)
            .map(ToolArgs::HttpRequest)
            .map_err(|e| format!("invalid http.request arguments: {e}")),
    }
}

/// Run the tool under its policy constraints.
pub async fn execute(state: &AppState, args: &ToolArgs, policy: &ToolPolicy) -> ExecOutcome {
    match args {
        ToolArgs::ShellExec(a) => shell_exec(a, policy).await,
        ToolArgs::FilesWrite(a) => files_write(a, policy).await,
        ToolArgs::HttpRequest(a) => state.http_executor.execute(a, policy).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn known_tools_resolve() {
        assert_eq!(ToolKind::from_name("shell.exec"), Some(ToolKind::ShellExec));
        assert_eq!(ToolKind::from_name("files.write"), Some(ToolKind::FilesWrite));
        assert_eq!(ToolKind::from_name("http.request"), Some(ToolKind::HttpRequest));
        assert_eq!(ToolKind::from_name("memory.graph"), None);
    }

    #[test]
    fn strict_schemas_reject_unknown_fields() {
        let err = parse_args(
            ToolKind::ShellExec,
            &map(json!({"command": "ls", "shell": "zsh"})),
        )
        .unwrap_err();
        assert!(err.contains("shell.exec"));

        assert!(parse_args(
            ToolKind::FilesWrite,
            &map(json!({"path": "/tmp/x", "content": "hi", "mode": "0777"})),
        )
        .is_err());

        assert!(parse_args(
            ToolKind::HttpRequest,
            &map(json!({"url": "https://example.com", "follow": true})),
        )
        .is_err());
    }

    #[test]
    fn valid_args_parse() {
        assert!(parse_args(
            ToolKind::ShellExec,
            &map(json!({"command": "ls", "cwd": "/tmp", "timeoutMs": 5000})),
        )
        .is_ok());
        assert!(parse_args(
            ToolKind::FilesWrite,
            &map(json!({"path": "/tmp/x", "content": "aGk=", "encoding": "base64"})),
        )
        .is_ok());
        assert!(parse_args(
            ToolKind::HttpRequest,
            &map(json!({"url": "https://example.com", "method": "POST", "body": "{}"})),
        )
        .is_ok());
    }

    #[test]
    fn missing_required_fields_fail() {
        assert!(parse_args(ToolKind::ShellExec, &map(json!({}))).is_err());
        assert!(parse_args(ToolKind::FilesWrite, &map(json!({"path": "/tmp/x"}))).is_err());
        assert!(parse_args(ToolKind::HttpRequest, &map(json!({}))).is_err());
    }
}
