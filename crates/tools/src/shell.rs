//! `shell.exec` — run a command under the platform shell with hard time
//! and output caps.

use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use gk_policy::ToolPolicy;

use crate::ExecOutcome;

/// Fallback when neither the caller nor the policy sets a timeout.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Per-stream output cap when the policy sets none.
const DEFAULT_MAX_OUTPUT_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShellExecArgs {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Execute a command.  The effective timeout is the smaller of the
/// caller's request and the policy ceiling; both stdout and stderr are
/// capped independently.
pub async fn shell_exec(args: &ShellExecArgs, policy: &ToolPolicy) -> ExecOutcome {
    let policy_max = policy.max_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    let effective_timeout_ms = args.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(policy_max);
    let cap = policy.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES) as usize;

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&args.command);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::null());
    if let Some(cwd) = &args.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return ExecOutcome::fail(format!("failed to spawn command: {e}")),
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(read_capped(stdout, cap));
    let stderr_task = tokio::spawn(read_capped(stderr, cap));

    let timeout = std::time::Duration::from_millis(effective_timeout_ms);
    let (wait_result, killed) = tokio::select! {
        result = child.wait() => (result, false),
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            (child.wait().await, true)
        }
    };

    let (stdout_text, stdout_truncated) = stdout_task.await.unwrap_or_default();
    let (stderr_text, stderr_truncated) = stderr_task.await.unwrap_or_default();
    let truncated = stdout_truncated || stderr_truncated;

    tracing::debug!(killed, truncated, timeout_ms = effective_timeout_ms, "shell command finished");

    if killed {
        return ExecOutcome::fail_with(
            format!("command killed after exceeding the {effective_timeout_ms}ms timeout"),
            json!({
                "stdout": stdout_text,
                "stderr": stderr_text,
                "killed": true,
                "truncated": truncated,
            }),
        );
    }

    match wait_result {
        Ok(status) => {
            let exit_code = status.code();
            let output = json!({
                "stdout": stdout_text,
                "stderr": stderr_text,
                "exitCode": exit_code,
                "truncated": truncated,
            });
            if status.success() {
                ExecOutcome::ok(output)
            } else {
                ExecOutcome::fail_with(
                    match exit_code {
                        Some(code) => format!("command exited with code {code}"),
                        None => "command terminated by signal".to_string(),
                    },
                    output,
                )
            }
        }
        Err(e) => ExecOutcome::fail(format!("failed waiting for command: {e}")),
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes.  Bytes past the cap
/// are drained and counted so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> (String, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (String::new(), false);
    };

    let mut kept: Vec<u8> = Vec::new();
    let mut dropped: u64 = 0;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                let take = n.min(room);
                kept.extend_from_slice(&chunk[..take]);
                dropped += (n - take) as u64;
            }
            Err(_) => break,
        }
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if dropped > 0 {
        text.push_str(&format!("\n...[output truncated, {dropped} bytes dropped]"));
    }
    (text, dropped > 0)
}
