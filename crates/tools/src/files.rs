//! `files.write` — constrained file creation with symlink-escape defense.
//!
//! The policy's `allowed_paths` roots are enforced twice: once as a
//! lexical prefix check on the normalized request path, and again after
//! canonicalizing the nearest existing ancestor through the OS realpath,
//! so a symlink inside an allowed root cannot smuggle the write outside
//! of it.

use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use gk_policy::ToolPolicy;

use crate::ExecOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteEncoding {
    #[default]
    Utf8,
    Base64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilesWriteArgs {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub encoding: Option<WriteEncoding>,
}

/// Write a file, creating missing parents.
pub async fn files_write(args: &FilesWriteArgs, policy: &ToolPolicy) -> ExecOutcome {
    let resolved = match resolve_target(&args.path, &policy.allowed_paths) {
        Ok(p) => p,
        Err(e) => return ExecOutcome::fail(e),
    };

    let bytes = match args.encoding.unwrap_or_default() {
        WriteEncoding::Utf8 => args.content.clone().into_bytes(),
        WriteEncoding::Base64 => match BASE64_STANDARD.decode(args.content.as_bytes()) {
            Ok(b) => b,
            Err(e) => return ExecOutcome::fail(format!("content is not valid base64: {e}")),
        },
    };

    if let Some(parent) = resolved.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ExecOutcome::fail(format!("failed to create parent directory: {e}"));
        }
    }

    match write_atomic(&resolved, &bytes).await {
        Ok(()) => ExecOutcome::ok(json!({
            "path": resolved.display().to_string(),
            "bytesWritten": bytes.len(),
        })),
        Err(e) => ExecOutcome::fail(format!("failed to write '{}': {e}", resolved.display())),
    }
}

/// Atomic write: uniquely-named tmp sibling, flush, sync, rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the target absolutely and enforce containment in the allowed
/// roots — both lexically and through the OS realpath of the nearest
/// existing ancestor.
fn resolve_target(requested: &str, allowed_paths: &[String]) -> Result<PathBuf, String> {
    let absolute = if Path::new(requested).is_absolute() {
        PathBuf::from(requested)
    } else {
        std::env::current_dir()
            .map_err(|e| format!("cannot resolve working directory: {e}"))?
            .join(requested)
    };
    let normalized = normalize(&absolute)?;

    if allowed_paths.is_empty() {
        return Ok(normalized);
    }

    // Lexical containment first.
    let roots: Vec<PathBuf> = allowed_paths.iter().map(PathBuf::from).collect();
    if !roots.iter().any(|root| normalized.starts_with(root)) {
        return Err(format!(
            "path '{}' is outside the allowed write roots",
            normalized.display()
        ));
    }

    // Realpath containment: canonicalize the nearest existing ancestor and
    // re-check so symlinks cannot escape an allowed root.
    let real = realpath_with_tail(&normalized)?;
    let real_roots: Vec<PathBuf> = roots
        .iter()
        .map(|root| root.canonicalize().unwrap_or_else(|_| root.clone()))
        .collect();
    if !real_roots.iter().any(|root| real.starts_with(root)) {
        return Err(format!(
            "path '{}' resolves outside the allowed write roots",
            normalized.display()
        ));
    }

    Ok(real)
}

/// Lexically normalize: strip `.`, fold `..` into its parent, never
/// letting the path climb above the root.
fn normalize(path: &Path) -> Result<PathBuf, String> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(format!(
                        "path '{}' escapes the filesystem root",
                        path.display()
                    ));
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Canonicalize the longest existing prefix of `path` and re-append the
/// missing tail components.
fn realpath_with_tail(path: &Path) -> Result<PathBuf, String> {
    let mut existing = path;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match existing.parent() {
            Some(parent) => {
                if let Some(name) = existing.file_name() {
                    tail.push(name);
                }
                existing = parent;
            }
            None => break,
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| format!("cannot resolve '{}': {e}", existing.display()))?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
