//! Snapshot store — immutable compiled policies behind an atomic swap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use regex::{Regex, RegexBuilder};

use gk_domain::{Error, Result};

use crate::model::Policy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Source trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where policies come from.  The file source is the only built-in; the
/// store only cares about loading and change detection.
pub trait PolicySource: Send + Sync {
    fn load(&self) -> Result<Policy>;
    /// Cheap change marker (file mtime).  `None` when unknown — the store
    /// then reloads on every poll tick.
    fn fingerprint(&self) -> Option<SystemTime>;
    /// Short label for health reporting (`file:./policy.yaml`).
    fn describe(&self) -> String;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A compiled pattern kept alongside its source text (the text goes into
/// risk flags and explanations).
pub(crate) struct CompiledPattern {
    pub raw: String,
    pub regex: Regex,
}

/// An immutable, pre-compiled view of one policy load.  Requests capture
/// an `Arc<PolicySnapshot>` once and use it for their whole lifetime.
pub struct PolicySnapshot {
    pub policy: Policy,
    /// `sha256:<hex>` of the canonicalized policy.
    pub hash: String,
    pub(crate) global_patterns: Vec<CompiledPattern>,
    pub(crate) tool_patterns: HashMap<String, Vec<CompiledPattern>>,
    pub(crate) principal_patterns: HashMap<String, Vec<CompiledPattern>>,
}

impl PolicySnapshot {
    /// Compile a loaded policy.  Principal regexes that fail to compile
    /// are an error; tool and global patterns are skipped with a warning
    /// (a broken deny pattern must not become an accidental match).
    pub fn build(policy: Policy) -> Result<Self> {
        let mut principal_patterns = HashMap::new();
        for (role, principal) in &policy.principals {
            let mut compiled = Vec::new();
            for raw in &principal.deny_patterns {
                let regex = case_insensitive(raw).map_err(|e| {
                    Error::Policy(format!(
                        "principal '{role}' deny pattern '{raw}' does not compile: {e}"
                    ))
                })?;
                compiled.push(CompiledPattern { raw: raw.clone(), regex });
            }
            principal_patterns.insert(role.clone(), compiled);
        }

        let global_patterns = compile_lossy("global", &policy.global_deny_patterns);
        let mut tool_patterns = HashMap::new();
        for (tool, tp) in &policy.tools {
            tool_patterns.insert(tool.clone(), compile_lossy(tool, &tp.deny_patterns));
        }

        let hash = policy.hash();
        Ok(Self {
            policy,
            hash,
            global_patterns,
            tool_patterns,
            principal_patterns,
        })
    }
}

fn case_insensitive(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

fn compile_lossy(scope: &str, patterns: &[String]) -> Vec<CompiledPattern> {
    let mut out = Vec::with_capacity(patterns.len());
    for raw in patterns {
        match case_insensitive(raw) {
            Ok(regex) => out.push(CompiledPattern { raw: raw.clone(), regex }),
            Err(e) => {
                tracing::warn!(scope, pattern = %raw, error = %e, "skipping invalid deny pattern");
            }
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the current snapshot and reloads it when the source changes.
pub struct PolicyStore {
    source: Box<dyn PolicySource>,
    current: RwLock<Arc<PolicySnapshot>>,
    last_fingerprint: Mutex<Option<SystemTime>>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("source", &self.source.describe())
            .finish()
    }
}

impl PolicyStore {
    /// Load the initial snapshot; fails fast on an unloadable policy.
    pub fn load(source: Box<dyn PolicySource>) -> Result<Self> {
        let policy = source.load()?;
        let snapshot = Arc::new(PolicySnapshot::build(policy)?);
        let fingerprint = source.fingerprint();
        tracing::info!(
            hash = %snapshot.hash,
            tools = snapshot.policy.tools.len(),
            principals = snapshot.policy.principals.len(),
            source = %source.describe(),
            "policy loaded"
        );
        Ok(Self {
            source,
            current: RwLock::new(snapshot),
            last_fingerprint: Mutex::new(fingerprint),
        })
    }

    /// The current snapshot.  In-flight requests keep whatever they took.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.read().clone()
    }

    /// `sha256:<hex>` of the current snapshot.
    pub fn hash(&self) -> String {
        self.current.read().hash.clone()
    }

    pub fn describe_source(&self) -> String {
        self.source.describe()
    }

    /// Reload when the source fingerprint moved.  Returns `true` when a
    /// new snapshot was swapped in.  A failed reload keeps the old
    /// snapshot in place.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let fingerprint = self.source.fingerprint();
        {
            let mut last = self.last_fingerprint.lock();
            if fingerprint.is_some() && *last == fingerprint {
                return Ok(false);
            }
            *last = fingerprint;
        }

        let policy = self.source.load()?;
        let snapshot = Arc::new(PolicySnapshot::build(policy)?);
        let changed = {
            let mut current = self.current.write();
            if current.hash == snapshot.hash {
                false
            } else {
                tracing::info!(old = %current.hash, new = %snapshot.hash, "policy reloaded");
                *current = snapshot;
                true
            }
        };
        Ok(changed)
    }

    /// Background poller driving hot reload.  `interval_secs == 0`
    /// disables it.
    pub fn spawn_reload_task(self: &Arc<Self>, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = store.reload_if_changed() {
                    tracing::warn!(error = %e, "policy reload failed; keeping previous snapshot");
                }
            }
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FilePolicySource;
    use tempfile::TempDir;

    fn policy_file(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn snapshot_hash_matches_policy_hash() {
        let dir = TempDir::new().unwrap();
        let path = policy_file(&dir, "tools:\n  shell.exec:\n    decision: allow\n");
        let store = PolicyStore::load(Box::new(FilePolicySource::new(path))).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.hash, snapshot.policy.hash());
        assert_eq!(store.hash(), snapshot.hash);
    }

    #[test]
    fn invalid_principal_regex_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = policy_file(
            &dir,
            "tools: {}\nprincipals:\n  drifter:\n    deny_patterns: [\"[unclosed\"]\n",
        );
        let err = PolicyStore::load(Box::new(FilePolicySource::new(path))).unwrap_err();
        assert!(err.to_string().contains("does not compile"));
    }

    #[test]
    fn invalid_tool_pattern_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = policy_file(
            &dir,
            "tools:\n  shell.exec:\n    decision: allow\n    deny_patterns: [\"[unclosed\", \"sudo\"]\n",
        );
        let store = PolicyStore::load(Box::new(FilePolicySource::new(path))).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.tool_patterns["shell.exec"].len(), 1);
        assert_eq!(snapshot.tool_patterns["shell.exec"][0].raw, "sudo");
    }

    #[test]
    fn reload_swaps_snapshot_and_keeps_old_reference_valid() {
        let dir = TempDir::new().unwrap();
        let path = policy_file(&dir, "tools:\n  shell.exec:\n    decision: allow\n");
        let store = PolicyStore::load(Box::new(FilePolicySource::new(path.clone()))).unwrap();
        let before = store.snapshot();

        std::fs::write(&path, "tools:\n  shell.exec:\n    decision: deny\n").unwrap();
        // Force a fingerprint mismatch regardless of mtime granularity.
        *store.last_fingerprint.lock() = None;
        assert!(store.reload_if_changed().unwrap());

        let after = store.snapshot();
        assert_ne!(before.hash, after.hash);
        // The captured snapshot still reads the old decision.
        assert_eq!(
            before.policy.tools["shell.exec"].decision,
            gk_domain::evaluation::Decision::Allow
        );
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = policy_file(&dir, "tools:\n  shell.exec:\n    decision: allow\n");
        let store = PolicyStore::load(Box::new(FilePolicySource::new(path.clone()))).unwrap();
        let before = store.hash();

        std::fs::write(&path, "tools:\n  shell.exec:\n    decision: nonsense\n").unwrap();
        *store.last_fingerprint.lock() = None;
        assert!(store.reload_if_changed().is_err());
        assert_eq!(store.hash(), before);
    }
}
