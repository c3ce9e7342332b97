//! File-backed policy source.
//!
//! The policy file is YAML with top-level `tools`, `principals`,
//! `global_deny_patterns`, plus two include mechanisms resolved at load
//! time: `extends: <path|[paths]>` pulls in whole base policies, and
//! `principals_file: <path>` pulls in a principals map.  Includes form an
//! acyclic graph; diamonds are fine, cycles are an error.
//!
//! Merge semantics: list fields concatenate base-then-override (deduped),
//! scalars override, maps merge recursively.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;

use gk_domain::{Error, Result};

use crate::model::{Policy, PrincipalPolicy, ToolPolicy};
use crate::store::PolicySource;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    extends: Option<Extends>,
    #[serde(default)]
    principals_file: Option<String>,
    #[serde(flatten)]
    policy: Policy,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Extends {
    One(String),
    Many(Vec<String>),
}

impl Extends {
    fn paths(&self) -> Vec<&str> {
        match self {
            Extends::One(p) => vec![p.as_str()],
            Extends::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Source
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Loads the effective policy from a YAML file on disk.
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PolicySource for FilePolicySource {
    fn load(&self) -> Result<Policy> {
        let mut stack = HashSet::new();
        load_file(&self.path, &mut stack)
    }

    fn fingerprint(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & merging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn load_file(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Policy> {
    let canonical = path
        .canonicalize()
        .map_err(|e| Error::Policy(format!("cannot resolve policy file '{}': {e}", path.display())))?;
    if !stack.insert(canonical.clone()) {
        return Err(Error::Policy(format!(
            "include cycle detected at '{}'",
            canonical.display()
        )));
    }

    let raw = std::fs::read_to_string(&canonical)
        .map_err(|e| Error::Policy(format!("cannot read '{}': {e}", canonical.display())))?;
    let file: PolicyFile = serde_yaml::from_str(&raw)
        .map_err(|e| Error::Policy(format!("invalid policy file '{}': {e}", canonical.display())))?;

    let base_dir = canonical.parent().map(Path::to_path_buf).unwrap_or_default();

    // Bases merge in declaration order, the including file last.
    let mut effective = Policy::default();
    if let Some(extends) = &file.extends {
        for rel in extends.paths() {
            let base = load_file(&base_dir.join(rel), stack)?;
            effective = merge_policies(effective, base);
        }
    }
    if let Some(rel) = &file.principals_file {
        let principals = load_principals_file(&base_dir.join(rel))?;
        let merged = merge_principal_maps(std::mem::take(&mut effective.principals), principals);
        effective.principals = merged;
    }
    effective = merge_policies(effective, file.policy);

    stack.remove(&canonical);
    Ok(effective)
}

fn load_principals_file(path: &Path) -> Result<BTreeMap<String, PrincipalPolicy>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Policy(format!("cannot read principals file '{}': {e}", path.display())))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| Error::Policy(format!("invalid principals file '{}': {e}", path.display())))
}

/// Overlay `over` onto `base`: lists concatenate base-then-override,
/// scalars override, maps merge per key.
fn merge_policies(base: Policy, over: Policy) -> Policy {
    let mut tools = base.tools;
    for (name, tool) in over.tools {
        let merged = match tools.remove(&name) {
            Some(existing) => merge_tool(existing, tool),
            None => tool,
        };
        tools.insert(name, merged);
    }

    Policy {
        tools,
        principals: merge_principal_maps(base.principals, over.principals),
        global_deny_patterns: union(base.global_deny_patterns, over.global_deny_patterns),
    }
}

fn merge_principal_maps(
    base: BTreeMap<String, PrincipalPolicy>,
    over: BTreeMap<String, PrincipalPolicy>,
) -> BTreeMap<String, PrincipalPolicy> {
    let mut out = base;
    for (role, principal) in over {
        let merged = match out.remove(&role) {
            Some(existing) => merge_principal(existing, principal),
            None => principal,
        };
        out.insert(role, merged);
    }
    out
}

fn merge_tool(base: ToolPolicy, over: ToolPolicy) -> ToolPolicy {
    ToolPolicy {
        decision: over.decision,
        deny_patterns: union(base.deny_patterns, over.deny_patterns),
        allowed_commands: union(base.allowed_commands, over.allowed_commands),
        allowed_cwd_prefixes: union(base.allowed_cwd_prefixes, over.allowed_cwd_prefixes),
        max_timeout_ms: over.max_timeout_ms.or(base.max_timeout_ms),
        max_output_bytes: over.max_output_bytes.or(base.max_output_bytes),
        allowed_paths: union(base.allowed_paths, over.allowed_paths),
        deny_extensions: union(base.deny_extensions, over.deny_extensions),
        max_size_bytes: over.max_size_bytes.or(base.max_size_bytes),
        allowed_methods: union(base.allowed_methods, over.allowed_methods),
        allowed_domains: union(base.allowed_domains, over.allowed_domains),
        deny_domains: union(base.deny_domains, over.deny_domains),
        deny_ip_ranges: union(base.deny_ip_ranges, over.deny_ip_ranges),
        timeout_ms: over.timeout_ms.or(base.timeout_ms),
        max_body_bytes: over.max_body_bytes.or(base.max_body_bytes),
        max_redirects: over.max_redirects.or(base.max_redirects),
    }
}

fn merge_principal(base: PrincipalPolicy, over: PrincipalPolicy) -> PrincipalPolicy {
    PrincipalPolicy {
        allowed_tools: union(base.allowed_tools, over.allowed_tools),
        deny_patterns: union(base.deny_patterns, over.deny_patterns),
        require_approval: union(base.require_approval, over.require_approval),
        alert_budget: over.alert_budget.or(base.alert_budget),
    }
}

fn union(base: Vec<String>, over: Vec<String>) -> Vec<String> {
    let mut out = base;
    for item in over {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
