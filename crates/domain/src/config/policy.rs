use super::{env_string, env_u64, ConfigIssue};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy source
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which policy source backs the store.  File is the only built-in source;
/// the store takes the source behind a trait so others can be plugged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySourceKind {
    File,
}

/// `POLICY_SOURCE` / `POLICY_PATH` and reload cadence.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub source: PolicySourceKind,
    /// Path to the YAML policy file (file source).
    pub path: String,
    /// How often the store polls the file for changes (seconds; 0 disables
    /// hot reload).
    pub reload_interval_secs: u64,
    /// Raw `POLICY_SOURCE` value, kept for the validation message.
    raw_source: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            source: PolicySourceKind::File,
            path: "./policy.yaml".into(),
            reload_interval_secs: 10,
            raw_source: "file".into(),
        }
    }
}

impl PolicyConfig {
    /// A file-source config pointing at `path`, with hot reload disabled.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            source: PolicySourceKind::File,
            path: path.into(),
            reload_interval_secs: 0,
            raw_source: "file".into(),
        }
    }

    pub fn from_env() -> Self {
        let raw_source = env_string("POLICY_SOURCE").unwrap_or_else(|| "file".into());
        Self {
            source: PolicySourceKind::File,
            path: env_string("POLICY_PATH").unwrap_or_else(|| "./policy.yaml".into()),
            reload_interval_secs: env_u64("POLICY_RELOAD_INTERVAL_SECS", 10),
            raw_source,
        }
    }

    pub fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.raw_source != "file" {
            issues.push(ConfigIssue::error(
                "POLICY_SOURCE",
                format!("unknown policy source '{}' (supported: file)", self.raw_source),
            ));
        }
        if !std::path::Path::new(&self.path).exists() {
            issues.push(ConfigIssue::error(
                "POLICY_PATH",
                format!("policy file '{}' does not exist", self.path),
            ));
        }
    }
}
