mod data;
mod notify;
mod policy;
mod server;

pub use data::*;
pub use notify::*;
pub use policy::*;
pub use server::*;

use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gateway configuration, assembled from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub policy: PolicyConfig,
    pub data: DataConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Read every recognized environment variable.  Missing variables fall
    /// back to their defaults; `validate()` decides whether the result is
    /// usable.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            policy: PolicyConfig::from_env(),
            data: DataConfig::from_env(),
            notify: NotifyConfig::from_env(),
        }
    }

    /// Validate the assembled config.  Startup refuses to run on any
    /// `Error`-severity issue.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        self.server.validate(&mut issues);
        self.policy.validate(&mut issues);
        self.notify.validate(&mut issues);
        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// A single configuration problem found during validation.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

// ── env helpers ─────────────────────────────────────────────────────

pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub(crate) fn env_u16(name: &str, default: u16) -> u16 {
    env_string(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_u64(name: &str, default: u64) -> u64 {
    env_string(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(name: &str) -> bool {
    matches!(
        env_string(name).as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_flags_missing_secret() {
        let config = Config {
            server: ServerConfig::default(),
            policy: PolicyConfig::default(),
            data: DataConfig::default(),
            notify: NotifyConfig::default(),
        };
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "GATEKEEPER_SECRET"));
    }

    #[test]
    fn short_secret_is_an_error() {
        let mut server = ServerConfig::default();
        server.secret = "short".into();
        let mut issues = Vec::new();
        server.validate(&mut issues);
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "GATEKEEPER_SECRET"));
    }

    #[test]
    fn long_secret_passes() {
        let mut server = ServerConfig::default();
        server.secret = "a".repeat(32);
        let mut issues = Vec::new();
        server.validate(&mut issues);
        assert!(!issues.iter().any(|i| i.field == "GATEKEEPER_SECRET"));
    }

    #[test]
    fn slack_provider_requires_webhook_url() {
        let notify = NotifyConfig {
            provider: NotifyProvider::Slack,
            slack_webhook_url: None,
            runestone_api_url: None,
            runestone_api_key: None,
        };
        let mut issues = Vec::new();
        notify.validate(&mut issues);
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "SLACK_WEBHOOK_URL"));
    }
}
