use super::{env_bool, env_string, env_u16, ConfigIssue};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Listen address, signing secret, and request-shaping flags.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `GATEKEEPER_PORT`.
    pub port: u16,
    /// `BASE_URL` — prefix used when signing approval callback URLs.
    pub base_url: String,
    /// `GATEKEEPER_SECRET` — HMAC key for approval URLs and capability
    /// tokens.  Must be at least 32 bytes.
    pub secret: String,
    /// `DEMO_MODE` — include signed approve/deny URLs in 202 responses.
    pub demo_mode: bool,
    /// `GATEKEEPER_ROLE` — default actor role for clients that set none.
    pub default_role: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            base_url: "http://127.0.0.1:8787".into(),
            secret: String::new(),
            demo_mode: false,
            default_role: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = env_u16("GATEKEEPER_PORT", 8787);
        Self {
            port,
            base_url: env_string("BASE_URL")
                .unwrap_or_else(|| format!("http://127.0.0.1:{port}")),
            secret: env_string("GATEKEEPER_SECRET").unwrap_or_default(),
            demo_mode: env_bool("DEMO_MODE"),
            default_role: env_string("GATEKEEPER_ROLE"),
        }
    }

    pub fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        if self.secret.len() < 32 {
            issues.push(ConfigIssue::error(
                "GATEKEEPER_SECRET",
                "must be set and at least 32 bytes; approval URLs and capability tokens are signed with it",
            ));
        }
        if self.base_url.ends_with('/') {
            issues.push(ConfigIssue::warning(
                "BASE_URL",
                "trailing slash will produce double slashes in callback URLs",
            ));
        }
    }
}
