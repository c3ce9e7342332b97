use super::{env_string, ConfigIssue};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `APPROVAL_PROVIDER` — where pending-approval notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyProvider {
    /// Log the approval (and its callback URLs) to the process log.
    Local,
    /// POST to a Slack incoming webhook.
    Slack,
    /// POST to the Runestone control plane.
    Runestone,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub provider: NotifyProvider,
    pub slack_webhook_url: Option<String>,
    pub runestone_api_url: Option<String>,
    pub runestone_api_key: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            provider: NotifyProvider::Local,
            slack_webhook_url: None,
            runestone_api_url: None,
            runestone_api_key: None,
        }
    }
}

impl NotifyConfig {
    pub fn from_env() -> Self {
        let provider = match env_string("APPROVAL_PROVIDER").as_deref() {
            Some("slack") => NotifyProvider::Slack,
            Some("runestone") => NotifyProvider::Runestone,
            _ => NotifyProvider::Local,
        };
        Self {
            provider,
            slack_webhook_url: env_string("SLACK_WEBHOOK_URL"),
            runestone_api_url: env_string("RUNESTONE_API_URL"),
            runestone_api_key: env_string("RUNESTONE_API_KEY"),
        }
    }

    /// Name used in the `/health` providers block.
    pub fn provider_name(&self) -> &'static str {
        match self.provider {
            NotifyProvider::Local => "local",
            NotifyProvider::Slack => "slack",
            NotifyProvider::Runestone => "runestone",
        }
    }

    pub fn validate(&self, issues: &mut Vec<ConfigIssue>) {
        match self.provider {
            NotifyProvider::Slack if self.slack_webhook_url.is_none() => {
                issues.push(ConfigIssue::error(
                    "SLACK_WEBHOOK_URL",
                    "required when APPROVAL_PROVIDER=slack",
                ));
            }
            NotifyProvider::Runestone
                if self.runestone_api_url.is_none() || self.runestone_api_key.is_none() =>
            {
                issues.push(ConfigIssue::error(
                    "RUNESTONE_API_URL",
                    "RUNESTONE_API_URL and RUNESTONE_API_KEY are required when APPROVAL_PROVIDER=runestone",
                ));
            }
            _ => {}
        }
    }
}
