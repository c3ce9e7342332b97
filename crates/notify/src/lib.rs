//! Approval notifiers — tell a human that a request is waiting.
//!
//! Notifications are fire-and-forget: the orchestrator spawns them and
//! returns the 202 immediately.  A notifier that fails only logs; it can
//! never block or fail the approval response.

use async_trait::async_trait;
use serde_json::json;

use gk_domain::config::{NotifyConfig, NotifyProvider};
use gk_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a notifier needs to render a useful message.
#[derive(Debug, Clone)]
pub struct ApprovalNotification {
    pub approval_id: String,
    pub tool_name: String,
    pub actor_name: String,
    pub actor_role: String,
    /// Redacted argument summary, safe to post externally.
    pub args_summary: serde_json::Value,
    pub expires_at: String,
    pub approve_url: String,
    pub deny_url: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called when a pending approval is created.
    async fn notify_approval_requested(&self, notification: &ApprovalNotification);

    /// Provider label for `/health`.
    fn name(&self) -> &'static str;
}

/// Select a notifier from configuration at startup.
pub fn create_notifier(config: &NotifyConfig) -> Result<Box<dyn Notifier>> {
    match config.provider {
        NotifyProvider::Local => Ok(Box::new(LocalNotifier)),
        NotifyProvider::Slack => {
            let webhook_url = config
                .slack_webhook_url
                .clone()
                .ok_or_else(|| Error::Config("SLACK_WEBHOOK_URL is required for the slack notifier".into()))?;
            Ok(Box::new(SlackNotifier::new(webhook_url)))
        }
        NotifyProvider::Runestone => {
            let api_url = config
                .runestone_api_url
                .clone()
                .ok_or_else(|| Error::Config("RUNESTONE_API_URL is required for the runestone notifier".into()))?;
            let api_key = config
                .runestone_api_key
                .clone()
                .ok_or_else(|| Error::Config("RUNESTONE_API_KEY is required for the runestone notifier".into()))?;
            Ok(Box::new(RunestoneNotifier::new(api_url, api_key)))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Logs the approval (and its callback URLs) to the process log.  The
/// default for single-operator setups.
pub struct LocalNotifier;

#[async_trait]
impl Notifier for LocalNotifier {
    async fn notify_approval_requested(&self, n: &ApprovalNotification) {
        tracing::info!(
            approval_id = %n.approval_id,
            tool = %n.tool_name,
            actor = %n.actor_name,
            role = %n.actor_role,
            expires_at = %n.expires_at,
            approve_url = %n.approve_url,
            deny_url = %n.deny_url,
            "approval requested"
        );
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slack
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Posts to a Slack incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify_approval_requested(&self, n: &ApprovalNotification) {
        let text = format!(
            ":lock: *{}* wants to run `{}`\n```{}```\nExpires: {}\n<{}|Approve> · <{}|Deny>",
            n.actor_name, n.tool_name, n.args_summary, n.expires_at, n.approve_url, n.deny_url,
        );
        let result = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await;
        match result {
            Ok(r) if !r.status().is_success() => {
                tracing::warn!(status = %r.status(), approval_id = %n.approval_id, "slack notify rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, approval_id = %n.approval_id, "slack notify failed");
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "slack"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runestone control plane
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Posts the pending approval to the Runestone control plane, which owns
/// the reviewer UX from there.
pub struct RunestoneNotifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl RunestoneNotifier {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl Notifier for RunestoneNotifier {
    async fn notify_approval_requested(&self, n: &ApprovalNotification) {
        let payload = json!({
            "approvalId": n.approval_id,
            "tool": n.tool_name,
            "actor": { "name": n.actor_name, "role": n.actor_role },
            "argsSummary": n.args_summary,
            "expiresAt": n.expires_at,
            "approveUrl": n.approve_url,
            "denyUrl": n.deny_url,
        });
        let result = self
            .client
            .post(format!("{}/approvals", self.api_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await;
        match result {
            Ok(r) if !r.status().is_success() => {
                tracing::warn!(status = %r.status(), approval_id = %n.approval_id, "runestone notify rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, approval_id = %n.approval_id, "runestone notify failed");
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "runestone"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: NotifyProvider) -> NotifyConfig {
        NotifyConfig {
            provider,
            slack_webhook_url: Some("https://hooks.slack.example/T000/B000/x".into()),
            runestone_api_url: Some("https://runestone.example/api".into()),
            runestone_api_key: Some("rk-test".into()),
        }
    }

    #[test]
    fn factory_selects_the_configured_provider() {
        assert_eq!(create_notifier(&config(NotifyProvider::Local)).unwrap().name(), "local");
        assert_eq!(create_notifier(&config(NotifyProvider::Slack)).unwrap().name(), "slack");
        assert_eq!(
            create_notifier(&config(NotifyProvider::Runestone)).unwrap().name(),
            "runestone"
        );
    }

    #[test]
    fn slack_without_webhook_is_a_config_error() {
        let mut c = config(NotifyProvider::Slack);
        c.slack_webhook_url = None;
        assert!(create_notifier(&c).is_err());
    }

    #[test]
    fn runestone_without_key_is_a_config_error() {
        let mut c = config(NotifyProvider::Runestone);
        c.runestone_api_key = None;
        assert!(create_notifier(&c).is_err());
    }

    #[tokio::test]
    async fn local_notifier_never_fails() {
        let n = ApprovalNotification {
            approval_id: "a-1".into(),
            tool_name: "shell.exec".into(),
            actor_name: "pilot".into(),
            actor_role: "pilot".into(),
            args_summary: serde_json::json!({"command": "ls"}),
            expires_at: "2026-01-01T00:00:00.000Z".into(),
            approve_url: "http://127.0.0.1/approve/a-1".into(),
            deny_url: "http://127.0.0.1/deny/a-1".into(),
        };
        LocalNotifier.notify_approval_requested(&n).await;
    }
}
