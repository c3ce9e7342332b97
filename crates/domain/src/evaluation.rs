//! Policy decision types shared between the evaluator and the orchestrator.

use serde::{Deserialize, Serialize};

/// The three decisions the gateway can render for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Execute now.
    Allow,
    /// Park until a human consents.
    Approve,
    /// Refuse.
    Deny,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Decision::Allow => "allow",
            Decision::Approve => "approve",
            Decision::Deny => "deny",
        };
        f.write_str(s)
    }
}

/// The outcome of evaluating a request against the policy snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub decision: Decision,
    /// Machine-oriented short reason.
    pub reason: String,
    pub reason_code: String,
    /// Prose for the human reading the denial or approval request.
    pub human_explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Labels describing why the request is risky (`tainted_exec`,
    /// `pattern_match:<p>`, `capability_token`, ...).
    #[serde(default)]
    pub risk_flags: Vec<String>,
}

impl Evaluation {
    pub fn allow(reason_code: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            decision: Decision::Allow,
            human_explanation: reason.clone(),
            reason,
            reason_code: reason_code.to_string(),
            remediation: None,
            risk_flags: Vec::new(),
        }
    }

    pub fn approve(reason_code: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            decision: Decision::Approve,
            human_explanation: reason.clone(),
            reason,
            reason_code: reason_code.to_string(),
            remediation: None,
            risk_flags: Vec::new(),
        }
    }

    pub fn deny(reason_code: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            decision: Decision::Deny,
            human_explanation: reason.clone(),
            reason,
            reason_code: reason_code.to_string(),
            remediation: None,
            risk_flags: Vec::new(),
        }
    }

    pub fn with_explanation(mut self, human_explanation: impl Into<String>) -> Self {
        self.human_explanation = human_explanation.into();
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.risk_flags.extend(flags.into_iter().map(Into::into));
        self
    }
}
