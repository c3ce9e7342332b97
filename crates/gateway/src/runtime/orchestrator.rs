//! Request orchestrator — the linear pipeline from envelope to response.
//!
//! Every step either returns early with a finished response or hands a
//! narrower, already-validated request to the next step: envelope →
//! known tool → strict args → idempotency → evaluation → capability
//! upgrade → audit → dry-run / deny / approve / allow.  Expected
//! failures are structured outcomes; only genuinely unexpected errors
//! become a 500.

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use gk_approvals::{ApprovalAction, ConsumeError, NewApproval, PendingApproval};
use gk_audit::{summarize_args, AuditDecision, AuditEntry, ExecutionReceipt};
use gk_canonical::redact::redact_secrets;
use gk_domain::envelope::Envelope;
use gk_domain::evaluation::{Decision, Evaluation};
use gk_domain::{reason, Error, Result};
use gk_idempotency::{CreateOutcome, IdempotencyStatus};
use gk_notify::ApprovalNotification;
use gk_policy::PolicySnapshot;
use gk_tokens::VerifyRequest;
use gk_tools::ExecOutcome;

use crate::runtime::dispatch::{self, ToolKind};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A finished response: HTTP status plus JSON body.  Stored verbatim in
/// the idempotency record so retries replay it byte-identically.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: u16,
    pub body: Value,
}

impl Outcome {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool request pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Entry point for `POST /tool/:tool_name`.
pub async fn handle_tool_request(state: &AppState, tool_name: &str, payload: Value) -> Outcome {
    match process(state, tool_name, payload).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(tool = tool_name, error = %e, "unexpected error handling tool request");
            Outcome::new(
                500,
                json!({
                    "reasonCode": reason::INTERNAL,
                    "humanExplanation": "the gateway hit an unexpected internal error",
                    "policyVersion": state.policy.hash(),
                }),
            )
        }
    }
}

async fn process(state: &AppState, tool_name: &str, payload: Value) -> Result<Outcome> {
    // 1. Structurally validate the envelope.
    let mut envelope: Envelope = match serde_json::from_value(payload) {
        Ok(e) => e,
        Err(e) => {
            return Ok(Outcome::new(
                400,
                json!({
                    "reasonCode": reason::INVALID_ENVELOPE,
                    "humanExplanation": format!("invalid request envelope: {e}"),
                    "remediation": "fix the envelope fields and retry with a fresh requestId",
                    "policyVersion": state.policy.hash(),
                }),
            ));
        }
    };
    if envelope.actor.role.is_none() {
        envelope.actor.role = state.config.server.default_role.clone();
    }

    // 2. Known tool + strict argument schema.
    let Some(kind) = ToolKind::from_name(tool_name) else {
        return Ok(Outcome::new(
            404,
            json!({
                "requestId": envelope.request_id,
                "reasonCode": reason::UNKNOWN_TOOL,
                "humanExplanation": format!("unknown tool '{tool_name}'"),
                "policyVersion": state.policy.hash(),
            }),
        ));
    };
    let parsed_args = match dispatch::parse_args(kind, &envelope.args) {
        Ok(a) => a,
        Err(e) => {
            return Ok(Outcome::new(
                403,
                json!({
                    "requestId": envelope.request_id,
                    "reasonCode": reason::INVALID_ARGS,
                    "humanExplanation": e,
                    "remediation": "send only the fields the tool's schema defines",
                    "policyVersion": state.policy.hash(),
                }),
            ));
        }
    };

    // 3. Hashes and keys.
    let args_hash =
        gk_canonical::sha256_hex(&gk_canonical::canonicalize(&Value::Object(envelope.args.clone())));
    let idempotency_key = envelope.effective_idempotency_key();

    // 4. Idempotency protocol.
    if let Some(outcome) =
        check_existing_record(state, &idempotency_key, tool_name, &args_hash, &envelope)?
    {
        return Ok(outcome);
    }

    // 5. Claim the key.  Losing the exclusive-create race means a
    // concurrent duplicate got there first.
    match state.idempotency.create_pending(
        &idempotency_key,
        envelope.request_id,
        tool_name,
        &args_hash,
    )? {
        CreateOutcome::Created => {}
        CreateOutcome::AlreadyExists => {
            if let Some(outcome) =
                check_existing_record(state, &idempotency_key, tool_name, &args_hash, &envelope)?
            {
                return Ok(outcome);
            }
            return Ok(in_progress_outcome(&envelope, &idempotency_key, state));
        }
    }

    // 6. Evaluate on a captured snapshot.
    let snapshot = state.policy.snapshot();
    let mut eval = gk_policy::evaluate(tool_name, &envelope.args, &snapshot, Some(&envelope));

    // 7. Capability token: a valid token upgrades APPROVE to ALLOW; an
    // invalid one is recorded but does not by itself deny.
    if let Some(token) = envelope.capability_token.clone() {
        let verification = gk_tokens::verify(
            &VerifyRequest {
                token: &token,
                tool_name,
                args_hash: &args_hash,
                actor_role: Some(envelope.actor.effective_role()),
                actor_name: Some(&envelope.actor.name),
            },
            &state.config.server.secret,
            Utc::now(),
        );
        if verification.valid {
            if eval.decision == Decision::Approve {
                let mut flags = eval.risk_flags.clone();
                flags.push("capability_token".to_string());
                eval = Evaluation::allow(
                    reason::CAPABILITY_TOKEN_ALLOW,
                    "pre-authorized by a capability token for this exact argument set",
                )
                .with_flags(flags);
            }
        } else {
            eval.risk_flags
                .push(format!("capability_token_invalid:{}", verification.reason_code));
        }
    }

    // 8. Request audit entry.
    state.audit.write(request_entry(&envelope, tool_name, &args_hash, &eval, &snapshot));

    // 9. Dry run stops after evaluation.
    if envelope.dry_run {
        let mut body = base_body(&envelope, &eval, &snapshot, &idempotency_key);
        body.insert("dryRun".to_string(), json!(true));
        let body = Value::Object(body);
        complete_record(state, &idempotency_key, 200, &body);
        return Ok(Outcome::new(200, body));
    }

    // 10. Branch on the decision.
    let outcome = match eval.decision {
        Decision::Deny => {
            let mut body = base_body(&envelope, &eval, &snapshot, &idempotency_key);
            let mut denial = Map::new();
            denial.insert("reasonCode".to_string(), json!(eval.reason_code));
            denial.insert("humanExplanation".to_string(), json!(eval.human_explanation));
            if let Some(r) = &eval.remediation {
                denial.insert("remediation".to_string(), json!(r));
            }
            body.insert("denial".to_string(), Value::Object(denial));
            Outcome::new(403, Value::Object(body))
        }
        Decision::Approve => {
            let created = state.approvals.create(NewApproval {
                tool_name: tool_name.to_string(),
                args: envelope.args.clone(),
                actor: envelope.actor.clone(),
                context: envelope.context.clone(),
                request_id: envelope.request_id,
                idempotency_key: envelope.idempotency_key.clone(),
            })?;
            spawn_notification(state, &created.approval, &created.approve_url, &created.deny_url);

            let mut body = base_body(&envelope, &eval, &snapshot, &idempotency_key);
            body.insert("approvalId".to_string(), json!(created.approval.id));
            body.insert("expiresAt".to_string(), json!(created.approval.expiry_param()));
            body.insert(
                "approvalRequest".to_string(),
                json!({
                    "toolName": tool_name,
                    "argsSummary": summarize_args(&envelope.args),
                    "actor": envelope.actor,
                    "riskFlags": eval.risk_flags,
                }),
            );
            if state.config.server.demo_mode {
                body.insert("approveUrl".to_string(), json!(created.approve_url));
                body.insert("denyUrl".to_string(), json!(created.deny_url));
            }
            Outcome::new(202, Value::Object(body))
        }
        Decision::Allow => {
            let tool_policy = snapshot
                .policy
                .tools
                .get(tool_name)
                .ok_or_else(|| Error::Policy(format!("tool '{tool_name}' vanished from policy")))?;

            let started_at = Utc::now();
            let exec = dispatch::execute(state, &parsed_args, tool_policy).await;
            let receipt = ExecutionReceipt::new(started_at, Utc::now());

            state.audit.write(execution_entry(
                &envelope, tool_name, &args_hash, &exec, &receipt, &snapshot,
            ));

            let mut body = base_body(&envelope, &eval, &snapshot, &idempotency_key);
            body.insert("success".to_string(), json!(exec.success));
            body.insert("result".to_string(), exec.output.clone().unwrap_or(Value::Null));
            if let Some(error) = &exec.error {
                body.insert("error".to_string(), json!(error));
            }
            body.insert("executionReceipt".to_string(), json!(receipt));
            Outcome::new(200, Value::Object(body))
        }
    };

    // 11. Record the outgoing response for replay.
    complete_record(state, &idempotency_key, outcome.status, &outcome.body);
    Ok(outcome)
}

/// Apply the stored-record protocol: conflict, replay, or in-progress.
fn check_existing_record(
    state: &AppState,
    key: &str,
    tool_name: &str,
    args_hash: &str,
    envelope: &Envelope,
) -> Result<Option<Outcome>> {
    let Some(record) = state.idempotency.get(key)? else {
        return Ok(None);
    };

    if record.tool_name != tool_name || record.args_hash != args_hash {
        return Ok(Some(Outcome::new(
            409,
            json!({
                "requestId": envelope.request_id,
                "reasonCode": reason::IDEMPOTENCY_KEY_CONFLICT,
                "humanExplanation": format!(
                    "idempotency key '{key}' was already used for a different request"
                ),
                "remediation": "use a fresh idempotency key for new work",
                "policyVersion": state.policy.hash(),
                "idempotencyKey": key,
            }),
        )));
    }

    match record.status {
        IdempotencyStatus::Completed => {
            let response = record.response.ok_or_else(|| {
                Error::Idempotency(format!("completed record '{key}' has no stored response"))
            })?;
            Ok(Some(Outcome::new(response.status_code, response.body)))
        }
        IdempotencyStatus::Pending => Ok(Some(in_progress_outcome(envelope, key, state))),
    }
}

fn in_progress_outcome(envelope: &Envelope, key: &str, state: &AppState) -> Outcome {
    Outcome::new(
        409,
        json!({
            "requestId": envelope.request_id,
            "reasonCode": reason::IDEMPOTENCY_IN_PROGRESS,
            "humanExplanation": format!("a request with idempotency key '{key}' is still in flight"),
            "remediation": "retry after the original request settles",
            "policyVersion": state.policy.hash(),
            "idempotencyKey": key,
        }),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval callback pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Entry point for `GET /{approve|deny}/:id`.
pub async fn handle_callback(
    state: &AppState,
    action: ApprovalAction,
    id: Uuid,
    sig: &str,
    exp: &str,
) -> Outcome {
    let approval = match state.approvals.verify_and_consume(id, action, sig, exp) {
        Ok(a) => a,
        Err(e) => return consume_error_outcome(&e),
    };

    match action {
        ApprovalAction::Deny => {
            state.audit.write(consumed_entry(&approval, "denied", None, None));
            Outcome::new(
                200,
                json!({
                    "status": "denied",
                    "approvalId": approval.id,
                    "tool": approval.tool_name,
                }),
            )
        }
        ApprovalAction::Approve => execute_approved(state, approval).await,
    }
}

/// Execute the frozen argument set of a just-approved request.
async fn execute_approved(state: &AppState, approval: PendingApproval) -> Outcome {
    let snapshot = state.policy.snapshot();

    let Some(kind) = ToolKind::from_name(&approval.tool_name) else {
        return Outcome::new(500, json!({ "error": "approved tool is no longer executable" }));
    };
    let parsed = match dispatch::parse_args(kind, &approval.args) {
        Ok(p) => p,
        Err(e) => return Outcome::new(500, json!({ "error": e })),
    };
    let Some(tool_policy) = snapshot.policy.tools.get(&approval.tool_name) else {
        return Outcome::new(
            500,
            json!({ "error": "approved tool has no policy in the current snapshot" }),
        );
    };

    let started_at = Utc::now();
    let exec = dispatch::execute(state, &parsed, tool_policy).await;
    let receipt = ExecutionReceipt::new(started_at, Utc::now());

    let args_hash = gk_canonical::sha256_hex(&approval.canonical_args);
    let mut exec_entry = AuditEntry::new(
        approval.request_id,
        approval.tool_name.clone(),
        AuditDecision::Executed,
        approval.actor.clone(),
        summarize_args(&approval.args),
        args_hash,
    );
    exec_entry.result_summary = exec.output.as_ref().map(|o| redact_secrets(o, 200));
    exec_entry.execution_receipt = Some(receipt.clone());
    exec_entry.approval_id = Some(approval.id);
    exec_entry.policy_hash = snapshot.hash.clone();
    state.audit.write(exec_entry);

    state.audit.write(consumed_entry(
        &approval,
        "approved",
        exec.output.as_ref().map(|o| redact_secrets(o, 200)),
        Some(snapshot.hash.clone()),
    ));

    let mut body = Map::new();
    body.insert("status".to_string(), json!("approved"));
    body.insert("approvalId".to_string(), json!(approval.id));
    body.insert("tool".to_string(), json!(approval.tool_name));
    body.insert("success".to_string(), json!(exec.success));
    body.insert("result".to_string(), exec.output.clone().unwrap_or(Value::Null));
    if let Some(error) = &exec.error {
        body.insert("error".to_string(), json!(error));
    }
    body.insert("executionReceipt".to_string(), json!(receipt));
    Outcome::new(200, Value::Object(body))
}

fn consume_error_outcome(error: &ConsumeError) -> Outcome {
    let status = match error {
        ConsumeError::NotFound => 404,
        ConsumeError::Expired => 410,
        ConsumeError::AlreadyResolved(_) => 409,
        ConsumeError::BadSignature | ConsumeError::ExpiryMismatch => 403,
        ConsumeError::Storage(_) => 500,
    };
    Outcome::new(status, json!({ "error": error.to_string() }))
}

/// Audit an expired-by-sweep approval.  Shared with the background
/// sweeper, which denies on the operator's behalf.
pub fn audit_swept_approval(state: &AppState, approval: &PendingApproval) {
    let mut entry = consumed_entry(approval, "denied", None, None);
    entry.reason_code = Some(reason::APPROVAL_EXPIRED.to_string());
    entry.human_explanation = Some("approval expired before a human responded".to_string());
    state.audit.write(entry);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Body and audit-entry builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The normative response fields every decision shares.
fn base_body(
    envelope: &Envelope,
    eval: &Evaluation,
    snapshot: &PolicySnapshot,
    idempotency_key: &str,
) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("decision".to_string(), json!(eval.decision));
    body.insert("requestId".to_string(), json!(envelope.request_id));
    body.insert("reasonCode".to_string(), json!(eval.reason_code));
    body.insert("humanExplanation".to_string(), json!(eval.human_explanation));
    if let Some(r) = &eval.remediation {
        body.insert("remediation".to_string(), json!(r));
    }
    body.insert("riskFlags".to_string(), json!(eval.risk_flags));
    body.insert("policyVersion".to_string(), json!(snapshot.hash));
    body.insert("idempotencyKey".to_string(), json!(idempotency_key));
    body
}

fn request_entry(
    envelope: &Envelope,
    tool_name: &str,
    args_hash: &str,
    eval: &Evaluation,
    snapshot: &PolicySnapshot,
) -> AuditEntry {
    let decision = match eval.decision {
        Decision::Allow => AuditDecision::Allow,
        Decision::Approve => AuditDecision::Approve,
        Decision::Deny => AuditDecision::Deny,
    };
    let mut entry = AuditEntry::new(
        envelope.request_id,
        tool_name,
        decision,
        envelope.actor.clone(),
        summarize_args(&envelope.args),
        args_hash,
    );
    entry.risk_flags = eval.risk_flags.clone();
    entry.reason_code = Some(eval.reason_code.clone());
    entry.human_explanation = Some(eval.human_explanation.clone());
    entry.remediation = eval.remediation.clone();
    entry.policy_hash = snapshot.hash.clone();
    entry.origin = envelope.origin;
    entry.taint = envelope.taint.clone();
    entry.context_refs = envelope.context_refs.clone();
    entry
}

fn execution_entry(
    envelope: &Envelope,
    tool_name: &str,
    args_hash: &str,
    exec: &ExecOutcome,
    receipt: &ExecutionReceipt,
    snapshot: &PolicySnapshot,
) -> AuditEntry {
    let mut entry = AuditEntry::new(
        envelope.request_id,
        tool_name,
        AuditDecision::Executed,
        envelope.actor.clone(),
        summarize_args(&envelope.args),
        args_hash,
    );
    entry.result_summary = exec.output.as_ref().map(|o| redact_secrets(o, 200));
    entry.execution_receipt = Some(receipt.clone());
    entry.policy_hash = snapshot.hash.clone();
    entry.origin = envelope.origin;
    entry.taint = envelope.taint.clone();
    entry
}

fn consumed_entry(
    approval: &PendingApproval,
    action: &str,
    result_summary: Option<Value>,
    policy_hash: Option<String>,
) -> AuditEntry {
    let mut entry = AuditEntry::new(
        approval.request_id,
        approval.tool_name.clone(),
        AuditDecision::ApprovalConsumed,
        approval.actor.clone(),
        summarize_args(&approval.args),
        gk_canonical::sha256_hex(&approval.canonical_args),
    );
    entry.approval_id = Some(approval.id);
    entry.action = Some(action.to_string());
    entry.result_summary = result_summary;
    if let Some(hash) = policy_hash {
        entry.policy_hash = hash;
    }
    entry
}

fn spawn_notification(
    state: &AppState,
    approval: &PendingApproval,
    approve_url: &str,
    deny_url: &str,
) {
    let notification = ApprovalNotification {
        approval_id: approval.id.to_string(),
        tool_name: approval.tool_name.clone(),
        actor_name: approval.actor.name.clone(),
        actor_role: approval.actor.effective_role().to_string(),
        args_summary: summarize_args(&approval.args),
        expires_at: approval.expiry_param(),
        approve_url: approve_url.to_string(),
        deny_url: deny_url.to_string(),
    };
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        notifier.notify_approval_requested(&notification).await;
    });
}

fn complete_record(state: &AppState, key: &str, status: u16, body: &Value) {
    if let Err(e) = state.idempotency.complete(key, status, body.clone()) {
        tracing::warn!(key, error = %e, "failed to complete idempotency record");
    }
}
