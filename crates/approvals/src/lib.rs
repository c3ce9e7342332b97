//! Durable single-use approvals.
//!
//! Every pending approval is one `{uuid}.json` file under the approvals
//! directory, mirrored in an in-memory cache.  The approve/deny callback
//! URLs are HMAC-signed over the approval's identity and frozen argument
//! set, so a callback can only ever resolve the exact request a human was
//! shown.  State moves from `pending` to exactly one terminal status
//! (`approved`, `denied`, `expired`); the transition is serialized so two
//! concurrent callbacks resolve with one success and one "already ...".

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use gk_canonical::hmac_sha256_hex;
use gk_domain::envelope::Actor;
use gk_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Which callback was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAction {
    Approve,
    Deny,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Deny => "deny",
        }
    }

    fn terminal_status(&self) -> ApprovalStatus {
        match self {
            ApprovalAction::Approve => ApprovalStatus::Approved,
            ApprovalAction::Deny => ApprovalStatus::Denied,
        }
    }
}

/// One parked request awaiting a human.  The argument set is frozen at
/// creation; execution after approval uses exactly these args.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub id: Uuid,
    pub status: ApprovalStatus,
    pub tool_name: String,
    pub args: Map<String, Value>,
    pub canonical_args: String,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub request_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingApproval {
    /// The exact string the `exp` query parameter must carry.
    pub fn expiry_param(&self) -> String {
        self.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Inputs for creating an approval.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub tool_name: String,
    pub args: Map<String, Value>,
    pub actor: Actor,
    pub context: Option<Value>,
    pub request_id: Uuid,
    pub idempotency_key: Option<String>,
}

/// A created approval plus its signed callback URLs.
#[derive(Debug, Clone)]
pub struct CreatedApproval {
    pub approval: PendingApproval,
    pub approve_url: String,
    pub deny_url: String,
}

/// Why a callback was rejected.  Maps onto HTTP status codes upstream.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsumeError {
    #[error("Approval not found")]
    NotFound,
    #[error("Approval has expired")]
    Expired,
    #[error("Approval already {0}")]
    AlreadyResolved(ApprovalStatus),
    #[error("Invalid signature")]
    BadSignature,
    #[error("Expiry mismatch")]
    ExpiryMismatch,
    #[error("storage: {0}")]
    Storage(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ApprovalStore {
    dir: PathBuf,
    base_url: String,
    secret: String,
    ttl: Duration,
    cache: RwLock<HashMap<Uuid, PendingApproval>>,
    /// Serializes every pending→terminal transition.
    consume_lock: Mutex<()>,
}

impl ApprovalStore {
    /// Open (or create) the approvals directory and re-read any approvals
    /// left on disk by a previous process.
    pub fn new(
        dir: PathBuf,
        base_url: impl Into<String>,
        secret: impl Into<String>,
        ttl_secs: u64,
    ) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;

        let mut cache = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|raw| serde_json::from_str::<PendingApproval>(&raw).map_err(Error::Json))
            {
                Ok(approval) => {
                    cache.insert(approval.id, approval);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable approval file");
                }
            }
        }
        tracing::info!(
            approvals = cache.len(),
            dir = %dir.display(),
            "approval store loaded"
        );

        Ok(Self {
            dir,
            base_url: base_url.into(),
            secret: secret.into(),
            ttl: Duration::seconds(ttl_secs as i64),
            cache: RwLock::new(cache),
            consume_lock: Mutex::new(()),
        })
    }

    /// Create a pending approval.  The file hits disk before the signed
    /// URLs are handed out.
    pub fn create(&self, new: NewApproval) -> Result<CreatedApproval> {
        let now = Utc::now();
        let approval = PendingApproval {
            id: Uuid::new_v4(),
            status: ApprovalStatus::Pending,
            canonical_args: gk_canonical::canonicalize(&Value::Object(new.args.clone())),
            tool_name: new.tool_name,
            args: new.args,
            actor: new.actor,
            context: new.context,
            request_id: new.request_id,
            idempotency_key: new.idempotency_key,
            created_at: now,
            expires_at: now + self.ttl,
        };

        self.persist(&approval)?;
        self.cache.write().insert(approval.id, approval.clone());

        let approve_url = self.callback_url(&approval, ApprovalAction::Approve);
        let deny_url = self.callback_url(&approval, ApprovalAction::Deny);
        Ok(CreatedApproval {
            approval,
            approve_url,
            deny_url,
        })
    }

    /// Consume a callback.  Succeeds at most once per approval.
    pub fn verify_and_consume(
        &self,
        id: Uuid,
        action: ApprovalAction,
        sig: &str,
        exp: &str,
    ) -> std::result::Result<PendingApproval, ConsumeError> {
        let _guard = self.consume_lock.lock();

        let mut approval = self
            .lookup(id)
            .ok_or(ConsumeError::NotFound)?;

        if Utc::now() > approval.expires_at {
            approval.status = ApprovalStatus::Expired;
            self.persist_and_cache(&approval)
                .map_err(|e| ConsumeError::Storage(e.to_string()))?;
            return Err(ConsumeError::Expired);
        }

        if approval.status != ApprovalStatus::Pending {
            return Err(ConsumeError::AlreadyResolved(approval.status));
        }

        let expected = self.signature(&approval, action);
        if expected.as_bytes().ct_eq(sig.as_bytes()).unwrap_u8() != 1 {
            return Err(ConsumeError::BadSignature);
        }

        if exp != approval.expiry_param() {
            return Err(ConsumeError::ExpiryMismatch);
        }

        approval.status = action.terminal_status();
        self.persist_and_cache(&approval)
            .map_err(|e| ConsumeError::Storage(e.to_string()))?;
        Ok(approval)
    }

    /// Expire every overdue pending approval; returns the swept approvals
    /// so the caller can audit them.
    pub fn sweep_expired(&self) -> Vec<PendingApproval> {
        let _guard = self.consume_lock.lock();
        let now = Utc::now();

        let overdue: Vec<PendingApproval> = self
            .cache
            .read()
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending && now > a.expires_at)
            .cloned()
            .collect();

        let mut swept = Vec::with_capacity(overdue.len());
        for mut approval in overdue {
            approval.status = ApprovalStatus::Expired;
            if let Err(e) = self.persist_and_cache(&approval) {
                tracing::warn!(id = %approval.id, error = %e, "failed to persist expired approval");
                continue;
            }
            swept.push(approval);
        }
        swept
    }

    pub fn get(&self, id: Uuid) -> Option<PendingApproval> {
        self.lookup(id)
    }

    pub fn pending_count(&self) -> usize {
        self.cache
            .read()
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .count()
    }

    pub fn list_pending(&self) -> Vec<PendingApproval> {
        let mut pending: Vec<PendingApproval> = self
            .cache
            .read()
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.created_at);
        pending
    }

    // ── internals ───────────────────────────────────────────────────

    fn lookup(&self, id: Uuid) -> Option<PendingApproval> {
        if let Some(approval) = self.cache.read().get(&id) {
            return Some(approval.clone());
        }
        // Cache miss — another process (or a restart) may have written it.
        let path = self.path_for(id);
        let raw = std::fs::read_to_string(path).ok()?;
        let approval: PendingApproval = serde_json::from_str(&raw).ok()?;
        self.cache.write().insert(approval.id, approval.clone());
        Some(approval)
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomic write: tmp sibling, then rename into place.
    fn persist(&self, approval: &PendingApproval) -> Result<()> {
        let path = self.path_for(approval.id);
        let tmp = self.dir.join(format!(".{}.tmp", approval.id));
        std::fs::write(&tmp, serde_json::to_vec_pretty(approval)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn persist_and_cache(&self, approval: &PendingApproval) -> Result<()> {
        self.persist(approval)?;
        self.cache.write().insert(approval.id, approval.clone());
        Ok(())
    }

    /// Signature over the approval's identity, frozen args, and expiry.
    fn signature(&self, approval: &PendingApproval, action: ApprovalAction) -> String {
        let payload = format!(
            "{}:{}:{}:{}:{}",
            approval.tool_name,
            approval.canonical_args,
            approval.request_id,
            approval.expiry_param(),
            action.as_str(),
        );
        hmac_sha256_hex(&payload, self.secret.as_bytes())
    }

    fn callback_url(&self, approval: &PendingApproval, action: ApprovalAction) -> String {
        format!(
            "{}/{}/{}?sig={}&exp={}",
            self.base_url,
            action.as_str(),
            approval.id,
            self.signature(approval, action),
            approval.expiry_param(),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use gk_domain::envelope::ActorKind;
    use tempfile::TempDir;

    const SECRET: &str = "a-test-secret-that-is-long-enough!!";
    const BASE: &str = "http://127.0.0.1:8787";

    fn store(dir: &TempDir, ttl_secs: u64) -> ApprovalStore {
        ApprovalStore::new(dir.path().to_path_buf(), BASE, SECRET, ttl_secs).unwrap()
    }

    fn new_approval() -> NewApproval {
        let args: Map<String, Value> = serde_json::json!({"command": "ls -la"})
            .as_object()
            .unwrap()
            .clone();
        NewApproval {
            tool_name: "shell.exec".into(),
            args,
            actor: Actor {
                kind: ActorKind::Agent,
                name: "pilot".into(),
                role: None,
                run_id: None,
            },
            context: None,
            request_id: Uuid::new_v4(),
            idempotency_key: None,
        }
    }

    /// Pull `sig` / `exp` back out of a callback URL.
    fn query_params(url: &str) -> (String, String) {
        let query = url.split_once('?').unwrap().1;
        let mut sig = String::new();
        let mut exp = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "sig" => sig = v.to_string(),
                "exp" => exp = v.to_string(),
                _ => {}
            }
        }
        (sig, exp)
    }

    #[test]
    fn create_persists_before_returning() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3600);
        let created = store.create(new_approval()).unwrap();
        assert!(dir
            .path()
            .join(format!("{}.json", created.approval.id))
            .exists());
        assert_eq!(created.approval.status, ApprovalStatus::Pending);
        assert!(created.approve_url.contains("/approve/"));
        assert!(created.deny_url.contains("/deny/"));
    }

    #[test]
    fn consume_succeeds_exactly_once() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3600);
        let created = store.create(new_approval()).unwrap();
        let (sig, exp) = query_params(&created.approve_url);

        let approved = store
            .verify_and_consume(created.approval.id, ApprovalAction::Approve, &sig, &exp)
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);

        let err = store
            .verify_and_consume(created.approval.id, ApprovalAction::Approve, &sig, &exp)
            .unwrap_err();
        assert_eq!(err, ConsumeError::AlreadyResolved(ApprovalStatus::Approved));
        assert_eq!(err.to_string(), "Approval already approved");
    }

    #[test]
    fn deny_url_cannot_approve() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3600);
        let created = store.create(new_approval()).unwrap();
        let (deny_sig, exp) = query_params(&created.deny_url);

        // A deny signature presented on the approve action must fail.
        let err = store
            .verify_and_consume(created.approval.id, ApprovalAction::Approve, &deny_sig, &exp)
            .unwrap_err();
        assert_eq!(err, ConsumeError::BadSignature);

        // And still work for its own action.
        let denied = store
            .verify_and_consume(created.approval.id, ApprovalAction::Deny, &deny_sig, &exp)
            .unwrap();
        assert_eq!(denied.status, ApprovalStatus::Denied);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3600);
        let created = store.create(new_approval()).unwrap();
        let (_, exp) = query_params(&created.approve_url);

        let err = store
            .verify_and_consume(created.approval.id, ApprovalAction::Approve, "deadbeef", &exp)
            .unwrap_err();
        assert_eq!(err, ConsumeError::BadSignature);
        // Still pending — a bad signature must not consume.
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn expiry_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3600);
        let created = store.create(new_approval()).unwrap();
        let (sig, _) = query_params(&created.approve_url);

        let err = store
            .verify_and_consume(
                created.approval.id,
                ApprovalAction::Approve,
                &sig,
                "2099-01-01T00:00:00.000Z",
            )
            .unwrap_err();
        assert_eq!(err, ConsumeError::ExpiryMismatch);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3600);
        let err = store
            .verify_and_consume(Uuid::new_v4(), ApprovalAction::Approve, "x", "y")
            .unwrap_err();
        assert_eq!(err, ConsumeError::NotFound);
    }

    #[test]
    fn expired_approval_is_marked_and_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 0);
        let created = store.create(new_approval()).unwrap();
        let (sig, exp) = query_params(&created.approve_url);
        std::thread::sleep(std::time::Duration::from_millis(20));

        let err = store
            .verify_and_consume(created.approval.id, ApprovalAction::Approve, &sig, &exp)
            .unwrap_err();
        assert_eq!(err, ConsumeError::Expired);
        assert_eq!(
            store.get(created.approval.id).unwrap().status,
            ApprovalStatus::Expired
        );
    }

    #[test]
    fn sweep_collects_overdue_pending() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 0);
        store.create(new_approval()).unwrap();
        store.create(new_approval()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let swept = store.sweep_expired();
        assert_eq!(swept.len(), 2);
        assert!(swept.iter().all(|a| a.status == ApprovalStatus::Expired));
        assert_eq!(store.pending_count(), 0);
        // A second sweep finds nothing.
        assert!(store.sweep_expired().is_empty());
    }

    #[test]
    fn restart_recovers_from_disk() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = store(&dir, 3600);
            store.create(new_approval()).unwrap().approval.id
        };

        let reopened = store(&dir, 3600);
        assert_eq!(reopened.pending_count(), 1);
        assert_eq!(reopened.get(id).unwrap().status, ApprovalStatus::Pending);
    }

    #[test]
    fn pending_listing_is_ordered_and_filtered() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3600);
        let first = store.create(new_approval()).unwrap();
        let second = store.create(new_approval()).unwrap();

        let (sig, exp) = query_params(&first.approve_url);
        store
            .verify_and_consume(first.approval.id, ApprovalAction::Approve, &sig, &exp)
            .unwrap();

        let pending = store.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.approval.id);
    }
}
