//! Durable idempotency records — at-most-once semantics for retried
//! requests.
//!
//! One record per key, stored as `{sha256(key)}.json` (hashing keeps
//! arbitrary client keys filesystem-safe).  Creation uses an exclusive
//! create so two concurrent first attempts with the same key linearize:
//! exactly one wins, the other observes the pending record.  Completed
//! records replay their stored response verbatim.
//!
//! Records are never evicted here; cleaning up stale `pending` records
//! left by a crash is an operational task.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use gk_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
}

/// The response captured for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResponse {
    pub status_code: u16,
    pub body: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_id: Uuid,
    pub tool_name: String,
    pub args_hash: String,
    pub status: IdempotencyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<StoredResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of `create_pending`.
#[derive(Debug)]
pub enum CreateOutcome {
    Created,
    /// Someone else holds the key — the caller re-reads and applies the
    /// conflict/replay/in-progress protocol.
    AlreadyExists,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct IdempotencyStore {
    dir: PathBuf,
}

impl IdempotencyStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Create a pending record if — and only if — the key is unclaimed.
    /// `create_new` maps to O_CREAT|O_EXCL, so concurrent duplicates
    /// cannot both win.
    pub fn create_pending(
        &self,
        key: &str,
        request_id: Uuid,
        tool_name: &str,
        args_hash: &str,
    ) -> Result<CreateOutcome> {
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: key.to_string(),
            request_id,
            tool_name: tool_name.to_string(),
            args_hash: args_hash.to_string(),
            status: IdempotencyStatus::Pending,
            response: None,
            created_at: now,
            updated_at: now,
        };

        let path = self.path_for(key);
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Ok(CreateOutcome::AlreadyExists);
            }
            Err(e) => return Err(Error::Io(e)),
        };
        file.write_all(&serde_json::to_vec_pretty(&record)?)?;
        Ok(CreateOutcome::Created)
    }

    /// Record the outgoing response so a retry replays it byte-identically.
    pub fn complete(&self, key: &str, status_code: u16, body: Value) -> Result<()> {
        let mut record = self.get(key)?.ok_or_else(|| {
            Error::Idempotency(format!("cannot complete unknown key '{key}'"))
        })?;
        record.status = IdempotencyStatus::Completed;
        record.response = Some(StoredResponse { status_code, body });
        record.updated_at = Utc::now();

        // Atomic replace: tmp sibling, then rename.
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", gk_canonical::sha256_hex(key)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
