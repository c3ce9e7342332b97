use std::path::PathBuf;

use super::{env_string, env_u64};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `DATA_DIR` — root for the durable state subdirectories.
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub dir: PathBuf,
    /// Approval lifetime before it expires (seconds).
    pub approval_ttl_secs: u64,
    /// How often the expiry sweeper runs (seconds).
    pub sweep_interval_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            approval_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl DataConfig {
    pub fn from_env() -> Self {
        Self {
            dir: PathBuf::from(env_string("DATA_DIR").unwrap_or_else(|| "./data".into())),
            approval_ttl_secs: env_u64("APPROVAL_TTL_SECS", 3600),
            sweep_interval_secs: env_u64("APPROVAL_SWEEP_INTERVAL_SECS", 300),
        }
    }

    pub fn approvals_dir(&self) -> PathBuf {
        self.dir.join("approvals")
    }

    pub fn idempotency_dir(&self) -> PathBuf {
        self.dir.join("idempotency")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.dir.join("audit")
    }
}
