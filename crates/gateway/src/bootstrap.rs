//! AppState construction and background-task spawning.
//!
//! `serve` and the integration tests share this boot path so both run the
//! same fully-wired runtime.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use gk_approvals::ApprovalStore;
use gk_audit::FileAuditSink;
use gk_domain::config::{Config, ConfigSeverity};
use gk_idempotency::IdempotencyStore;
use gk_domain::config::PolicySourceKind;
use gk_policy::{FilePolicySource, PolicySource, PolicyStore};
use gk_tools::HttpExecutor;

use crate::runtime::sweeper::spawn_approval_sweeper;
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Policy store ─────────────────────────────────────────────────
    let source: Box<dyn PolicySource> = match config.policy.source {
        PolicySourceKind::File => Box::new(FilePolicySource::new(&config.policy.path)),
    };
    let policy = Arc::new(PolicyStore::load(source).context("loading policy")?);

    // ── Durable stores ───────────────────────────────────────────────
    let approvals = Arc::new(
        ApprovalStore::new(
            config.data.approvals_dir(),
            config.server.base_url.clone(),
            config.server.secret.clone(),
            config.data.approval_ttl_secs,
        )
        .context("initializing approval store")?,
    );
    let idempotency = Arc::new(
        IdempotencyStore::new(config.data.idempotency_dir())
            .context("initializing idempotency store")?,
    );

    // ── Audit sink ───────────────────────────────────────────────────
    let audit_policy = Arc::clone(&policy);
    let audit = Arc::new(FileAuditSink::new(
        config.data.audit_dir(),
        env!("CARGO_PKG_VERSION"),
        Box::new(move || audit_policy.hash()),
    ));
    tracing::info!(dir = %config.data.audit_dir().display(), "audit sink ready");

    // ── Notifier ─────────────────────────────────────────────────────
    let notifier: Arc<dyn gk_notify::Notifier> =
        gk_notify::create_notifier(&config.notify)
            .context("initializing notifier")?
            .into();
    tracing::info!(provider = notifier.name(), "notifier ready");

    // ── Outbound HTTP client ─────────────────────────────────────────
    let http_executor = Arc::new(HttpExecutor::new().context("building http executor")?);

    Ok(AppState {
        config,
        policy,
        approvals,
        idempotency,
        audit,
        notifier,
        http_executor,
        started_at: Instant::now(),
    })
}

/// Spawn the recurring background work: policy hot reload and the
/// approval expiry sweeper.
pub fn spawn_background_tasks(state: &AppState) {
    state
        .policy
        .spawn_reload_task(state.config.policy.reload_interval_secs);
    spawn_approval_sweeper(state.clone());
}
