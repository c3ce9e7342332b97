use std::sync::Arc;
use std::time::Instant;

use gk_approvals::ApprovalStore;
use gk_audit::AuditSink;
use gk_domain::config::Config;
use gk_idempotency::IdempotencyStore;
use gk_notify::Notifier;
use gk_policy::PolicyStore;
use gk_tools::HttpExecutor;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Config** — environment configuration, read once at startup
/// - **Policy** — hot-reloadable snapshot store
/// - **Durable stores** — approvals, idempotency
/// - **Side effects** — audit sink, notifier, outbound HTTP client
#[derive(Clone)]
pub struct AppState {
    // ── Config ────────────────────────────────────────────────────────
    pub config: Arc<Config>,

    // ── Policy ────────────────────────────────────────────────────────
    pub policy: Arc<PolicyStore>,

    // ── Durable stores ────────────────────────────────────────────────
    pub approvals: Arc<ApprovalStore>,
    pub idempotency: Arc<IdempotencyStore>,

    // ── Side effects ──────────────────────────────────────────────────
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
    /// Shared outbound client for the http.request executor.
    pub http_executor: Arc<HttpExecutor>,

    /// For `/health` uptime reporting.
    pub started_at: Instant,
}
