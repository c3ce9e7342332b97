//! `GET /health` — liveness plus the identifiers an operator needs to
//! know which policy and providers this instance is running.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "policyHash": state.policy.hash(),
        "uptime": state.started_at.elapsed().as_secs(),
        "pendingApprovals": state.approvals.pending_count(),
        "demoMode": state.config.server.demo_mode,
        "providers": {
            "approval": state.notifier.name(),
            "policy": state.policy.describe_source(),
        },
    }))
}
