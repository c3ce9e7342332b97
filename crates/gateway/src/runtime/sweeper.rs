//! Background expiry sweep for pending approvals.

use std::time::Duration;

use crate::runtime::orchestrator::audit_swept_approval;
use crate::state::AppState;

/// Periodically expire overdue approvals and audit each one as a denied
/// consumption.  Interval comes from `APPROVAL_SWEEP_INTERVAL_SECS`
/// (default five minutes); `0` disables the sweeper.
pub fn spawn_approval_sweeper(state: AppState) {
    let interval_secs = state.config.data.sweep_interval_secs;
    if interval_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            let swept = state.approvals.sweep_expired();
            if swept.is_empty() {
                continue;
            }
            tracing::info!(count = swept.len(), "expired pending approvals");
            for approval in &swept {
                audit_swept_approval(&state, approval);
            }
        }
    });
}
