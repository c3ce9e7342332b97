pub mod callback;
pub mod health;
pub mod tool;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health probe
        .route("/health", get(health::health))
        // Tool invocation
        .route("/tool/:tool_name", post(tool::invoke_tool))
        // Approval callbacks (signed URLs, hit from a browser or chat link)
        .route("/approve/:id", get(callback::approve))
        .route("/deny/:id", get(callback::deny))
        // Pending approvals listing
        .route("/approvals", get(callback::list_pending))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
