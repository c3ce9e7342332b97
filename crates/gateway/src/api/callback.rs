//! Approval callback endpoints.
//!
//! - `GET /approve/:id?sig&exp` — consume and execute the frozen request
//! - `GET /deny/:id?sig&exp`    — consume and refuse
//! - `GET /approvals`           — list pending approvals
//!
//! The `sig`/`exp` parameters come from the signed URLs issued when the
//! approval was created; nothing else can consume an approval.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use uuid::Uuid;

use gk_approvals::ApprovalAction;

use crate::api::tool::into_response;
use crate::runtime::orchestrator;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    sig: String,
    #[serde(default)]
    exp: String,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let outcome = orchestrator::handle_callback(
        &state,
        ApprovalAction::Approve,
        id,
        &query.sig,
        &query.exp,
    )
    .await;
    into_response(outcome)
}

pub async fn deny(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let outcome =
        orchestrator::handle_callback(&state, ApprovalAction::Deny, id, &query.sig, &query.exp)
            .await;
    into_response(outcome)
}

pub async fn list_pending(State(state): State<AppState>) -> impl IntoResponse {
    let pending = state.approvals.list_pending();
    let count = pending.len();
    Json(serde_json::json!({
        "approvals": pending,
        "count": count,
    }))
}
