//! `POST /tool/:tool_name` — the tool invocation endpoint.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use crate::runtime::orchestrator::{self, Outcome};
use crate::state::AppState;

/// Convert an orchestrator outcome into an HTTP response.
pub(crate) fn into_response(outcome: Outcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome.body)).into_response()
}

pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    let outcome = orchestrator::handle_tool_request(&state, &tool_name, payload).await;
    into_response(outcome)
}
