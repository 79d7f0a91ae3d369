//! Inbound webhook HTTP surface.
//!
//! Every method under `/hooks/` is forwarded verbatim to the webhook router;
//! 404 for unmatched routes, 500 with an error message when the dispatched
//! run fails.

use crate::api::workflows::AppState;
use crate::error::EngineError;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::any,
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/hooks/{*path}", any(dispatch_webhook))
}

async fn dispatch_webhook(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
        .collect();

    // forward the body verbatim: JSON when it parses, raw text otherwise
    let payload = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    };

    match state
        .webhooks
        .handle(&path, method.as_str(), header_map, payload)
        .await
    {
        Some(response) => {
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(response.body)).into_response()
        }
        None => {
            let err = EngineError::WebhookNotRegistered {
                method: method.to_string(),
                path: format!("/{path}"),
            };
            tracing::debug!("{err}");
            (StatusCode::NOT_FOUND, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}
