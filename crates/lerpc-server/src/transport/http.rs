//! Request/reply path: `POST /execute`.

use crate::server::AppState;
use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use lerpc_core::proto::ERROR_QUEUE_FULL;
use lerpc_core::{Request, RpcResult, TransportKind};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Queue the posted request and answer with its result.
///
/// 200 with the executor's result, including dispatch errors. 500 with an
/// Error result when the body is not a request, the queue is full, or the
/// promise fails. 503 if the server stops while the request is pending.
pub async fn handle_execute(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<RpcResult>) {
    let request: Request = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejecting malformed request body: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(state.fault(format!("malformed request: {}", e))),
            );
        }
    };

    debug!("HTTP call: {}", request.route());
    let key = request.key.clone();

    let promise = match state
        .executor
        .push_request(TransportKind::Http, None, request)
    {
        Ok(promise) => promise,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RpcResult::error(ERROR_QUEUE_FULL).with_key(key)),
            );
        }
    };

    let outcome = tokio::select! {
        outcome = promise.wait() => outcome,
        _ = state.shutdown.cancelled() => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(RpcResult::error("server shutting down").with_key(key)),
            );
        }
    };

    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)),
        Err(e) => {
            error!("Execution failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(state.fault(e.to_string()).with_key(key)),
            )
        }
    }
}
