//! `GET /download?key=K`.

use crate::server::AppState;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use lerpc_core::RpcResult;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    key: Option<String>,
}

/// Serve the bytes of a live download entry and count the use.
pub async fn handle_download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let Some(key) = query.key.filter(|key| !key.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(RpcResult::error("missing download key")),
        )
            .into_response();
    };

    match state.executor.downloads().pull(&key).await {
        Ok(Some(payload)) => {
            debug!("Serving download {} ({} bytes)", key, payload.data.len());
            ([(header::CONTENT_TYPE, payload.content_type)], payload.data).into_response()
        }
        Ok(None) => (
            StatusCode::BAD_REQUEST,
            Json(RpcResult::error("download not found")),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to read download {}: {}", key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(state.fault(e.to_string())),
            )
                .into_response()
        }
    }
}
