//! Duplex path: `GET /connect`.
//!
//! Each connection runs a reader loop and a writer loop sharing a bounded
//! outbound channel and one cancellation scope. Every decoded request is
//! dispatched on its own task, so results are written in completion order and
//! the result key is the only correlation the caller gets.

use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use lerpc_core::proto::ERROR_QUEUE_FULL;
use lerpc_core::{
    CancellationToken, FrameKind, OutboundFrame, OutboundSender, Request, RpcResult,
    TransportKind,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// WebSocket upgrade handler.
pub async fn handle_connect(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_connection(state, socket))
}

async fn serve_connection(state: Arc<AppState>, socket: WebSocket) {
    let connection_id = state.connections.acquire();
    let scope = CancellationToken::new();
    let (mut sink, stream) = socket.split();

    if let Err(e) = sink.send(Message::Text(connection_id.clone())).await {
        warn!("Failed to announce connection {}: {}", connection_id, e);
        state.connections.release(&connection_id);
        return;
    }
    info!("WebSocket connection {} opened", connection_id);

    let (tx, rx) = mpsc::channel(state.config.outbound_capacity.max(1));
    let writer = tokio::spawn(write_loop(sink, rx, scope.clone()));

    read_loop(&state, &connection_id, stream, tx, &scope).await;

    scope.cancel();
    if let Err(e) = writer.await {
        warn!("Writer for {} ended abnormally: {}", connection_id, e);
    }
    state.connections.release(&connection_id);
    info!("WebSocket connection {} closed", connection_id);
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
    scope: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = scope.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let message = match frame.kind {
            FrameKind::Text => Message::Text(String::from_utf8_lossy(&frame.payload).into_owned()),
            FrameKind::Binary => Message::Binary(frame.payload.to_vec()),
        };
        if let Err(e) = sink.send(message).await {
            debug!("WebSocket write failed: {}", e);
            scope.cancel();
            break;
        }
    }

    // Fail any sender still holding a clone of the channel.
    rx.close();
    let _ = sink.close().await;
}

async fn read_loop(
    state: &Arc<AppState>,
    connection_id: &str,
    mut stream: SplitStream<WebSocket>,
    outbound: OutboundSender,
    scope: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = scope.cancelled() => break,
            _ = state.shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };

        let payload = match frame {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("WebSocket read on {} failed: {}", connection_id, e);
                break;
            }
        };

        let request: Request = match serde_json::from_slice(&payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    "Closing connection {} on malformed request: {}",
                    connection_id, e
                );
                break;
            }
        };

        debug!("WebSocket call on {}: {}", connection_id, request.route());
        tokio::spawn(dispatch(
            Arc::clone(state),
            request,
            outbound.clone(),
            scope.clone(),
        ));
    }
}

/// Run one request through the executor and queue its result for writing.
async fn dispatch(
    state: Arc<AppState>,
    request: Request,
    outbound: OutboundSender,
    scope: CancellationToken,
) {
    let key = request.key.clone();

    let result = match state.executor.push_request(
        TransportKind::Websocket,
        Some(outbound.clone()),
        request,
    ) {
        Ok(promise) => {
            let outcome = tokio::select! {
                _ = scope.cancelled() => return,
                outcome = promise.wait() => outcome,
            };
            match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!("Execution failed: {}", e);
                    state.fault(e.to_string()).with_key(key)
                }
            }
        }
        Err(_) => RpcResult::error(ERROR_QUEUE_FULL).with_key(key),
    };

    // The connection may have closed while the handler ran.
    if scope.is_cancelled() {
        return;
    }

    let payload = match serde_json::to_vec(&result) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode result: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = scope.cancelled() => {}
        sent = outbound.send(OutboundFrame::text(payload)) => {
            if sent.is_err() {
                debug!("Dropping result for closed connection");
            }
        }
    }
}
