//! HTTP and WebSocket server implementation using Axum.

use crate::transport::{handle_connect, handle_download, handle_execute, handle_health};
use axum::{
    routing::{get, post},
    Router,
};
use lerpc_core::config::ProtocolConfig;
use lerpc_core::{
    CancellationToken, DownloadRegistry, Executor, ExecutorHandle, HandlerRegistry, RpcResult,
    ServerConfig,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers.
pub struct AppState {
    pub executor: Arc<Executor>,
    pub config: ServerConfig,
    /// Identifiers of live WebSocket connections.
    pub connections: ConnectionIds,
    /// Cancelled when the server shuts down; every connection loop watches it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Error result for an internal fault, hiding `message` unless the server
    /// exposes errors.
    pub fn fault(&self, message: impl Into<String>) -> RpcResult {
        if self.config.expose_errors {
            RpcResult::error(message)
        } else {
            RpcResult::error(ProtocolConfig::FALLBACK_ERROR_MESSAGE)
        }
    }
}

/// Registry of live connection identifiers.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    live: Mutex<HashSet<String>>,
}

impl ConnectionIds {
    /// Draw a lower-hex nanosecond timestamp not held by any live connection.
    pub fn acquire(&self) -> String {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            let id = format!("{:x}", nanos);
            if live.insert(id.clone()) {
                return id;
            }
        }
    }

    pub fn release(&self, id: &str) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn len(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A running server.
///
/// Dropping the handle stops the server without waiting; prefer
/// [`shutdown`](Self::shutdown).
pub struct ServerHandle {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    executor: Option<ExecutorHandle>,
}

impl ServerHandle {
    /// Address the server is bound to (useful when port=0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.state.executor
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Stop accepting, close WebSocket connections, and stop the executor.
    pub async fn shutdown(mut self) {
        self.state.shutdown.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            if let Err(e) = server.await {
                warn!("Server task ended abnormally: {}", e);
            }
        }
        if let Some(executor) = self.executor.take() {
            executor.shutdown().await;
        }
        info!("Server on {} stopped", self.addr);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.state.shutdown.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Build the router for `state`.
pub fn router(state: Arc<AppState>) -> Router {
    // Configure CORS for browser callers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/execute", post(handle_execute))
        .route("/connect", get(handle_connect))
        .route("/download", get(handle_download))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the executor and the HTTP/WebSocket server.
///
/// Handlers are taken from `handlers` in registration order.
pub async fn start_server(
    config: ServerConfig,
    handlers: Arc<HandlerRegistry>,
) -> anyhow::Result<ServerHandle> {
    let downloads = Arc::new(DownloadRegistry::new(
        config.download_lifetime,
        config.download_limit,
    ));
    let executor = Arc::new(Executor::new(config.executor.clone(), handlers, downloads));

    // Parse the address
    let addr: SocketAddr = config.addr().parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    let executor_handle = executor.start();
    let state = Arc::new(AppState {
        executor,
        config,
        connections: ConnectionIds::default(),
        shutdown: CancellationToken::new(),
    });
    let app = router(state.clone());

    info!("Server listening on {}", actual_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            error!("Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr: actual_addr,
        state,
        shutdown_tx: Some(shutdown_tx),
        server: Some(server),
        executor: Some(executor_handle),
    })
}
