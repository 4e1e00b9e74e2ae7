//! lerpc core - protocol model, executor, and transport client.
//!
//! A caller sends a [`Request`] addressed to `namespace::method`; the remote
//! [`Executor`] queues it, resolves the first matching handler, checks its
//! auth predicate and answers with an [`RpcResult`]. Requests travel over
//! one-shot HTTP or over a pooled, multiplexed WebSocket connection; the
//! [`Client`] picks between them and falls back when the duplex path fails.
//!
//! The server side lives in the `lerpc-server` crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use lerpc_core::{Client, ClientConfig, Request};
//!
//! #[tokio::main]
//! async fn main() -> lerpc_core::Result<()> {
//!     let client = Client::new(ClientConfig::new("localhost:3000", "token"))?;
//!     client.start().await?;
//!
//!     let result = client.execute(Request::call("base", "ping")).await?;
//!     result.check()?;
//!     println!("pong at {:?}", result.data_i64("ts"));
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod client;
pub mod config;
pub mod context;
pub mod download;
pub mod error;
pub mod executor;
pub mod handler;
pub mod promise;
pub mod proto;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use client::{AttemptStats, Client};
pub use config::{
    ClientConfig, ClientMode, DemotionPolicy, ExecutorConfig, ProtocolConfig, ServerConfig,
};
pub use context::{FrameKind, OutboundFrame, OutboundSender, RequestContext, TransportKind};
pub use download::{DownloadEntry, DownloadPayload, DownloadRegistry, DownloadSource};
pub use error::{LerpcError, Result};
pub use executor::{Executor, ExecutorHandle};
pub use handler::{FnHandler, Handler, HandlerRegistry};
pub use promise::Promise;
pub use proto::{Params, Request, ResultCode, RpcResult};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Nothing guarded by these mutexes is left half-updated across a panic
/// point, so the inner value is still consistent.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
