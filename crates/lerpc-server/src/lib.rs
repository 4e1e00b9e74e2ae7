//! lerpc server - HTTP and WebSocket transport over the lerpc executor.
//!
//! Endpoints:
//! - `POST /execute`: one request per call, reply in the response body.
//! - `GET /connect`: WebSocket upgrade. The first frame is the connection id;
//!   after that requests and results flow in both directions, results in
//!   completion order.
//! - `GET /download?key=K`: bytes of a live download entry.
//! - `GET /health`: liveness probe.

pub mod handlers;
pub mod server;
mod transport;

pub use server::{router, start_server, AppState, ConnectionIds, ServerHandle};
