//! Axum handlers for the server's endpoints.

mod download;
mod http;
mod ws;

pub use download::handle_download;
pub use http::{handle_execute, handle_health};
pub use ws::handle_connect;
