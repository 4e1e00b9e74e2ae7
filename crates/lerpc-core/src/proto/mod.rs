//! Wire-level protocol model.
//!
//! Requests and results travel as compact JSON objects with one-letter keys.
//! Both carry an open parameter bag; see [`params`] for the accessors.

mod code;
pub mod params;
mod request;
mod result;

pub use code::ResultCode;
pub use params::Params;
pub use request::Request;
pub use result::RpcResult;

/// Message of the Error result produced when no handler matches.
pub const ERROR_HANDLER_NOT_FOUND: &str = "handler not found";
/// Message of the Error result produced when a handler rejects the token.
pub const ERROR_AUTH_FAILED: &str = "handler auth failed";
/// Message of the Error result produced when the executor queue is full.
pub const ERROR_QUEUE_FULL: &str = "executor queue is full";
