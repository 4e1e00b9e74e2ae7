//! Outbound RPC result.

use super::code::ResultCode;
use super::params::{self, Params};
use crate::{LerpcError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply to a [`Request`](super::Request).
///
/// Wire form: `{"k": key, "c": code, "d": {..}, "m": message}`.
/// `code=Error` carries a `message` and empty `data`; `code=Success` carries
/// its payload in `data`. Mutators consume and return the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcResult {
    #[serde(rename = "k", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "c")]
    pub code: ResultCode,
    #[serde(rename = "d", deserialize_with = "params::null_as_empty")]
    pub data: Params,
    #[serde(rename = "m", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RpcResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful result carrying `data`.
    pub fn success(data: Params) -> Self {
        Self::new().with_code(ResultCode::Success).with_data(data)
    }

    /// Error result carrying `message` and no data.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new()
            .with_code(ResultCode::Error)
            .with_message(message)
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    pub fn with_code(mut self, code: ResultCode) -> Self {
        self.code = code;
        self
    }

    pub fn with_data(mut self, data: Params) -> Self {
        self.data = data;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn set_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.code == ResultCode::Error
    }

    /// Turn an Error result into [`LerpcError::Remote`].
    pub fn check(&self) -> Result<()> {
        if self.is_error() {
            return Err(LerpcError::Remote {
                message: self.message.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    pub fn data(&self, key: &str) -> Option<&Value> {
        params::get(&self.data, key)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        params::get_str(&self.data, key)
    }

    pub fn data_i64(&self, key: &str) -> Option<i64> {
        params::get_i64(&self.data, key)
    }

    pub fn data_u64(&self, key: &str) -> Option<u64> {
        params::get_u64(&self.data, key)
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        params::get_bool(&self.data, key)
    }

    pub fn data_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        params::get_as(&self.data, key)
    }
}
