//! Inbound RPC request.

use super::params::{self, Params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single RPC call.
///
/// Wire form: `{"t": token, "k": key, "n": namespace, "m": method, "p": {..}}`.
/// Every field is optional on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Bearer token compared by the handler's auth predicate.
    #[serde(rename = "t", skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Caller-assigned correlation key, echoed back on the result.
    #[serde(rename = "k", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "n", skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(rename = "m", skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(
        rename = "p",
        skip_serializing_if = "Params::is_empty",
        deserialize_with = "params::null_as_empty"
    )]
    pub params: Params,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a request addressed to `namespace::method`.
    pub fn call(namespace: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new().with_namespace(namespace).with_method(method)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn set_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// `namespace::method`, used in logs.
    pub fn route(&self) -> String {
        format!("{}::{}", self.namespace, self.method)
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        params::get(&self.params, key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        params::get_str(&self.params, key)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        params::get_i64(&self.params, key)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        params::get_u64(&self.params, key)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        params::get_f64(&self.params, key)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        params::get_bool(&self.params, key)
    }

    pub fn param_object(&self, key: &str) -> Option<&Params> {
        params::get_object(&self.params, key)
    }

    /// Convert a param into `T`; `None` when absent or the shape does not fit.
    pub fn param_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        params::get_as(&self.params, key)
    }
}
