//! Dynamically typed parameter bags and their typed accessors.
//!
//! Request params and result data are open JSON objects. Accessors never
//! fail the request: a missing key or a value of the wrong type both read
//! as `None`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Open key/value bag carried by requests (`p`) and results (`d`).
pub type Params = Map<String, Value>;

/// Decode a bag, treating an explicit `null` as empty.
pub(crate) fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Params, D::Error> {
    Ok(Option::<Params>::deserialize(deserializer)?.unwrap_or_default())
}

/// Raw value for `key`.
pub(crate) fn get<'a>(params: &'a Params, key: &str) -> Option<&'a Value> {
    params.get(key)
}

/// String value for `key`; `None` if absent or not a string.
pub(crate) fn get_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Signed integer value for `key`; `None` if absent or not an integer.
pub(crate) fn get_i64(params: &Params, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Unsigned integer value for `key`.
pub(crate) fn get_u64(params: &Params, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

/// Float value for `key`. Integers widen to floats.
pub(crate) fn get_f64(params: &Params, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

/// Bool value for `key`.
pub(crate) fn get_bool(params: &Params, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

/// Nested object for `key`.
pub(crate) fn get_object<'a>(params: &'a Params, key: &str) -> Option<&'a Params> {
    params.get(key).and_then(|v| v.as_object())
}

/// Convert the value for `key` into `T`, returning `None` when the shape
/// does not fit.
pub(crate) fn get_as<T: DeserializeOwned>(params: &Params, key: &str) -> Option<T> {
    params
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn bag() -> Params {
        json!({
            "name": "ping",
            "count": 3,
            "ratio": 0.5,
            "flag": true,
            "nested": {"inner": "value"},
            "list": [1, 2, 3]
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_typed_getters() {
        let params = bag();
        assert_eq!(get_str(&params, "name"), Some("ping"));
        assert_eq!(get_i64(&params, "count"), Some(3));
        assert_eq!(get_u64(&params, "count"), Some(3));
        assert_eq!(get_f64(&params, "ratio"), Some(0.5));
        assert_eq!(get_f64(&params, "count"), Some(3.0));
        assert_eq!(get_bool(&params, "flag"), Some(true));
        assert_eq!(
            get_object(&params, "nested").and_then(|n| n.get("inner")),
            Some(&json!("value"))
        );
    }

    #[test]
    fn test_type_mismatch_reads_as_absent() {
        let params = bag();
        assert_eq!(get_str(&params, "count"), None);
        assert_eq!(get_i64(&params, "name"), None);
        assert_eq!(get_bool(&params, "ratio"), None);
        assert_eq!(get_str(&params, "missing"), None);
    }

    #[test]
    fn test_get_as_converts_structured_values() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Nested {
            inner: String,
        }

        let params = bag();
        assert_eq!(get_as::<Vec<u32>>(&params, "list"), Some(vec![1, 2, 3]));
        assert_eq!(
            get_as::<Nested>(&params, "nested"),
            Some(Nested {
                inner: "value".to_string()
            })
        );
        assert_eq!(get_as::<Vec<u32>>(&params, "name"), None);
        assert!(get(&params, "missing").is_none());
    }
}
