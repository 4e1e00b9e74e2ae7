//! Result status codes.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Outcome class of an [`RpcResult`](super::RpcResult).
///
/// Encoded on the wire as the integers `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultCode {
    #[default]
    None = 0,
    Success = 1,
    Warning = 2,
    Error = 3,
}

impl ResultCode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ResultCode::None),
            1 => Some(ResultCode::Success),
            2 => Some(ResultCode::Warning),
            3 => Some(ResultCode::Error),
            _ => None,
        }
    }
}

impl Serialize for ResultCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ResultCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        ResultCode::from_u8(value)
            .ok_or_else(|| de::Error::custom(format!("invalid result code: {}", value)))
    }
}
