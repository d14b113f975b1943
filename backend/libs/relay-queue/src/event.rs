//! Delta event wire format
//!
//! Body of every relay message:
//!
//! ```json
//! {"video_id": 42, "user_id": 7, "delta": 1, "timestamp": 1760486400}
//! ```
//!
//! `delta` is strictly `1` or `-1`; `timestamp` is unix seconds. Producers
//! that still emit the short `ts` field name are accepted on decode.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RelayError, RelayResult};

/// Direction of one membership transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Delta {
    /// NotLiked -> Liked
    Add,
    /// Liked -> NotLiked
    Remove,
}

impl Delta {
    pub fn as_i64(self) -> i64 {
        match self {
            Delta::Add => 1,
            Delta::Remove => -1,
        }
    }
}

impl TryFrom<i64> for Delta {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Delta::Add),
            -1 => Ok(Delta::Remove),
            other => Err(format!("delta must be +1 or -1, got {}", other)),
        }
    }
}

impl From<Delta> for i64 {
    fn from(delta: Delta) -> Self {
        delta.as_i64()
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.as_i64())
    }
}

/// One accepted membership transition, relayed to the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEvent {
    pub video_id: i64,
    pub user_id: i64,
    pub delta: Delta,
    /// Unix seconds at which the cache transition was accepted
    #[serde(alias = "ts")]
    pub timestamp: i64,
}

impl DeltaEvent {
    pub fn new(video_id: i64, user_id: i64, delta: Delta) -> Self {
        Self {
            video_id,
            user_id,
            delta,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn encode(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> RelayResult<Self> {
        serde_json::from_str(payload).map_err(|e| RelayError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = DeltaEvent {
            video_id: 42,
            user_id: 7,
            delta: Delta::Remove,
            timestamp: 1_760_486_400,
        };

        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "video_id": 42,
                "user_id": 7,
                "delta": -1,
                "timestamp": 1_760_486_400i64,
            })
        );
    }

    #[test]
    fn test_decode_accepts_short_timestamp_field() {
        let event = DeltaEvent::decode(r#"{"video_id":1,"user_id":2,"delta":1,"ts":99}"#).unwrap();
        assert_eq!(event.delta, Delta::Add);
        assert_eq!(event.timestamp, 99);
    }

    #[test]
    fn test_decode_rejects_out_of_range_delta() {
        for body in [
            r#"{"video_id":1,"user_id":2,"delta":0,"timestamp":1}"#,
            r#"{"video_id":1,"user_id":2,"delta":2,"timestamp":1}"#,
        ] {
            let err = DeltaEvent::decode(body).unwrap_err();
            assert!(matches!(err, RelayError::Malformed(_)), "{body}");
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            DeltaEvent::decode("not json").unwrap_err(),
            RelayError::Malformed(_)
        ));
        assert!(matches!(
            DeltaEvent::decode(r#"{"video_id":1}"#).unwrap_err(),
            RelayError::Malformed(_)
        ));
    }

    #[test]
    fn test_delta_display() {
        assert_eq!(Delta::Add.to_string(), "+1");
        assert_eq!(Delta::Remove.to_string(), "-1");
    }
}
