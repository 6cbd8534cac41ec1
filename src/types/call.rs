use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one call, shared by both endpoints and the rendezvous server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An opaque session description produced and consumed by the media engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub serde_json::Value);

impl SessionDescription {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// An opaque connectivity candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceCandidate(pub serde_json::Value);

impl IceCandidate {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// A call offer that has not been accepted, declined or claimed yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallInvitation {
    pub call_id: CallId,
    pub offer: SessionDescription,
    pub received_at: DateTime<Utc>,
}

impl CallInvitation {
    pub fn new(call_id: CallId, offer: SessionDescription) -> Self {
        Self {
            call_id,
            offer,
            received_at: Utc::now(),
        }
    }
}

/// Source of identifiers for outgoing calls.
///
/// The rendezvous server never confirms uniqueness, so whoever assigns the
/// id owns collision handling. Deployments that let the server assign ids
/// can plug a generator that hands those out.
pub trait CallIdGenerator: Send + Sync {
    fn next_call_id(&self) -> CallId;
}

/// Uses the current Unix time in whole seconds, e.g. `"1700000000"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockCallIdGenerator;

impl CallIdGenerator for ClockCallIdGenerator {
    fn next_call_id(&self) -> CallId {
        CallId(Utc::now().timestamp().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_call_id_is_unix_seconds() {
        let before = Utc::now().timestamp();
        let id = ClockCallIdGenerator.next_call_id();
        let after = Utc::now().timestamp();

        let secs: i64 = id.as_str().parse().expect("clock id should be numeric");
        assert!(secs >= before && secs <= after);
    }

    #[test]
    fn test_opaque_blobs_serialize_transparently() {
        let offer = SessionDescription::new(serde_json::json!({"type": "offer", "sdp": "v=0"}));
        let encoded = serde_json::to_value(&offer).unwrap();
        assert_eq!(encoded, serde_json::json!({"type": "offer", "sdp": "v=0"}));

        let id: CallId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(id, CallId::from("42"));
    }
}
