//! The unit of work: one serialized analytics hit awaiting delivery.

use crate::EngineResult;
use serde::{Deserialize, Serialize};

/// A queued hit.
///
/// The payload is an opaque serialized request body; the engine only ever
/// rewrites it to correct the embedded timestamp token or to merge context
/// data into the head hit of a release. `timestamp` is the event time in
/// epoch seconds, not the send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    /// Serialized request body.
    pub payload: String,
    /// Event time in epoch seconds.
    pub timestamp: f64,
    /// Opaque identifier correlating the server response back to the
    /// originating event.
    pub correlation_id: String,
}

impl HitRecord {
    pub fn new(
        payload: impl Into<String>,
        timestamp: f64,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
            correlation_id: correlation_id.into(),
        }
    }

    /// Serialize for queue storage.
    pub fn encode(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a stored record. Fails on corrupted blobs, which the
    /// delivery processor treats as unrecoverable.
    pub fn decode(blob: &[u8]) -> EngineResult<Self> {
        Ok(serde_json::from_slice(blob)?)
    }
}
