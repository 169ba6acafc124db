//! Response callback surface.

use std::collections::HashMap;
use std::sync::Mutex;

/// Server response metadata for one successfully delivered hit, correlated
/// back to the originating event.
#[derive(Debug, Clone)]
pub struct HitResponse {
    pub correlation_id: String,
    pub body: String,
    pub headers: HashMap<String, String>,
}

/// Host callback invoked once per successfully delivered hit.
pub trait ResponseSink: Send + Sync {
    fn on_response(&self, response: HitResponse);
}

/// Sink that records every response, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingSink {
    responses: Mutex<Vec<HitResponse>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn responses(&self) -> Vec<HitResponse> {
        self.responses.lock().expect("lock poisoned").clone()
    }
}

impl ResponseSink for RecordingSink {
    fn on_response(&self, response: HitResponse) {
        self.responses
            .lock()
            .expect("lock poisoned")
            .push(response);
    }
}
