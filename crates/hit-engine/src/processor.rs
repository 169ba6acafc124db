//! Delivery processor: prepares the head of the main queue for sending and
//! classifies send outcomes.
//!
//! The processor itself performs no I/O beyond the store. The engine worker
//! asks it for the next sendable hit, performs the HTTP exchange, then hands
//! the outcome back for classification. Keeping the policy here and the
//! network elsewhere makes every drop/retry/deliver decision unit-testable.

use crate::{
    payload, ConfigSnapshot, EngineResult, HitRecord, HitResponse, TransportError,
    TransportResponse,
};
use hit_store::{HitStore, QueueKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cursor key for the timestamp of the most recently delivered hit.
const LAST_SENT_CURSOR: &str = "last_sent_timestamp";

/// A hit taken from the head of the main queue, timestamp-corrected and
/// ready to send. The record stays in the store until the outcome is
/// classified, so a crash mid-send never loses it.
#[derive(Debug, Clone)]
pub struct PreparedHit {
    pub id: i64,
    pub payload: String,
    pub timestamp: f64,
    pub correlation_id: String,
}

/// Result of one send attempt, as observed by the transport.
#[derive(Debug)]
pub enum SendOutcome {
    /// The exchange completed; status classification happens here.
    Response(TransportResponse),
    /// The exchange never completed.
    Failed(TransportError),
}

/// What to do with the hit after classification.
#[derive(Debug)]
pub enum Completion {
    /// Delivered and removed. Carries the host callback payload, or `None`
    /// when the hit predates the reset cutoff.
    Delivered(Option<HitResponse>),
    /// Recoverable failure; the hit stays at the head of the queue.
    Retry,
    /// Unrecoverable failure; the hit was removed without delivery.
    Dropped,
}

pub struct DeliveryProcessor {
    store: Arc<HitStore>,
    /// Maximum age of a hit when offline batching is disabled.
    offline_wait_threshold: Duration,
    /// Timestamp of the most recently delivered hit. Loaded once at
    /// construction and owned here; the store copy is write-through.
    last_sent: Option<f64>,
}

impl DeliveryProcessor {
    pub fn new(store: Arc<HitStore>, offline_wait_threshold: Duration) -> EngineResult<Self> {
        let last_sent = store.get_cursor(LAST_SENT_CURSOR)?;
        Ok(Self {
            store,
            offline_wait_threshold,
            last_sent,
        })
    }

    /// Timestamp of the most recently delivered hit, if any.
    pub fn last_sent_timestamp(&self) -> Option<f64> {
        self.last_sent
    }

    /// Prepare the next hit from the head of the main queue.
    ///
    /// Skips and removes records that cannot or must not be sent: malformed
    /// records, hits at or before the reset cutoff, and hits that aged past
    /// the wait threshold while offline batching is disabled. When offline
    /// batching is enabled and the head's timestamp has fallen behind the
    /// last delivered hit, the timestamp is bumped to keep the delivered
    /// stream monotonic.
    pub fn next_sendable(
        &self,
        config: &ConfigSnapshot,
        now: f64,
    ) -> EngineResult<Option<PreparedHit>> {
        loop {
            let Some(head) = self.store.peek(QueueKind::Main, 1)?.into_iter().next() else {
                return Ok(None);
            };

            let mut record = match HitRecord::decode(&head.record) {
                Ok(record) => record,
                Err(e) => {
                    warn!(id = head.id, error = %e, "Dropping malformed queued hit");
                    self.store.remove(QueueKind::Main, head.id)?;
                    continue;
                }
            };

            if record.timestamp < config.reset_cutoff {
                debug!(
                    correlation_id = %record.correlation_id,
                    "Dropping hit from before identity reset"
                );
                self.store.remove(QueueKind::Main, head.id)?;
                continue;
            }

            if !config.offline_enabled
                && record.timestamp < now - self.offline_wait_threshold.as_secs_f64()
            {
                debug!(
                    correlation_id = %record.correlation_id,
                    age = now - record.timestamp,
                    "Dropping expired hit, offline batching disabled"
                );
                self.store.remove(QueueKind::Main, head.id)?;
                continue;
            }

            if config.offline_enabled {
                if let Some(last_sent) = self.last_sent {
                    if record.timestamp < last_sent {
                        let corrected = last_sent.floor() + 1.0;
                        record.payload = payload::replace_timestamp(
                            &record.payload,
                            record.timestamp as i64,
                            corrected as i64,
                        );
                        debug!(
                            correlation_id = %record.correlation_id,
                            from = record.timestamp,
                            to = corrected,
                            "Corrected out-of-order timestamp"
                        );
                        record.timestamp = corrected;
                    }
                }
            }

            return Ok(Some(PreparedHit {
                id: head.id,
                payload: record.payload,
                timestamp: record.timestamp,
                correlation_id: record.correlation_id,
            }));
        }
    }

    /// Classify a send outcome and update the store accordingly.
    pub fn complete(
        &mut self,
        hit: &PreparedHit,
        outcome: SendOutcome,
        config: &ConfigSnapshot,
    ) -> EngineResult<Completion> {
        match outcome {
            SendOutcome::Response(response) if response.status == 200 => {
                self.store.remove(QueueKind::Main, hit.id)?;
                if config.offline_enabled {
                    self.last_sent = Some(hit.timestamp);
                    self.store.set_cursor(LAST_SENT_CURSOR, hit.timestamp)?;
                }
                debug!(correlation_id = %hit.correlation_id, "Hit delivered");
                // Responses for hits from before an identity reset would
                // leak pre-reset identifiers back to the host.
                if hit.timestamp > config.reset_cutoff {
                    Ok(Completion::Delivered(Some(HitResponse {
                        correlation_id: hit.correlation_id.clone(),
                        body: response.body,
                        headers: response.headers,
                    })))
                } else {
                    Ok(Completion::Delivered(None))
                }
            }
            SendOutcome::Response(response) if (500..600).contains(&response.status) => {
                warn!(
                    correlation_id = %hit.correlation_id,
                    status = response.status,
                    "Server error, will retry"
                );
                Ok(Completion::Retry)
            }
            SendOutcome::Response(response) => {
                warn!(
                    correlation_id = %hit.correlation_id,
                    status = response.status,
                    "Unrecoverable response, dropping hit"
                );
                self.store.remove(QueueKind::Main, hit.id)?;
                Ok(Completion::Dropped)
            }
            SendOutcome::Failed(e) if e.is_recoverable() => {
                warn!(correlation_id = %hit.correlation_id, error = %e, "Send failed, will retry");
                Ok(Completion::Retry)
            }
            SendOutcome::Failed(e) => {
                warn!(
                    correlation_id = %hit.correlation_id,
                    error = %e,
                    "Send failed unrecoverably, dropping hit"
                );
                self.store.remove(QueueKind::Main, hit.id)?;
                Ok(Completion::Dropped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrivacyStatus;
    use std::collections::HashMap;

    fn processor() -> (Arc<HitStore>, DeliveryProcessor) {
        let store = Arc::new(HitStore::open_in_memory().unwrap());
        let processor = DeliveryProcessor::new(store.clone(), Duration::from_secs(60)).unwrap();
        (store, processor)
    }

    fn processor_with_cursor(last_sent: f64) -> (Arc<HitStore>, DeliveryProcessor) {
        let store = Arc::new(HitStore::open_in_memory().unwrap());
        store.set_cursor(LAST_SENT_CURSOR, last_sent).unwrap();
        let processor = DeliveryProcessor::new(store.clone(), Duration::from_secs(60)).unwrap();
        (store, processor)
    }

    fn online_config() -> ConfigSnapshot {
        ConfigSnapshot {
            collect_url: Some("https://collect.example.com/b/ss".to_string()),
            privacy: PrivacyStatus::OptedIn,
            offline_enabled: true,
            batch_limit: 0,
            reset_cutoff: 0.0,
        }
    }

    fn append(store: &HitStore, payload: &str, timestamp: f64, id: &str) {
        let record = HitRecord::new(payload.to_string(), timestamp, id.to_string());
        store.append(QueueKind::Main, &record.encode().unwrap()).unwrap();
    }

    fn ok_response() -> SendOutcome {
        SendOutcome::Response(TransportResponse {
            status: 200,
            body: "ok".to_string(),
            headers: HashMap::new(),
        })
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let (_store, processor) = processor();
        assert!(processor.next_sendable(&online_config(), 100.0).unwrap().is_none());
    }

    #[test]
    fn malformed_records_are_skipped_and_removed() {
        let (store, processor) = processor();
        store.append(QueueKind::Main, b"not json").unwrap();
        append(&store, "valid&ts=10", 10.0, "h1");

        let hit = processor.next_sendable(&online_config(), 100.0).unwrap().unwrap();
        assert_eq!(hit.correlation_id, "h1");
        assert_eq!(store.count(QueueKind::Main).unwrap(), 1);
    }

    #[test]
    fn hits_before_reset_cutoff_are_dropped() {
        let (store, processor) = processor();
        append(&store, "old&ts=10", 10.0, "h1");
        append(&store, "new&ts=50", 50.0, "h2");
        let mut config = online_config();
        config.reset_cutoff = 20.0;

        let hit = processor.next_sendable(&config, 100.0).unwrap().unwrap();
        assert_eq!(hit.correlation_id, "h2");
        assert_eq!(store.count(QueueKind::Main).unwrap(), 1);
    }

    #[test]
    fn expired_hits_drop_when_offline_disabled() {
        let (store, processor) = processor();
        append(&store, "stale&ts=10", 10.0, "h1");
        append(&store, "fresh&ts=90", 90.0, "h2");
        let mut config = online_config();
        config.offline_enabled = false;

        let hit = processor.next_sendable(&config, 100.0).unwrap().unwrap();
        assert_eq!(hit.correlation_id, "h2");
        assert_eq!(store.count(QueueKind::Main).unwrap(), 1);
    }

    #[test]
    fn old_hits_survive_when_offline_enabled() {
        let (_store, processor) = processor();
        append(&processor.store, "old&ts=10", 10.0, "h1");

        let hit = processor.next_sendable(&online_config(), 100_000.0).unwrap().unwrap();
        assert_eq!(hit.correlation_id, "h1");
    }

    #[test]
    fn cursor_is_loaded_at_construction() {
        let (_store, processor) = processor_with_cursor(1000.5);
        assert_eq!(processor.last_sent_timestamp(), Some(1000.5));
    }

    #[test]
    fn out_of_order_timestamp_is_corrected() {
        let (store, processor) = processor_with_cursor(1000.0);
        append(&store, "late&ts=500", 500.0, "h1");

        let hit = processor.next_sendable(&online_config(), 2000.0).unwrap().unwrap();
        assert_eq!(hit.timestamp, 1001.0);
        assert_eq!(hit.payload, "late&ts=1001");
    }

    #[test]
    fn in_order_timestamp_is_untouched() {
        let (store, processor) = processor_with_cursor(1000.0);
        append(&store, "onward&ts=1500", 1500.0, "h1");

        let hit = processor.next_sendable(&online_config(), 2000.0).unwrap().unwrap();
        assert_eq!(hit.timestamp, 1500.0);
        assert_eq!(hit.payload, "onward&ts=1500");
    }

    #[test]
    fn no_correction_when_offline_disabled() {
        let (store, processor) = processor_with_cursor(1000.0);
        append(&store, "late&ts=999", 999.0, "h1");
        let mut config = online_config();
        config.offline_enabled = false;

        let hit = processor.next_sendable(&config, 1000.0).unwrap().unwrap();
        assert_eq!(hit.timestamp, 999.0);
        assert_eq!(hit.payload, "late&ts=999");
    }

    #[test]
    fn delivered_hit_is_removed_and_cursor_advances() {
        let (store, mut processor) = processor();
        append(&store, "a&ts=100", 100.0, "h1");
        let config = online_config();
        let hit = processor.next_sendable(&config, 200.0).unwrap().unwrap();

        let completion = processor.complete(&hit, ok_response(), &config).unwrap();
        match completion {
            Completion::Delivered(Some(response)) => {
                assert_eq!(response.correlation_id, "h1");
                assert_eq!(response.body, "ok");
            }
            other => panic!("expected delivered with response, got {:?}", other),
        }
        assert_eq!(store.count(QueueKind::Main).unwrap(), 0);
        assert_eq!(processor.last_sent_timestamp(), Some(100.0));
        // Write-through to the store so it survives restart.
        assert_eq!(store.get_cursor(LAST_SENT_CURSOR).unwrap(), Some(100.0));
    }

    #[test]
    fn cursor_does_not_advance_when_offline_disabled() {
        let (store, mut processor) = processor();
        append(&store, "a&ts=100", 100.0, "h1");
        let mut config = online_config();
        config.offline_enabled = false;
        let hit = processor.next_sendable(&config, 100.0).unwrap().unwrap();

        processor.complete(&hit, ok_response(), &config).unwrap();
        assert_eq!(store.count(QueueKind::Main).unwrap(), 0);
        assert_eq!(processor.last_sent_timestamp(), None);
    }

    #[test]
    fn callback_is_suppressed_at_or_before_reset_cutoff() {
        let (store, mut processor) = processor();
        append(&store, "a&ts=100", 100.0, "h1");
        let mut config = online_config();
        let hit = processor.next_sendable(&config, 200.0).unwrap().unwrap();

        config.reset_cutoff = 100.0;
        let completion = processor.complete(&hit, ok_response(), &config).unwrap();
        assert!(matches!(completion, Completion::Delivered(None)));
        assert_eq!(store.count(QueueKind::Main).unwrap(), 0);
    }

    #[test]
    fn server_errors_retry_without_removal() {
        let (store, mut processor) = processor();
        append(&store, "a&ts=100", 100.0, "h1");
        let config = online_config();
        let hit = processor.next_sendable(&config, 200.0).unwrap().unwrap();

        let outcome = SendOutcome::Response(TransportResponse {
            status: 503,
            body: String::new(),
            headers: HashMap::new(),
        });
        let completion = processor.complete(&hit, outcome, &config).unwrap();
        assert!(matches!(completion, Completion::Retry));
        assert_eq!(store.count(QueueKind::Main).unwrap(), 1);
        assert_eq!(processor.last_sent_timestamp(), None);
    }

    #[test]
    fn client_errors_drop_the_hit() {
        let (store, mut processor) = processor();
        append(&store, "a&ts=100", 100.0, "h1");
        let config = online_config();
        let hit = processor.next_sendable(&config, 200.0).unwrap().unwrap();

        let outcome = SendOutcome::Response(TransportResponse {
            status: 404,
            body: String::new(),
            headers: HashMap::new(),
        });
        let completion = processor.complete(&hit, outcome, &config).unwrap();
        assert!(matches!(completion, Completion::Dropped));
        assert_eq!(store.count(QueueKind::Main).unwrap(), 0);
    }

    #[test]
    fn connection_failures_retry() {
        let (store, mut processor) = processor();
        append(&store, "a&ts=100", 100.0, "h1");
        let config = online_config();
        let hit = processor.next_sendable(&config, 200.0).unwrap().unwrap();

        let outcome = SendOutcome::Failed(TransportError::Connection("refused".to_string()));
        let completion = processor.complete(&hit, outcome, &config).unwrap();
        assert!(matches!(completion, Completion::Retry));
        assert_eq!(store.count(QueueKind::Main).unwrap(), 1);
    }

    #[test]
    fn retry_then_success_preserves_order() {
        let (store, mut processor) = processor();
        append(&store, "first&ts=100", 100.0, "h1");
        append(&store, "second&ts=200", 200.0, "h2");
        let config = online_config();

        let hit = processor.next_sendable(&config, 300.0).unwrap().unwrap();
        assert_eq!(hit.correlation_id, "h1");
        let outcome = SendOutcome::Failed(TransportError::Connection("refused".to_string()));
        processor.complete(&hit, outcome, &config).unwrap();

        // The failed hit is still at the head.
        let hit = processor.next_sendable(&config, 300.0).unwrap().unwrap();
        assert_eq!(hit.correlation_id, "h1");
        processor.complete(&hit, ok_response(), &config).unwrap();

        let hit = processor.next_sendable(&config, 300.0).unwrap().unwrap();
        assert_eq!(hit.correlation_id, "h2");
    }
}
