//! Reorder controller: the wait/enrich/release state machine.
//!
//! Incoming hits go straight to the main queue unless a dependency
//! dimension is pending, in which case they are held in the reorder queue.
//! When the last pending dimension clears, the oldest held hit is enriched
//! with the accumulated context data and the whole reorder queue moves to
//! main in order. Two queues make "hold until dependency data arrives" a
//! structural decision instead of per-hit conditionals on the delivery path,
//! and guarantee relative enqueue order survives the release.

use crate::{payload, EngineResult, HitRecord};
use hit_store::{HitStore, QueueKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An independent reason delivery may be held pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitDimension {
    /// Session lifecycle data (launch/session metrics) not yet available.
    Lifecycle,
    /// Referrer/acquisition data not yet available.
    Referrer,
}

/// Owns the queue pair, the wait set and the context accumulator.
///
/// A record exists in exactly one queue at any time; moving records out of
/// reorder never reorders records already in main.
pub struct ReorderController {
    store: Arc<HitStore>,
    waiting: HashSet<WaitDimension>,
    context: HashMap<String, String>,
}

impl ReorderController {
    pub fn new(store: Arc<HitStore>) -> Self {
        Self {
            store,
            waiting: HashSet::new(),
            context: HashMap::new(),
        }
    }

    /// Queue a hit, routing it by wait state.
    ///
    /// Backdated hits carry catch-up data for a previous session; they are
    /// only valid while the wait window is still open. Once ordinary hits
    /// for the current session have begun flowing, a late backdated hit
    /// would land out of place, so it is dropped instead of reordering an
    /// already-released stream.
    ///
    /// Returns whether a record was appended.
    pub fn queue_hit(
        &mut self,
        payload: String,
        timestamp: f64,
        correlation_id: String,
        backdated: bool,
    ) -> EngineResult<bool> {
        let record = HitRecord::new(payload, timestamp, correlation_id);
        let blob = record.encode()?;

        if backdated {
            if self.is_waiting() {
                self.store.append(QueueKind::Main, &blob)?;
                debug!(correlation_id = %record.correlation_id, "Queued backdated hit");
                Ok(true)
            } else {
                debug!(
                    correlation_id = %record.correlation_id,
                    "Dropping backdated hit queued outside the wait window"
                );
                Ok(false)
            }
        } else if self.is_waiting() {
            self.store.append(QueueKind::Reorder, &blob)?;
            debug!(correlation_id = %record.correlation_id, "Held hit in reorder queue");
            Ok(true)
        } else {
            self.store.append(QueueKind::Main, &blob)?;
            debug!(correlation_id = %record.correlation_id, "Queued hit");
            Ok(true)
        }
    }

    /// Mark a dimension pending. Idempotent.
    pub fn wait_for(&mut self, dimension: WaitDimension) {
        if self.waiting.insert(dimension) {
            debug!(?dimension, "Waiting for dependency data");
        }
    }

    /// Clear a dimension, merging any context data it delivered.
    ///
    /// Held hits are released only when the wait set empties. The context
    /// accumulated across all releases since the last full release is merged
    /// into the oldest held hit only; later hits are assumed to already
    /// reflect current context.
    pub fn release(
        &mut self,
        dimension: WaitDimension,
        context: Option<HashMap<String, String>>,
    ) -> EngineResult<()> {
        self.waiting.remove(&dimension);
        if let Some(context) = context {
            // Last writer wins across dimensions.
            self.context.extend(context);
        }

        if !self.waiting.is_empty() {
            debug!(?dimension, still_waiting = self.waiting.len(), "Partial release");
            return Ok(());
        }

        let mut released = 0;
        if let Some(head) = self.store.peek(QueueKind::Reorder, 1)?.into_iter().next() {
            match HitRecord::decode(&head.record) {
                Ok(mut record) => {
                    if !self.context.is_empty() {
                        record.payload = payload::merge_context_data(&record.payload, &self.context);
                    }
                    self.store.append(QueueKind::Main, &record.encode()?)?;
                }
                Err(e) => {
                    // Move it unmodified; the delivery processor drops
                    // malformed records.
                    warn!(error = %e, "Reorder head failed to decode, moving unmodified");
                    self.store.append(QueueKind::Main, &head.record)?;
                }
            }
            self.store.remove(QueueKind::Reorder, head.id)?;
            released += 1;
        }
        released += self.store.move_all(QueueKind::Reorder, QueueKind::Main)?;
        if released > 0 {
            debug!(released, "Released held hits");
        }
        self.context.clear();
        Ok(())
    }

    /// Wait set non-empty.
    pub fn is_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }

    /// Total records across both queues.
    pub fn queue_size(&self) -> EngineResult<usize> {
        Ok(self.store.count(QueueKind::Main)? + self.store.count(QueueKind::Reorder)?)
    }

    /// Records in the main queue only. This is the depth the batch limit is
    /// compared against; held hits must not count toward backpressure.
    pub fn main_size(&self) -> EngineResult<usize> {
        Ok(self.store.count(QueueKind::Main)?)
    }

    /// Clear both queues, the wait set and the accumulator. Idempotent.
    pub fn reset(&mut self) -> EngineResult<()> {
        self.store.clear(QueueKind::Main)?;
        self.store.clear(QueueKind::Reorder)?;
        self.waiting.clear();
        self.context.clear();
        info!("Reorder controller reset");
        Ok(())
    }
}
