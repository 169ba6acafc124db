//! Hit reordering and delivery engine.
//!
//! Buffers analytics hits in a durable two-queue store, holds them while
//! dependency data (session lifecycle, referrer) is pending, enriches the
//! oldest held hit when that data arrives, and delivers the backlog one hit
//! at a time in order with retry and timestamp monotonicity guarantees.
//!
//! The public surface is [`HitEngine`], a clonable handle to a single worker
//! task; everything else is exported for embedding and testing.

mod config;
mod engine;
mod error;
mod gate;
mod payload;
mod processor;
mod record;
mod reorder;
mod response;
mod transport;

pub use config::{ConfigSnapshot, EngineConfig, PrivacyStatus};
pub use engine::HitEngine;
pub use error::{EngineError, EngineResult};
pub use gate::BatchGate;
pub use processor::{Completion, DeliveryProcessor, PreparedHit, SendOutcome};
pub use record::HitRecord;
pub use reorder::{ReorderController, WaitDimension};
pub use response::{HitResponse, RecordingSink, ResponseSink};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
