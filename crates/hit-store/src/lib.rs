//! SQLite persistence layer for the hit delivery engine.
//!
//! This crate provides:
//! - Durable FIFO queues for queued hits (`HitStore` queue operations)
//! - A persisted scalar cursor store (`HitStore` cursor operations)
//! - Database migrations
//!
//! Records are opaque blobs to this crate; serialization is owned by the
//! engine. Both logical queues ("main" and "reorder") live in one table,
//! distinguished by a queue column, so a release can move records between
//! them in a single transaction.

mod error;
mod migrations;
mod store;

pub use error::{StoreError, StoreResult};
pub use migrations::run_migrations;
pub use store::{HitStore, QueueKind, QueuedRecord};
