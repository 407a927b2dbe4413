//! Store Module
//!
//! The live key-value map and its single writer.
//!
//! ## Responsibilities
//! - Hold the map behind a reader-writer lock
//! - Serve reads concurrently (shared side)
//! - Apply writes in queue order from exactly one thread (exclusive side)
//!
//! ## Data Structure Choice
//! A `HashMap` in a `parking_lot::RwLock`: O(1) lookups, no ordering needed.
//! Readers never block each other and never observe a half-applied write.

mod keystore;
mod sequencer;

pub use keystore::{KeyStore, Lookup};
pub use sequencer::{PendingWrite, WriteSequencer};
