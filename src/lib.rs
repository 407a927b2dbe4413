//! # EpochKV
//!
//! A single-node key-value store with:
//! - Ordered writes through a single sequencer thread
//! - Durability via periodic delta logs and base snapshots
//! - Crash recovery from the newest snapshot plus later deltas
//! - A length-prefixed TCP protocol with client-side request correlation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │              (one thread per connection)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │ Get                     │ Set
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────────┐
//!   │  KeyStore   │◄─────────│ WriteSequencer  │
//!   │  (RwLock)   │  apply   │ (bounded queue) │
//!   └──────┬──────┘          └────────┬────────┘
//!          │ snapshot                 │ forward
//!          ▼                          ▼
//!   ┌─────────────────────────────────────────┐
//!   │          PersistenceManager              │
//!   │  <epoch>-base (long)  <epoch>-delta (1s) │
//!   └─────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod store;
pub mod persistence;
pub mod protocol;
pub mod network;
pub mod client;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvError, Result};
pub use config::{ClientConfig, Config};
pub use engine::Engine;
pub use client::Client;
pub use persistence::WriteRecord;
pub use protocol::ResultCode;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of EpochKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
