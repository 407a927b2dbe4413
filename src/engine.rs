//! Engine Module
//!
//! The core store that wires recovery, the key store, the write sequencer
//! and persistence together.
//!
//! ## Responsibilities
//! - Rebuild state from the log directory before serving anything
//! - Serve reads straight from the KeyStore
//! - Route writes through the bounded sequencer queue
//! - Shut the pipeline down in order (sequencer drains, then final flush)

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::RwLock;

use crate::config::Config;
use crate::error::{KvError, Result};
use crate::persistence::{
    EpochClock, PersistenceManager, RecoveryManager, RecoveryReport, WriteRecord,
};
use crate::protocol::{Operation, Request, Response, ResultCode};
use crate::store::{KeyStore, Lookup, PendingWrite, WriteSequencer};

/// Pause between drain passes while `close` waits for the sequencer
const CLOSE_DRAIN_INTERVAL: Duration = Duration::from_millis(2);

/// The main store engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Reads** (get): shared side of the KeyStore lock, never block each other
/// - **Writes** (set): enqueued on a bounded queue (a full queue blocks the
///   caller); the sequencer thread applies them one at a time under the
///   exclusive side, then forwards them to persistence in the same order
///
/// `set` returns once its write is visible in the map. Durability is still
/// eventual: the write reaches disk on the next delta flush.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// The live map
    store: Arc<KeyStore>,

    /// Producer side of the write queue; `None` once the engine is closed
    writes: RwLock<Option<Sender<PendingWrite>>>,

    sequencer: Option<WriteSequencer>,
    persistence: Option<PersistenceManager>,

    /// What startup recovery found
    recovery: RecoveryReport,
}

impl Engine {
    /// Open an engine and start its background workers
    ///
    /// On startup:
    /// 1. Create the log directory if it doesn't exist
    /// 2. Recover the map from base + deltas
    /// 3. Start the write sequencer
    /// 4. Start the delta and base timers
    pub fn open(config: Config) -> Result<Self> {
        let mut engine = Self::open_manual(config)?;

        let delta_interval = engine.config.delta_interval;
        let base_interval = engine.config.base_interval;
        if let Some(persistence) = engine.persistence.as_mut() {
            persistence.start(delta_interval, base_interval)?;
        }

        Ok(engine)
    }

    /// Open an engine whose persistence cycles only run on demand
    ///
    /// Use [`flush_delta`](Self::flush_delta) and
    /// [`snapshot_base`](Self::snapshot_base) to drive them.
    pub fn open_manual(config: Config) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.log_dir).map_err(|e| {
            KvError::Config(format!(
                "cannot create log directory {}: {}",
                config.log_dir.display(),
                e
            ))
        })?;

        let (map, recovery) = RecoveryManager::recover(&config.log_dir)?;
        let store = Arc::new(KeyStore::from_map(map));
        let clock = Arc::new(EpochClock::starting_after(recovery.max_epoch));

        let (write_tx, write_rx) = channel::bounded(config.write_queue_capacity);
        let (persist_tx, persist_rx) = channel::bounded(config.persist_queue_capacity);

        let sequencer = WriteSequencer::spawn(Arc::clone(&store), write_rx, persist_tx)?;
        let persistence =
            PersistenceManager::new(&config.log_dir, Arc::clone(&store), persist_rx, clock);

        tracing::info!(
            "Engine opened at {} with {} keys",
            config.log_dir.display(),
            store.len()
        );

        Ok(Self {
            config,
            store,
            writes: RwLock::new(Some(write_tx)),
            sequencer: Some(sequencer),
            persistence: Some(persistence),
            recovery,
        })
    }

    /// Execute a decoded request
    ///
    /// Internal failures become an `Error` response with an empty value.
    pub fn execute(&self, request: &Request) -> Response {
        let outcome = match request.operation() {
            Operation::Get => self.get(&request.key),
            Operation::Set => {
                let value = request.value.clone().unwrap_or_default();
                self.set(&request.key, &value)
            }
        };

        match outcome {
            Ok((result, value)) => Response::new(request.id, result, value),
            Err(e) => {
                tracing::error!("Request {} on key {:?} failed: {}", request.id, request.key, e);
                Response::error(request.id)
            }
        }
    }

    /// Get a value by key
    ///
    /// `(Ok, value)` when present, `(NotFound, "")` otherwise.
    pub fn get(&self, key: &str) -> Result<Lookup> {
        Ok(self.store.get(key))
    }

    /// Set a key, returning the prior state
    ///
    /// `(NotFound, "")` when the key was created, `(Ok, prior)` when it was
    /// overwritten. Blocks while the write queue is full.
    pub fn set(&self, key: &str, value: &str) -> Result<Lookup> {
        let sender = self.writes.read().clone().ok_or(KvError::Uninitialized)?;

        let (pending, applied) = PendingWrite::new(WriteRecord::new(key, value));
        sender
            .send(pending)
            .map_err(|_| KvError::ChannelClosed("write queue".to_string()))?;

        let prior = applied
            .recv()
            .map_err(|_| KvError::ChannelClosed("write sequencer".to_string()))?;

        Ok(match prior {
            Some(old) => (ResultCode::Ok, old),
            None => (ResultCode::NotFound, String::new()),
        })
    }

    /// Write everything applied so far to a delta file now
    pub fn flush_delta(&self) -> Result<()> {
        self.persistence()?.flush_delta()?;
        Ok(())
    }

    /// Write a base snapshot now and wait for its retention pass
    pub fn snapshot_base(&self) -> Result<()> {
        let persistence = self.persistence()?;
        persistence.snapshot_base()?;
        persistence.wait_for_retention();
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Stops accepting writes, lets the sequencer drain its queue, then flushes
    /// the remaining records to a final delta file.
    pub fn close(mut self) -> Result<()> {
        self.writes.write().take();

        if let Some(sequencer) = self.sequencer.take() {
            // The sequencer can be parked on a full persistence queue; keep
            // draining it until the thread exits.
            while !sequencer.is_finished() {
                if let Some(persistence) = self.persistence.as_ref() {
                    if let Err(e) = persistence.flush_delta() {
                        tracing::warn!("Delta flush during close failed: {}", e);
                    }
                }
                thread::sleep(CLOSE_DRAIN_INTERVAL);
            }
            sequencer.join()?;
        }
        if let Some(persistence) = self.persistence.take() {
            persistence.shutdown()?;
        }

        tracing::info!("Engine closed");
        Ok(())
    }

    fn persistence(&self) -> Result<&PersistenceManager> {
        self.persistence.as_ref().ok_or(KvError::Uninitialized)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the log directory path
    pub fn log_dir(&self) -> &Path {
        &self.config.log_dir
    }

    /// Number of keys in the live map
    pub fn key_count(&self) -> usize {
        self.store.len()
    }

    /// Writes applied by the sequencer since open
    pub fn writes_applied(&self) -> u64 {
        self.sequencer.as_ref().map_or(0, |s| s.applied())
    }

    /// What startup recovery found
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
