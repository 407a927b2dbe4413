//! Write Sequencer
//!
//! Single consumer of the write queue. Applies each write to the KeyStore in
//! arrival order, then forwards the same record to the persistence queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{KvError, Result};
use crate::persistence::WriteRecord;
use super::KeyStore;

/// A write waiting in the sequencer queue
///
/// `applied`, when present, receives the key's prior value once the write
/// is visible in the map.
#[derive(Debug)]
pub struct PendingWrite {
    pub record: WriteRecord,
    applied: Option<Sender<Option<String>>>,
}

impl PendingWrite {
    /// A write whose submitter waits for it to be applied
    pub fn new(record: WriteRecord) -> (Self, Receiver<Option<String>>) {
        let (tx, rx) = channel::bounded(1);
        (
            Self {
                record,
                applied: Some(tx),
            },
            rx,
        )
    }

    /// A write nobody waits on
    pub fn detached(record: WriteRecord) -> Self {
        Self {
            record,
            applied: None,
        }
    }
}

/// Handle to the sequencer thread
pub struct WriteSequencer {
    handle: JoinHandle<()>,
    applied: Arc<AtomicU64>,
}

impl WriteSequencer {
    /// Start the sequencer thread
    ///
    /// The thread exits once every sender of `writes` has been dropped and the
    /// queue is drained; dropping its persistence sender then tells the
    /// persistence manager no more records will arrive.
    pub fn spawn(
        store: Arc<KeyStore>,
        writes: Receiver<PendingWrite>,
        persist: Sender<WriteRecord>,
    ) -> Result<Self> {
        let applied = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&applied);

        let handle = thread::Builder::new()
            .name("write-sequencer".to_string())
            .spawn(move || run(store, writes, persist, counter))?;

        Ok(Self { handle, applied })
    }

    /// Number of writes applied so far
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// True once the thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to drain its queue and exit
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| KvError::ChannelClosed("write sequencer panicked".to_string()))
    }
}

fn run(
    store: Arc<KeyStore>,
    writes: Receiver<PendingWrite>,
    persist: Sender<WriteRecord>,
    applied: Arc<AtomicU64>,
) {
    tracing::debug!("Write sequencer started");
    let mut persistence_gone = false;

    for pending in writes.iter() {
        let prior = store.apply(&pending.record);
        applied.fetch_add(1, Ordering::AcqRel);

        if let Some(ack) = pending.applied {
            // Submitter may have given up; the write still stands.
            let _ = ack.send(prior);
        }

        // Blocks while the persistence queue is full.
        if persist.send(pending.record).is_err() && !persistence_gone {
            tracing::warn!("Persistence queue closed; further writes are memory-only");
            persistence_gone = true;
        }
    }

    tracing::debug!(
        "Write sequencer stopped after {} writes",
        applied.load(Ordering::Acquire)
    );
}
