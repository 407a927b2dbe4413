//! Persistence Manager
//!
//! Two independent timers over the applied-write queue:
//! - delta flush (short interval): drain what is queued, write `<epoch>-delta`
//! - base snapshot (long interval): copy the map, write `<epoch>-base`, then
//!   prune every older file in the background
//!
//! Failures are logged and the cycle is skipped; the process keeps running.

use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{KvError, Result};
use crate::store::KeyStore;
use super::{list_log_files, BaseFile, DeltaFile, Epoch, EpochClock, WriteRecord};

/// Shared state used by both timer threads and the manual triggers
struct Inner {
    log_dir: PathBuf,
    store: Arc<KeyStore>,
    records: Receiver<WriteRecord>,
    clock: Arc<EpochClock>,

    /// Batch whose delta write failed, retried ahead of the next drain
    retry: Mutex<Vec<WriteRecord>>,

    /// Background retention passes not yet joined
    retention: Mutex<Vec<JoinHandle<()>>>,

    records_flushed: AtomicU64,
}

/// Owns the delta and base timer threads
pub struct PersistenceManager {
    inner: Arc<Inner>,

    /// Dropping this stops both timers
    shutdown: Option<Sender<()>>,

    timers: Vec<JoinHandle<()>>,
}

impl PersistenceManager {
    /// Create a manager without starting its timers
    ///
    /// Cycles only run through `flush_delta` / `snapshot_base`.
    pub fn new(
        log_dir: &Path,
        store: Arc<KeyStore>,
        records: Receiver<WriteRecord>,
        clock: Arc<EpochClock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                log_dir: log_dir.to_path_buf(),
                store,
                records,
                clock,
                retry: Mutex::new(Vec::new()),
                retention: Mutex::new(Vec::new()),
                records_flushed: AtomicU64::new(0),
            }),
            shutdown: None,
            timers: Vec::new(),
        }
    }

    /// Start the delta and base timer threads
    pub fn start(&mut self, delta_interval: Duration, base_interval: Duration) -> Result<()> {
        if self.shutdown.is_some() {
            return Err(KvError::Persistence("timers already running".to_string()));
        }

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let inner = Arc::clone(&self.inner);
        let stop = shutdown_rx.clone();
        let delta = thread::Builder::new()
            .name("delta-flush".to_string())
            .spawn(move || {
                run_timer(delta_interval, stop, || {
                    if let Err(e) = inner.flush_delta() {
                        tracing::error!("Delta flush failed: {}", e);
                    }
                })
            })?;

        let inner = Arc::clone(&self.inner);
        let base = thread::Builder::new()
            .name("base-snapshot".to_string())
            .spawn(move || {
                run_timer(base_interval, shutdown_rx, || {
                    if let Err(e) = inner.snapshot_base() {
                        tracing::error!("Base snapshot failed: {}", e);
                    }
                })
            })?;

        self.shutdown = Some(shutdown_tx);
        self.timers = vec![delta, base];

        tracing::debug!(
            "Persistence timers started (delta every {:?}, base every {:?})",
            delta_interval,
            base_interval
        );
        Ok(())
    }

    /// Run one delta cycle now
    ///
    /// Returns the epoch written, or `None` when nothing was queued.
    pub fn flush_delta(&self) -> Result<Option<Epoch>> {
        self.inner.flush_delta()
    }

    /// Run one base snapshot now
    ///
    /// Retention for this snapshot runs on its own thread; see
    /// [`wait_for_retention`](Self::wait_for_retention).
    pub fn snapshot_base(&self) -> Result<Epoch> {
        self.inner.snapshot_base()
    }

    /// Block until every started retention pass has finished
    pub fn wait_for_retention(&self) {
        self.inner.wait_for_retention();
    }

    /// Records written to delta files so far
    pub fn records_flushed(&self) -> u64 {
        self.inner.records_flushed.load(Ordering::Acquire)
    }

    /// Records held back after a failed delta write
    pub fn pending_retry(&self) -> usize {
        self.inner.retry.lock().len()
    }

    /// Stop the timers and flush whatever is still queued
    ///
    /// Call after the write sequencer has exited so the queue is complete.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_timers();

        let result = self.inner.flush_delta().map(|_| ());
        self.inner.wait_for_retention();

        tracing::debug!(
            "Persistence stopped after flushing {} records",
            self.records_flushed()
        );
        result
    }

    fn stop_timers(&mut self) {
        drop(self.shutdown.take());
        for timer in self.timers.drain(..) {
            if timer.join().is_err() {
                tracing::error!("Persistence timer thread panicked");
            }
        }
    }
}

impl Drop for PersistenceManager {
    fn drop(&mut self) {
        self.stop_timers();
    }
}

impl Inner {
    fn flush_delta(&self) -> Result<Option<Epoch>> {
        // Held across drain and write so concurrent flushes cannot reorder batches.
        let mut retry = self.retry.lock();

        let mut batch = mem::take(&mut *retry);
        batch.extend(self.records.try_iter());
        if batch.is_empty() {
            return Ok(None);
        }

        // Epoch is taken after the drain: any base with a larger epoch was
        // copied after these records were applied.
        let delta = DeltaFile {
            epoch: self.clock.next(),
            records: batch,
        };

        match delta.write(&self.log_dir) {
            Ok(path) => {
                let count = delta.records.len() as u64;
                self.records_flushed.fetch_add(count, Ordering::AcqRel);
                tracing::debug!("Flushed {} records to {}", count, path.display());
                Ok(Some(delta.epoch))
            }
            Err(e) => {
                tracing::warn!(
                    "Keeping {} records for the next delta flush",
                    delta.records.len()
                );
                *retry = delta.records;
                Err(e)
            }
        }
    }

    fn snapshot_base(&self) -> Result<Epoch> {
        // Epoch before copy: deltas with a smaller epoch are covered by the copy.
        let epoch = self.clock.next();
        let base = BaseFile {
            epoch,
            entries: self.store.snapshot(),
        };

        let path = base.write(&self.log_dir)?;
        tracing::info!(
            "Wrote base snapshot of {} keys to {}",
            base.entries.len(),
            path.display()
        );

        let log_dir = self.log_dir.clone();
        let handle = thread::Builder::new()
            .name("retention".to_string())
            .spawn(move || match prune_before(&log_dir, epoch) {
                Ok(removed) => tracing::debug!("Retention removed {} files", removed),
                Err(e) => tracing::warn!("Retention pass failed: {}", e),
            })?;
        let mut retention = self.retention.lock();
        retention.retain(|h| !h.is_finished());
        retention.push(handle);

        Ok(epoch)
    }

    fn wait_for_retention(&self) {
        let handles = mem::take(&mut *self.retention.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Retention thread panicked");
            }
        }
    }
}

/// Tick until the shutdown channel disconnects
fn run_timer(interval: Duration, shutdown: Receiver<()>, mut cycle: impl FnMut()) {
    let ticker = channel::tick(interval);
    loop {
        crossbeam::select! {
            recv(ticker) -> _ => cycle(),
            recv(shutdown) -> _ => return,
        }
    }
}

/// Delete every base/delta file in `dir` with an epoch below `cutoff`
///
/// Returns the number of files removed. A file that cannot be removed is
/// logged and left for the next pass.
pub fn prune_before(dir: &Path, cutoff: Epoch) -> Result<usize> {
    let mut removed = 0;

    for file in list_log_files(dir)? {
        if file.epoch >= cutoff {
            break;
        }
        match fs::remove_file(&file.path) {
            Ok(()) => {
                tracing::trace!("Removed {}", file.path.display());
                removed += 1;
            }
            Err(e) => tracing::warn!("Could not remove {}: {}", file.path.display(), e),
        }
    }

    Ok(removed)
}
