//! KeyStore implementation
//!
//! HashMap-based store with RwLock for concurrency.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::persistence::WriteRecord;
use crate::protocol::ResultCode;

/// Outcome of a lookup: result code plus the value (empty when missing)
pub type Lookup = (ResultCode, String);

/// The live key-value map
///
/// Reads take the shared side of the lock. Mutation is only reachable from
/// inside the crate so that the write sequencer stays the sole writer.
#[derive(Debug, Default)]
pub struct KeyStore {
    data: RwLock<HashMap<String, String>>,
}

impl KeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with recovered state
    pub fn from_map(map: HashMap<String, String>) -> Self {
        Self {
            data: RwLock::new(map),
        }
    }

    /// Look up a key (read lock)
    ///
    /// Returns `(Ok, value)` when present, `(NotFound, "")` otherwise.
    pub fn get(&self, key: &str) -> Lookup {
        match self.data.read().get(key) {
            Some(value) => (ResultCode::Ok, value.clone()),
            None => (ResultCode::NotFound, String::new()),
        }
    }

    /// Apply one write (write lock), returning the prior value if any
    pub(crate) fn apply(&self, record: &WriteRecord) -> Option<String> {
        self.data
            .write()
            .insert(record.key.clone(), record.value.clone())
    }

    /// Consistent full copy of the map (read lock)
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.data.read().clone()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when no key is stored
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}
