//! DeviceStore implementation
//!
//! BTreeMap-based data-point store with RwLock for concurrency.

use parking_lot::RwLock;

use super::{DpKey, DpValue, Dps};

/// Mutable data-point map of the emulated device
///
/// ## Concurrency:
/// - Reads take the read lock and clone what they need
/// - Every mutation (single set, batch apply, full replace) holds the
///   write lock for its whole duration, so readers never observe half
///   of a batch
pub struct DeviceStore {
    dps: RwLock<Dps>,
}

impl DeviceStore {
    /// Create a store holding the given initial state
    pub fn new(initial: Dps) -> Self {
        Self {
            dps: RwLock::new(initial),
        }
    }

    /// Get a single data point
    pub fn get(&self, key: &DpKey) -> Option<DpValue> {
        self.dps.read().get(key).cloned()
    }

    /// Set a single data point, returning the resulting state
    pub fn set(&self, key: DpKey, value: DpValue) -> Dps {
        let mut dps = self.dps.write();
        dps.insert(key, value);
        dps.clone()
    }

    /// Apply a batch of data points under one write lock, returning the resulting state
    pub fn apply(&self, batch: &Dps) -> Dps {
        let mut dps = self.dps.write();
        for (key, value) in batch {
            dps.insert(key.clone(), value.clone());
        }
        dps.clone()
    }

    /// Replace the whole state
    pub fn replace(&self, state: Dps) {
        *self.dps.write() = state;
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Dps {
        self.dps.read().clone()
    }

    /// Number of data points
    pub fn len(&self) -> usize {
        self.dps.read().len()
    }

    /// Check if the device has no data points
    pub fn is_empty(&self) -> bool {
        self.dps.read().is_empty()
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(Dps::new())
    }
}
