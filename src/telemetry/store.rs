use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::{Reading, RegionIndex};

/// Point-in-time copy of every region's latest reading.
pub type ReadingSnapshot = BTreeMap<RegionIndex, Reading>;

/// Latest reading per region, shared between the telemetry loop and its readers.
///
/// Each access takes the lock for a single map operation, so a reader never sees a
/// torn entry and the lock is never held across an await point. Updates replace the
/// previous reading outright; nothing is merged or queued.
#[derive(Debug, Default)]
pub struct ReadingStore {
    inner: Arc<RwLock<HashMap<RegionIndex, Reading>>>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, region: RegionIndex, reading: Reading) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(region, reading);
    }

    pub fn get(&self, region: RegionIndex) -> Option<Reading> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(&region).cloned()
    }

    pub fn snapshot(&self) -> ReadingSnapshot {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .map(|(region, reading)| (*region, reading.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Clone for ReadingStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
