use crate::patient_mask::{DenseMask, PatientMask};
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};

/// All-zero dense masks, one per universe length, shared by every query in the process.
///
/// Values are immutable and small, so entries are inserted once and never evicted.
#[derive(Debug, Default)]
pub struct EmptyMaskCache {
    masks: DashMap<usize, Arc<PatientMask>>,
}

impl EmptyMaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached empty mask over `patients` positions, building it on first use.
    pub fn get(&self, patients: usize) -> Arc<PatientMask> {
        if let Some(mask) = self.masks.get(&patients) {
            return Arc::clone(mask.value());
        }
        let entry = self
            .masks
            .entry(patients)
            .or_insert_with(|| Arc::new(PatientMask::Dense(DenseMask::zeroed(patients))));
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

static EMPTY_MASKS: OnceLock<EmptyMaskCache> = OnceLock::new();

/// The process-wide cache.
pub fn global() -> &'static EmptyMaskCache {
    EMPTY_MASKS.get_or_init(EmptyMaskCache::new)
}

/// Shorthand for `global().get(patients)`.
pub fn empty_mask(patients: usize) -> Arc<PatientMask> {
    global().get(patients)
}
