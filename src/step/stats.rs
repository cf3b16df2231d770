// src/step/stats.rs

use serde::{Deserialize, Serialize};

/// Progress counters for a single processed item.
///
/// A fresh value reports one unit of progress and no warnings or errors.
/// Steps that report fractional progress overwrite `progress` through
/// [`crate::step::Tracker::set_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressStats {
    pub progress: u64,
    pub warning_count: u64,
    pub error_count: u64,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self {
            progress: 1,
            warning_count: 0,
            error_count: 0,
        }
    }

    /// All counters at zero; the starting point for aggregating many items.
    pub fn zero() -> Self {
        Self {
            progress: 0,
            warning_count: 0,
            error_count: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Add `other` into `self`.
    pub fn merge(&mut self, other: &ProgressStats) {
        self.progress += other.progress;
        self.warning_count += other.warning_count;
        self.error_count += other.error_count;
    }
}

impl Default for ProgressStats {
    fn default() -> Self {
        Self::new()
    }
}
