//! Slug admission control
//!
//! The first caller to claim an output key wins; every later claimant for the
//! same key is told the output already exists for this run. One guard per
//! run, never persisted.

use std::collections::HashSet;
use std::sync::Mutex;

/// Concurrent claim set shared by all workers of one run
///
/// Claims are short, so one mutex suffices.
#[derive(Debug, Default)]
pub struct SlugGuard {
    claimed: Mutex<HashSet<String>>,
}

impl SlugGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once per distinct key for this guard's lifetime
    ///
    /// Ties are broken by whichever call enters the critical section first.
    pub fn try_claim(&self, key: &str) -> bool {
        let mut claimed = self
            .claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.insert(key.to_string())
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
