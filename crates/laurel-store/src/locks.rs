//! Striped key locks.
//!
//! Read-modify-write operations (award check-then-insert, progress updates,
//! streak transitions, leaderboard swaps) take the stripes for every key they
//! touch in a single [`KeyLocks::lock`] call. Stripes are acquired in index
//! order so two operations can never wait on each other in a cycle.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 256;

/// A fixed set of mutexes addressed by key hash.
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

/// Holds the stripes for a set of keys until dropped.
#[must_use = "the keys are unlocked as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl KeyLocks {
    /// Create a lock table with `stripes` stripes (at least one).
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        // Truncation is fine: only the low bits select a stripe.
        #[allow(clippy::cast_possible_truncation)]
        let hash = hasher.finish() as usize;
        hash % self.stripes.len()
    }

    /// Lock every key in `keys`.
    ///
    /// Must not be called again by the same thread while a guard is held.
    pub fn lock(&self, keys: &[&[u8]]) -> KeyGuard<'_> {
        let mut indices: Vec<usize> = keys.iter().map(|k| self.stripe(k)).collect();
        indices.sort_unstable();
        indices.dedup();

        // A panic while holding a stripe leaves no partial state behind (writes are
        // batched), so a poisoned stripe is still safe to use.
        let guards = indices
            .into_iter()
            .map(|i| self.stripes[i].lock().unwrap_or_else(PoisonError::into_inner))
            .collect();

        KeyGuard { _guards: guards }
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
