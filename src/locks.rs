//! Key Lock Set
//!
//! Named advisory locks for operations the storage engine cannot make atomic
//! on its own: the read-modify-write cycle of a counter, and the first open of
//! a storage directory.
//!
//! ## Deadlock Freedom
//! Names are sorted and deduplicated before any of them is taken, so two
//! acquisitions that share names always take them in the same order.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

/// A set of named advisory locks
#[derive(Default)]
pub struct KeyLockSet {
    /// Names currently held by some guard
    held: Mutex<HashSet<Vec<u8>>>,

    /// Signalled whenever a guard releases its names
    released: Condvar,
}

impl KeyLockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every name is held, then return a guard releasing them on drop
    pub fn acquire<I, N>(&self, names: I) -> KeyLockGuard<'_>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<[u8]>,
    {
        let mut ordered: Vec<Vec<u8>> = names.into_iter().map(|n| n.as_ref().to_vec()).collect();
        ordered.sort();
        ordered.dedup();

        let mut held = self.held.lock();
        for name in &ordered {
            while held.contains(name) {
                self.released.wait(&mut held);
            }
            held.insert(name.clone());
        }
        drop(held);

        KeyLockGuard {
            set: self,
            names: ordered,
        }
    }

    /// Convenience for a single name
    pub fn acquire_one(&self, name: impl AsRef<[u8]>) -> KeyLockGuard<'_> {
        self.acquire(std::iter::once(name))
    }

    /// Number of names currently held (for testing/debugging)
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Scope guard for an acquisition; releases every name on drop
#[must_use = "locks are released as soon as the guard is dropped"]
pub struct KeyLockGuard<'a> {
    set: &'a KeyLockSet,
    names: Vec<Vec<u8>>,
}

impl KeyLockGuard<'_> {
    /// Names held by this guard, in acquisition order
    pub fn names(&self) -> &[Vec<u8>] {
        &self.names
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.set.held.lock();
        for name in &self.names {
            held.remove(name);
        }
        drop(held);
        self.set.released.notify_all();
    }
}
