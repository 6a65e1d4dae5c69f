//! Connection Table
//!
//! Registry of live connections shared by the acceptor, the poller and the
//! workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::Connection;

/// Identifier of a registered connection
pub type ConnId = u64;

/// One registered connection
pub struct Slot<S> {
    /// Connection state; only touched while locked
    pub conn: Mutex<Connection<S>>,

    /// Set while the connection sits in the worker queue or is being driven
    queued: AtomicBool,
}

impl<S> Slot<S> {
    /// Claim the slot for dispatch. False if it is already queued.
    pub fn try_queue(&self) -> bool {
        !self.queued.swap(true, Ordering::AcqRel)
    }

    /// Release the claim taken by `try_queue`
    pub fn release(&self) {
        self.queued.store(false, Ordering::Release);
    }

    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }
}

/// Live connections by id
pub struct ConnectionTable<S> {
    slots: RwLock<HashMap<ConnId, Arc<Slot<S>>>>,
    next_id: AtomicU64,
}

impl<S> Default for ConnectionTable<S> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<S> ConnectionTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning its id
    pub fn insert(&self, conn: Connection<S>) -> ConnId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot {
            conn: Mutex::new(conn),
            queued: AtomicBool::new(false),
        });
        self.slots.write().insert(id, slot);
        id
    }

    pub fn get(&self, id: ConnId) -> Option<Arc<Slot<S>>> {
        self.slots.read().get(&id).cloned()
    }

    /// Drop a connection; its stream closes once the last handle goes away
    pub fn remove(&self, id: ConnId) -> Option<Arc<Slot<S>>> {
        self.slots.write().remove(&id)
    }

    /// Point-in-time copy of every slot
    pub fn snapshot(&self) -> Vec<(ConnId, Arc<Slot<S>>)> {
        self.slots
            .read()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Drop every connection
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}
