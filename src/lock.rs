//! Node-level locking.
//!
//! Neighbor-list edits are short (bounded by `M_MAX0` distance
//! computations), so each node is guarded by a busy-wait lock rather than a
//! sleeping mutex. The lock table is indexed by identifier and grows in
//! step with the node file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Busy-wait mutex for very short critical sections.
pub struct SpinLock {
    flag: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    fn acquire(&self) {
        loop {
            if !self.flag.swap(true, Ordering::Acquire) {
                return;
            }
            while self.flag.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    fn release(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one node's spin-lock.
pub struct NodeGuard {
    lock: Arc<SpinLock>,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// One spin-lock per identifier slot.
///
/// Locks live behind `Arc` so their addresses stay stable while the table
/// vector itself is grown; a held guard never blocks an extension.
pub struct NodeLocks {
    table: RwLock<Vec<Arc<SpinLock>>>,
}

impl NodeLocks {
    pub fn new(capacity: usize) -> Self {
        let mut table = Vec::with_capacity(capacity);
        table.resize_with(capacity, || Arc::new(SpinLock::new()));
        Self {
            table: RwLock::new(table),
        }
    }

    /// Lock the slot for `id`. Panics if the table does not cover `id`; the
    /// engine extends the table under its resize lock before any link
    /// touches a new identifier.
    pub fn acquire(&self, id: u32) -> NodeGuard {
        let lock = {
            let table = self.table.read();
            Arc::clone(&table[id as usize])
        };
        lock.acquire();
        NodeGuard { lock }
    }

    /// Grow the table to at least `min_len` slots.
    pub fn extend_to(&self, min_len: usize) {
        let mut table = self.table.write();
        if table.len() < min_len {
            table.resize_with(min_len, || Arc::new(SpinLock::new()));
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
