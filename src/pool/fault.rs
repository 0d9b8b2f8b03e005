//! Fault injection for pool allocations and frees.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::PoolOffset;

/// Armed failures consumed by [`ArenaPool`](super::ArenaPool).
///
/// Free failures fire after the object's header has been scrubbed and
/// before the transaction commits, so every injected failure exercises
/// rollback. Sync failures fire at the commit point itself, after the
/// transaction body has succeeded.
///
/// # Examples
///
/// ```
/// use pmroot::pool::FaultInjector;
///
/// let faults = FaultInjector::new();
/// faults.fail_next_frees(1);
/// faults.fail_free_at(0x80);
/// assert_eq!(faults.fired(), 0);
/// faults.clear();
/// ```
#[derive(Debug, Default)]
pub struct FaultInjector {
    next_frees: AtomicUsize,
    next_allocations: AtomicUsize,
    next_syncs: AtomicUsize,
    offsets: Mutex<HashSet<PoolOffset>>,
    fired: AtomicUsize,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` frees, whatever their offset.
    pub fn fail_next_frees(&self, count: usize) {
        self.next_frees.store(count, Ordering::Release);
    }

    /// Fail every free of `offset` until [`clear`](Self::clear) is called.
    pub fn fail_free_at(&self, offset: PoolOffset) {
        self.offsets.lock().insert(offset);
    }

    pub fn fail_next_allocations(&self, count: usize) {
        self.next_allocations.store(count, Ordering::Release);
    }

    /// Fail the next `count` commits as if flushing the region failed.
    pub fn fail_next_syncs(&self, count: usize) {
        self.next_syncs.store(count, Ordering::Release);
    }

    /// Disarm everything.
    pub fn clear(&self) {
        self.next_frees.store(0, Ordering::Release);
        self.next_allocations.store(0, Ordering::Release);
        self.next_syncs.store(0, Ordering::Release);
        self.offsets.lock().clear();
    }

    /// Number of failures injected so far.
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::Acquire)
    }

    pub(crate) fn take_free_failure(&self, offset: PoolOffset) -> bool {
        let hit = self.offsets.lock().contains(&offset) || take_one(&self.next_frees);
        if hit {
            self.fired.fetch_add(1, Ordering::AcqRel);
        }
        hit
    }

    pub(crate) fn take_allocation_failure(&self) -> bool {
        self.take_counted(&self.next_allocations)
    }

    pub(crate) fn take_sync_failure(&self) -> bool {
        self.take_counted(&self.next_syncs)
    }

    fn take_counted(&self, counter: &AtomicUsize) -> bool {
        let hit = take_one(counter);
        if hit {
            self.fired.fetch_add(1, Ordering::AcqRel);
        }
        hit
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}
