//! Persistent object pool interface and the memory-mapped reference pool.
//!
//! The root locator and the sweep only ever talk to a pool through
//! [`ObjectPool`]. Every mutating operation on the trait is expected to be
//! transactional: either all of its writes land or none do.

mod arena;
mod fault;
mod journal;
mod tx;

pub use arena::{ArenaPool, PoolStats, BLOCK_HEADER_LEN, POOL_HEADER_LEN, POOL_MAGIC};
pub use fault::FaultInjector;

use crate::error::{PoolError, PoolResult};
use crate::header::{HeaderLayout, HeaderView};

/// Pool-relative byte offset of an object's payload.
pub type PoolOffset = u64;

/// Allocation type number, used to partition iteration.
pub type TypeNum = u32;

/// Type number of the block backing the root region.
pub const ROOT_TYPE_NUM: TypeNum = 0;

/// Type number of generic pool objects visited by the sweep.
pub const GENERIC_TYPE_NUM: TypeNum = 1;

/// Location and size of the root's backing memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootDescriptor {
    pub offset: PoolOffset,
    pub size: u64,
}

/// Transactional persistent allocator consumed by the root locator and the
/// sweep engine.
///
/// Closures passed to the accessors run while the pool is locked; they must
/// not call back into the same pool.
pub trait ObjectPool: Send + Sync {
    /// Total bytes addressable by pool offsets.
    fn capacity(&self) -> u64;

    /// The installed root descriptor, read without a transaction.
    fn root(&self) -> Option<RootDescriptor>;

    /// Allocate `size` bytes and install them as the root in one
    /// transaction. Fails with `RootAlreadyExists` if a root is present.
    fn install_root(&self, size: u64) -> PoolResult<RootDescriptor>;

    /// Allocate a zeroed object of the given type.
    fn allocate(&self, type_num: TypeNum, size: u64) -> PoolResult<PoolOffset>;

    /// Snapshot of every live allocation of `type_num`, in allocation-index
    /// order.
    fn objects_of_type(&self, type_num: TypeNum) -> Vec<PoolOffset>;

    /// Run `f` over the payload of a live object.
    fn with_object<R>(&self, offset: PoolOffset, f: impl FnOnce(&[u8]) -> R) -> PoolResult<R>;

    /// Mutate the payload of a live object. Writes are rolled back if `f`
    /// returns an error.
    fn update<R>(
        &self,
        offset: PoolOffset,
        f: impl FnOnce(&mut [u8]) -> PoolResult<R>,
    ) -> PoolResult<R>;

    /// Free the object if `predicate` holds for its current payload. The
    /// check and the free happen in the same transaction. Returns whether
    /// the object was freed.
    fn free_if(
        &self,
        offset: PoolOffset,
        predicate: impl FnOnce(&[u8]) -> bool,
    ) -> PoolResult<bool>;

    fn free(&self, offset: PoolOffset) -> PoolResult<()> {
        self.free_if(offset, |_| true).map(|_| ())
    }

    /// Add `delta` to an object's reference count in one transaction and
    /// return the new count.
    fn adjust_ref_count(
        &self,
        offset: PoolOffset,
        layout: HeaderLayout,
        delta: i32,
    ) -> PoolResult<i32> {
        self.update(offset, |bytes| {
            let view = HeaderView::new(bytes, layout);
            if !view.is_complete() {
                return Err(PoolError::ObjectNotFound(offset));
            }
            let next = view
                .ref_count()
                .checked_add(delta)
                .ok_or(PoolError::RefCountOverflow(offset))?;
            layout.write_ref_count(bytes, next);
            Ok(next)
        })
    }
}
