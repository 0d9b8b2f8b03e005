//! Locating and creating the pool's root anchor.

use log::{debug, info};

use crate::error::{PoolError, PoolResult};
use crate::pool::{ObjectPool, PoolOffset, RootDescriptor};

/// Read-mostly access to the root descriptor.
///
/// Lookups never open a transaction; only [`create_root`](Self::create_root)
/// does, and callers are expected to serialize creation during startup.
///
/// # Examples
///
/// ```
/// use pmroot::pool::ArenaPool;
/// use pmroot::root::RootLocator;
///
/// let pool = ArenaPool::anonymous(64 * 1024).unwrap();
/// let locator = RootLocator::new(&pool);
///
/// assert!(!locator.root_exists());
/// let offset = locator.create_root(4096).unwrap();
/// assert_eq!(locator.root_offset().unwrap(), offset);
/// ```
pub struct RootLocator<'p, P: ObjectPool> {
    pool: &'p P,
}

impl<'p, P: ObjectPool> RootLocator<'p, P> {
    pub fn new(pool: &'p P) -> Self {
        Self { pool }
    }

    pub fn root_exists(&self) -> bool {
        self.pool.root().is_some()
    }

    pub fn root(&self) -> Option<RootDescriptor> {
        self.pool.root()
    }

    /// Offset of the root's backing region.
    pub fn root_offset(&self) -> PoolResult<PoolOffset> {
        self.pool
            .root()
            .map(|root| root.offset)
            .ok_or(PoolError::RootNotFound)
    }

    /// Allocate `size` bytes and install them as the root.
    ///
    /// Does not look for an existing root first; the pool refuses a second
    /// descriptor with `RootAlreadyExists`.
    pub fn create_root(&self, size: u64) -> PoolResult<PoolOffset> {
        if size == 0 {
            return Err(PoolError::InvalidRootSize);
        }
        let root = self.pool.install_root(size)?;
        info!("Created root at {:#x} ({} bytes)", root.offset, root.size);
        Ok(root.offset)
    }

    /// Existing root offset, or a freshly created root of `size` bytes.
    pub fn get_or_create_root(&self, size: u64) -> PoolResult<PoolOffset> {
        if let Some(root) = self.pool.root() {
            debug!("Found existing root at {:#x}", root.offset);
            return Ok(root.offset);
        }
        self.create_root(size)
    }
}
