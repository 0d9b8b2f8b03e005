//! Test utilities for pool and sweep tests
//!
//! Shared fixtures so unit tests, integration tests and benches build
//! populated pools the same way.

use std::sync::Arc;

use crate::config::PoolConfig;
use crate::error::PoolResult;
use crate::header::{HeaderLayout, HeaderView};
use crate::pool::{ArenaPool, ObjectPool, PoolOffset, GENERIC_TYPE_NUM};
use crate::xroot::XRoot;

/// Default pool capacity for tests
pub const TEST_POOL_SIZE: u64 = 1024 * 1024; // 1MB

/// Default object payload size for tests
pub const TEST_OBJECT_SIZE: u64 = 32;

/// An anonymous pool plus helpers to seed objects with given headers.
///
/// # Examples
///
/// ```
/// use pmroot::test_utils::PoolFixture;
///
/// let fixture = PoolFixture::new();
/// let obj = fixture.object(7, 2);
/// assert_eq!(fixture.header(obj), Some((7, 2)));
/// ```
pub struct PoolFixture {
    pub pool: Arc<ArenaPool>,
    pub layout: HeaderLayout,
}

impl PoolFixture {
    pub fn new() -> Self {
        Self::with_capacity(TEST_POOL_SIZE)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self::with_pool(ArenaPool::anonymous(capacity).expect("test pool"))
    }

    pub fn with_pool(pool: ArenaPool) -> Self {
        Self {
            pool: Arc::new(pool),
            layout: HeaderLayout::STANDARD,
        }
    }

    pub fn with_layout(mut self, layout: HeaderLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Allocate a generic object and write its header.
    pub fn try_object(&self, class_info: u64, ref_count: i32) -> PoolResult<PoolOffset> {
        let offset = self.pool.allocate(GENERIC_TYPE_NUM, TEST_OBJECT_SIZE)?;
        let layout = self.layout;
        self.pool.update(offset, |bytes| {
            layout.write(bytes, class_info, ref_count);
            Ok(())
        })?;
        Ok(offset)
    }

    pub fn object(&self, class_info: u64, ref_count: i32) -> PoolOffset {
        self.try_object(class_info, ref_count)
            .expect("fixture allocation")
    }

    /// Seed one object per `(class_info, ref_count)` pair, in order.
    pub fn objects(&self, headers: &[(u64, i32)]) -> Vec<PoolOffset> {
        headers
            .iter()
            .map(|&(class_info, ref_count)| self.object(class_info, ref_count))
            .collect()
    }

    /// Header of a live object, or `None` once it has been freed.
    pub fn header(&self, offset: PoolOffset) -> Option<(u64, i32)> {
        let layout = self.layout;
        self.pool
            .with_object(offset, |bytes| {
                let view = HeaderView::new(bytes, layout);
                (view.class_info(), view.ref_count())
            })
            .ok()
    }

    pub fn live_objects(&self) -> Vec<PoolOffset> {
        self.pool.objects_of_type(GENERIC_TYPE_NUM)
    }

    /// Root manager sharing this fixture's pool.
    pub fn xroot(&self) -> XRoot {
        let config = PoolConfig::builder()
            .pool_size(self.pool.capacity())
            .header_layout(self.layout)
            .build();
        XRoot::new(Arc::clone(&self.pool), config)
    }
}

impl Default for PoolFixture {
    fn default() -> Self {
        Self::new()
    }
}
