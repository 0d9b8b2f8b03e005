//! Root anchoring and reclaim sweeps for memory-mapped persistent object
//! pools.
//!
//! - [`root`] finds or creates the pool's single root region.
//! - [`header`] reads the class-info tag and reference count straight from
//!   object bytes.
//! - [`sweep`] frees uninitialized and unreferenced objects and reports
//!   survivors through [`registry`].
//! - [`pool`] defines the transactional pool interface and ships
//!   [`ArenaPool`], a first-fit arena over a memory map.
//! - [`xroot`] wires all of it behind the caller-facing [`XRoot`].

pub mod config;
pub mod error;
pub mod header;
pub mod pool;
pub mod registry;
pub mod root;
pub mod sweep;
pub mod test_utils;
pub mod xroot;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use header::{HeaderLayout, HeaderView, ObjectStatus};
pub use pool::{ArenaPool, ObjectPool, PoolOffset, RootDescriptor, GENERIC_TYPE_NUM};
pub use registry::{AddrRegistry, BindingTable, SurvivorSink, SweepContext};
pub use root::RootLocator;
pub use sweep::{SweepEngine, SweepReport};
pub use xroot::XRoot;
