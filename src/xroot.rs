//! Caller-facing root manager.
//!
//! [`XRoot`] bundles the pool handle with the configured header layout and
//! exposes the four bridge operations: root existence, root offset, root
//! creation and the anchored-address sweep. It also keeps cumulative sweep
//! counters for the lifetime of the handle.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use log::info;

use crate::config::PoolConfig;
use crate::error::PoolResult;
use crate::header::HeaderLayout;
use crate::pool::{ArenaPool, ObjectPool, PoolOffset, RootDescriptor};
use crate::registry::{SurvivorSink, SweepContext};
use crate::root::RootLocator;
use crate::sweep::{SweepEngine, SweepReport};

/// Totals across every sweep run through one [`XRoot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepTotals {
    pub sweeps: u64,
    pub reclaimed: u64,
    pub survivors_reported: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct SweepCounters {
    sweeps: AtomicU64,
    reclaimed: AtomicU64,
    survivors_reported: AtomicU64,
    failures: AtomicU64,
}

impl SweepCounters {
    fn record(&self, report: &SweepReport) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.reclaimed
            .fetch_add(report.reclaimed() as u64, Ordering::Relaxed);
        self.survivors_reported
            .fetch_add(report.survivors as u64, Ordering::Relaxed);
        self.failures
            .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SweepTotals {
        SweepTotals {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            survivors_reported: self.survivors_reported.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Root manager over one pool.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use pmroot::config::PoolConfig;
/// use pmroot::registry::{AddrRegistry, BindingTable, SweepContext, SURVIVOR_CALLBACK};
/// use pmroot::xroot::XRoot;
///
/// let config = PoolConfig::builder().pool_size(256 * 1024).build();
/// let xroot = XRoot::open(&config).unwrap();
///
/// if !xroot.root_exists() {
///     xroot.create_root(config.root_size).unwrap();
/// }
/// let root = xroot.root_offset().unwrap();
///
/// let registry = Arc::new(AddrRegistry::new());
/// let bindings = BindingTable::new();
/// bindings.bind_registry(SURVIVOR_CALLBACK, Arc::clone(&registry));
/// let context = SweepContext::resolve(&bindings, SURVIVOR_CALLBACK).unwrap();
///
/// let report = xroot.retrieve_anchored_addrs(&context);
/// assert!(report.is_clean());
/// assert!(registry.is_empty());
/// assert_eq!(xroot.root_offset().unwrap(), root);
/// ```
pub struct XRoot<P: ObjectPool = ArenaPool> {
    pool: Arc<P>,
    config: PoolConfig,
    counters: SweepCounters,
}

impl XRoot<ArenaPool> {
    /// Open the pool described by `config`: the backing file if one is
    /// configured (created when missing), anonymous memory otherwise.
    pub fn open(config: &PoolConfig) -> anyhow::Result<Self> {
        let pool = match &config.pool_path {
            Some(path) => open_or_create(path, config.pool_size)?,
            None => ArenaPool::anonymous(config.pool_size)
                .with_context(|| format!("creating anonymous pool of {} bytes", config.pool_size))?,
        };
        Ok(Self::new(Arc::new(pool), config.clone()))
    }

    /// Open the pool described by the `PMROOT_*` environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::open(&PoolConfig::from_env())
    }
}

fn open_or_create(path: &Path, size: u64) -> anyhow::Result<ArenaPool> {
    if path.exists() {
        ArenaPool::open(path).with_context(|| format!("opening pool {}", path.display()))
    } else {
        ArenaPool::create(path, size)
            .with_context(|| format!("creating pool {} ({} bytes)", path.display(), size))
    }
}

impl<P: ObjectPool> XRoot<P> {
    pub fn new(pool: Arc<P>, config: PoolConfig) -> Self {
        info!(
            "Root manager attached to pool of {} bytes (layout {:?})",
            pool.capacity(),
            config.header_layout
        );
        Self {
            pool,
            config,
            counters: SweepCounters::default(),
        }
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn layout(&self) -> HeaderLayout {
        self.config.header_layout
    }

    pub fn locator(&self) -> RootLocator<'_, P> {
        RootLocator::new(&*self.pool)
    }

    pub fn engine(&self) -> SweepEngine<'_, P> {
        SweepEngine::new(&*self.pool)
            .with_layout(self.config.header_layout)
            .with_type_num(self.config.object_type)
    }

    pub fn root_exists(&self) -> bool {
        self.locator().root_exists()
    }

    pub fn root(&self) -> Option<RootDescriptor> {
        self.locator().root()
    }

    pub fn root_offset(&self) -> PoolResult<PoolOffset> {
        self.locator().root_offset()
    }

    pub fn create_root(&self, size: u64) -> PoolResult<PoolOffset> {
        self.locator().create_root(size)
    }

    /// Existing root, or a new one of the configured root size.
    pub fn get_or_create_root(&self) -> PoolResult<PoolOffset> {
        self.locator().get_or_create_root(self.config.root_size)
    }

    /// Sweep the pool and report every survivor through the resolved
    /// binding. Per-object failures are returned inside the report.
    pub fn retrieve_anchored_addrs(&self, context: &SweepContext) -> SweepReport {
        let mut sink = context.clone();
        self.sweep_into(&mut sink)
    }

    pub fn sweep_into<S>(&self, sink: &mut S) -> SweepReport
    where
        S: SurvivorSink + ?Sized,
    {
        let report = self.engine().sweep(sink);
        self.counters.record(&report);
        report
    }

    /// Add one anchor to the object at `offset`.
    pub fn anchor(&self, offset: PoolOffset) -> PoolResult<i32> {
        self.pool.adjust_ref_count(offset, self.layout(), 1)
    }

    /// Drop one anchor from the object at `offset`.
    pub fn release(&self, offset: PoolOffset) -> PoolResult<i32> {
        self.pool.adjust_ref_count(offset, self.layout(), -1)
    }

    pub fn totals(&self) -> SweepTotals {
        self.counters.snapshot()
    }
}
