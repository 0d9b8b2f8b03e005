//! Survivor reporting: sinks, the offset registry and callback bindings.
//!
//! The sweep never knows who consumes survivor offsets. It reports into a
//! [`SurvivorSink`]; the managed side either hands over a sink directly or
//! registers a named callback in a [`BindingTable`], which is resolved once
//! into a [`SweepContext`] and passed down to every sweep.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{PoolError, PoolResult};
use crate::pool::PoolOffset;

/// Conventional name of the survivor callback on the managed side.
pub const SURVIVOR_CALLBACK: &str = "addToAddrs";

/// Receiver of survivor offsets, called once per survivor in sweep order.
pub trait SurvivorSink {
    fn report(&mut self, offset: PoolOffset);
}

impl<F> SurvivorSink for F
where
    F: FnMut(PoolOffset),
{
    fn report(&mut self, offset: PoolOffset) {
        self(offset)
    }
}

/// Thread-safe collection of reported offsets.
///
/// # Examples
///
/// ```
/// use pmroot::registry::AddrRegistry;
///
/// let registry = AddrRegistry::new();
/// registry.add_to_addrs(0x60);
/// registry.add_to_addrs(0xA0);
///
/// assert!(registry.contains(0x60));
/// assert_eq!(registry.drain(), vec![0x60, 0xA0]);
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct AddrRegistry {
    addrs: Mutex<Vec<PoolOffset>>,
}

impl AddrRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_addrs(&self, offset: PoolOffset) {
        self.addrs.lock().push(offset);
    }

    pub fn addrs(&self) -> Vec<PoolOffset> {
        self.addrs.lock().clone()
    }

    pub fn contains(&self, offset: PoolOffset) -> bool {
        self.addrs.lock().contains(&offset)
    }

    pub fn len(&self) -> usize {
        self.addrs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.lock().is_empty()
    }

    /// Take every offset collected so far.
    pub fn drain(&self) -> Vec<PoolOffset> {
        std::mem::take(&mut *self.addrs.lock())
    }
}

impl SurvivorSink for AddrRegistry {
    fn report(&mut self, offset: PoolOffset) {
        self.add_to_addrs(offset);
    }
}

/// Shared survivor callback.
pub type SurvivorCallback = Arc<dyn Fn(PoolOffset) + Send + Sync>;

/// Named callbacks registered by the managed side.
#[derive(Default)]
pub struct BindingTable {
    callbacks: DashMap<String, SurvivorCallback>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`, replacing any previous binding.
    pub fn register<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(PoolOffset) + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
    }

    /// Bind `name` to an [`AddrRegistry`].
    pub fn bind_registry(&self, name: impl Into<String>, registry: Arc<AddrRegistry>) {
        self.register(name, move |offset| registry.add_to_addrs(offset));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.callbacks.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> PoolResult<SurvivorCallback> {
        self.callbacks
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PoolError::BindingResolutionFailed(name.to_string()))
    }
}

impl fmt::Debug for BindingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.callbacks.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("BindingTable").field("callbacks", &names).finish()
    }
}

/// A resolved survivor binding, created once at startup and passed to each
/// sweep.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use pmroot::registry::{AddrRegistry, BindingTable, SweepContext, SURVIVOR_CALLBACK};
///
/// let table = BindingTable::new();
/// assert!(SweepContext::resolve(&table, SURVIVOR_CALLBACK).is_err());
///
/// let registry = Arc::new(AddrRegistry::new());
/// table.bind_registry(SURVIVOR_CALLBACK, Arc::clone(&registry));
/// let context = SweepContext::resolve(&table, SURVIVOR_CALLBACK).unwrap();
/// context.invoke(0x70);
/// assert_eq!(registry.addrs(), vec![0x70]);
/// ```
#[derive(Clone)]
pub struct SweepContext {
    name: String,
    callback: SurvivorCallback,
}

impl SweepContext {
    pub fn resolve(table: &BindingTable, name: &str) -> PoolResult<Self> {
        let callback = table.resolve(name)?;
        Ok(Self {
            name: name.to_string(),
            callback,
        })
    }

    pub fn from_callback<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(PoolOffset) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the bound callback directly.
    pub fn invoke(&self, offset: PoolOffset) {
        (self.callback)(offset)
    }
}

impl SurvivorSink for SweepContext {
    fn report(&mut self, offset: PoolOffset) {
        (self.callback)(offset)
    }
}

impl fmt::Debug for SweepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepContext").field("name", &self.name).finish()
    }
}
