//! Helpers shared by the integration tests.

#![allow(dead_code)]

use pmroot::registry::{AddrRegistry, BindingTable, SweepContext, SURVIVOR_CALLBACK};
use std::sync::Arc;

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A registry bound under the conventional callback name, plus the
/// resolved context that feeds it.
pub fn bound_registry() -> (Arc<AddrRegistry>, SweepContext) {
    let registry = Arc::new(AddrRegistry::new());
    let table = BindingTable::new();
    table.bind_registry(SURVIVOR_CALLBACK, Arc::clone(&registry));
    let context = SweepContext::resolve(&table, SURVIVOR_CALLBACK).expect("binding resolves");
    (registry, context)
}
