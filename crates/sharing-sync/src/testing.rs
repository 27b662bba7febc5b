//! Helpers shared by the unit tests of this crate.

use std::sync::Arc;

use sharing_store::{EventBus, MemoryStore, MemoryVfs};

use crate::context::SyncContext;
use crate::transport::memory::MemoryNetwork;

pub type TestContext = SyncContext<MemoryStore, MemoryVfs>;

/// A context on in-memory stores, not connected to any peer.
pub fn context(instance: &str) -> TestContext {
    context_on(instance, &MemoryNetwork::new(), EventBus::default())
}

pub fn context_on(instance: &str, network: &MemoryNetwork, events: EventBus) -> TestContext {
    let store = Arc::new(MemoryStore::new().with_events(events.clone()));
    let vfs = Arc::new(MemoryVfs::new().with_events(events));
    SyncContext::new(instance, store, vfs, Arc::new(network.transport()))
}
