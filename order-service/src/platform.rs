use shared::broker::Broker;
use shared::clock::Clock;
use shared::lease::KvLease;
use std::sync::Arc;

use crate::store::OrderStore;

/// The outside world the order core talks to. Production wires Postgres,
/// Kafka and the lease table in; tests wire the in-memory fakes.
pub struct CorePlatform<S> {
    pub lease: Arc<dyn KvLease>,
    pub broker: Arc<dyn Broker>,
    pub store: S,
    pub clock: Arc<dyn Clock>,
}

impl<S: OrderStore> CorePlatform<S> {
    pub fn new(lease: Arc<dyn KvLease>, broker: Arc<dyn Broker>, store: S, clock: Arc<dyn Clock>) -> Self {
        Self { lease, broker, store, clock }
    }
}

impl<S: Clone> Clone for CorePlatform<S> {
    fn clone(&self) -> Self {
        Self {
            lease: self.lease.clone(),
            broker: self.broker.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}
