use std::sync::Arc;

use crate::{
    broadcast::{Deliver, Render},
    config::RelayConfig,
    registry::{SubscriberId, SubscriberRegistry},
    source::Connector,
};
use super::service::RelayService;

/// Builder for a [`RelayService`].
pub struct RelayBuilder<Id: SubscriberId> {
    cfg: RelayConfig,
    registry: Option<Arc<SubscriberRegistry<Id>>>,
    connector: Arc<dyn Connector>,
    render: Arc<dyn Render>,
    deliver: Arc<dyn Deliver<Id>>,
}

impl<Id: SubscriberId> RelayBuilder<Id> {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        render: Arc<dyn Render>,
        deliver: Arc<dyn Deliver<Id>>,
    ) -> Self {
        Self {
            cfg: RelayConfig::default(),
            registry: None,
            connector,
            render,
            deliver,
        }
    }

    /// Replaces the default configuration.
    pub fn config(mut self, cfg: RelayConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Uses an existing registry, e.g. one shared with a command handler or
    /// pre-populated from storage.
    pub fn registry(mut self, registry: Arc<SubscriberRegistry<Id>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds the service in the `Idle` state.
    ///
    /// Nothing is spawned and no connection is made until
    /// [`RelayService::start`].
    pub fn build(self) -> Arc<RelayService<Id>> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SubscriberRegistry::new()));
        Arc::new(RelayService::new_internal(
            self.cfg,
            registry,
            self.connector,
            self.render,
            self.deliver,
        ))
    }
}
