//! Shared client context.
//!
//! One explicitly-owned bundle (backend handle, channel configuration, event
//! bus) passed to every component at construction. Nothing here is ambient
//! or global; the synchronizer alone owns the mutable session/target state.

use std::sync::Arc;

use atrium_shared::{ChannelRegistry, Role, UserId};

use crate::events::EventBus;

/// Immutable wiring shared by all components.
pub struct ClientContext<B> {
    pub backend: Arc<B>,
    pub registry: Arc<ChannelRegistry>,
    pub events: EventBus,
}

impl<B> Clone for ClientContext<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
        }
    }
}

impl<B> ClientContext<B> {
    pub fn new(backend: B, registry: ChannelRegistry, events: EventBus) -> Self {
        Self {
            backend: Arc::new(backend),
            registry: Arc::new(registry),
            events,
        }
    }
}

/// Snapshot of the signed-in actor used for permission gates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}
