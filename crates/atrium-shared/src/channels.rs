//! Static channel configuration.
//!
//! Channels are configuration, not data: the set is fixed at startup and is
//! never created or destroyed at runtime. Declaration order is the display
//! order.

use crate::permissions::{has_permission, Role};
use crate::types::ChannelId;

/// One configured channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDef {
    pub id: ChannelId,
    pub name: String,
    /// Minimum role required to read or write. `None` admits any
    /// authenticated user.
    pub min_role: Option<Role>,
}

impl ChannelDef {
    pub fn new(id: &str, name: &str, min_role: Option<Role>) -> Self {
        Self {
            id: ChannelId::new(id),
            name: name.to_string(),
            min_role,
        }
    }

    /// A user may access the channel iff their role meets the gate.
    pub fn accessible_by(&self, role: Role) -> bool {
        match self.min_role {
            Some(required) => has_permission(role, required),
            None => true,
        }
    }
}

/// The full, ordered channel set for this deployment.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: Vec<ChannelDef>,
}

impl ChannelRegistry {
    pub fn new(channels: Vec<ChannelDef>) -> Self {
        Self { channels }
    }

    /// All channels, declaration order.
    pub fn all(&self) -> &[ChannelDef] {
        &self.channels
    }

    /// Channels the given role may access, declaration order preserved.
    pub fn accessible(&self, role: Role) -> impl Iterator<Item = &ChannelDef> {
        self.channels.iter().filter(move |c| c.accessible_by(role))
    }

    pub fn get(&self, id: &ChannelId) -> Option<&ChannelDef> {
        self.channels.iter().find(|c| &c.id == id)
    }
}

impl Default for ChannelRegistry {
    /// The hub's stock channel set.
    fn default() -> Self {
        Self::new(vec![
            ChannelDef::new("general", "General", None),
            ChannelDef::new("random", "Random", None),
            ChannelDef::new("moderators", "Moderators", Some(Role::Moderator)),
        ])
    }
}
