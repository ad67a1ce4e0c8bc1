//! Role hierarchy and action permissions.
//!
//! Pure, synchronous logic: a three-level total order over roles and a closed
//! set of named actions each gated by a minimum role. No I/O anywhere here so
//! every rule is unit-testable in isolation.

use serde::{Deserialize, Serialize};

/// User role, three-level total order: `User < Moderator < Admin`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    /// Numeric level; an unrecognized role string maps to 0 (below `User`).
    pub fn level(self) -> u8 {
        match self {
            Role::User => 1,
            Role::Moderator => 2,
            Role::Admin => 3,
        }
    }

    /// Parse a stored role string. Unknown strings yield `None`, which every
    /// permission check treats as level 0.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "moderator" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Level of a possibly-unknown role.
pub fn role_level(role: Option<Role>) -> u8 {
    role.map(Role::level).unwrap_or(0)
}

/// `true` iff `actor` meets or exceeds `required` under the role order.
pub fn has_permission(actor: Role, required: Role) -> bool {
    actor.level() >= required.level()
}

/// The closed set of permission-gated actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Send a message to an accessible target.
    SendMessage,
    /// Edit one's own message.
    EditOwnMessage,
    /// Delete one's own message.
    DeleteOwnMessage,
    /// Delete a message authored by someone else.
    DeleteAnyMessage,
    /// View moderation surfaces.
    ViewModeration,
    /// Change another user's role.
    ChangeRole,
}

impl Action {
    /// Minimum role required for this action.
    pub fn required_role(self) -> Role {
        match self {
            Action::SendMessage | Action::EditOwnMessage | Action::DeleteOwnMessage => Role::User,
            Action::DeleteAnyMessage | Action::ViewModeration => Role::Moderator,
            Action::ChangeRole => Role::Admin,
        }
    }
}

/// `true` iff `actor` may perform `action`.
pub fn may(actor: Role, action: Action) -> bool {
    has_permission(actor, action.required_role())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_order() {
        assert!(Role::Admin.level() > Role::Moderator.level());
        assert!(Role::Moderator.level() > Role::User.level());
    }

    #[test]
    fn test_permission_reflexive_and_downward() {
        for role in [Role::User, Role::Moderator, Role::Admin] {
            assert!(has_permission(role, role));
        }
        // Admin implies moderator-level and user-level access.
        assert!(has_permission(Role::Admin, Role::Moderator));
        assert!(has_permission(Role::Admin, Role::User));
        assert!(has_permission(Role::Moderator, Role::User));
        // User never implies moderator or admin access.
        assert!(!has_permission(Role::User, Role::Moderator));
        assert!(!has_permission(Role::User, Role::Admin));
        assert!(!has_permission(Role::Moderator, Role::Admin));
    }

    #[test]
    fn test_unknown_role_is_level_zero() {
        assert_eq!(role_level(Role::parse("superuser")), 0);
        assert_eq!(role_level(Role::parse("moderator")), 2);
    }

    #[test]
    fn test_action_gates() {
        assert!(may(Role::User, Action::SendMessage));
        assert!(may(Role::User, Action::DeleteOwnMessage));
        assert!(!may(Role::User, Action::DeleteAnyMessage));
        assert!(may(Role::Moderator, Action::DeleteAnyMessage));
        assert!(may(Role::Moderator, Action::ViewModeration));
        assert!(!may(Role::Moderator, Action::ChangeRole));
        assert!(may(Role::Admin, Action::ChangeRole));
    }
}
