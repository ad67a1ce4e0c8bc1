//! Admin panel operations.
//!
//! Thin permission-checked surface over the profile table. The backend is
//! expected to enforce the same rules server-side as defense in depth.

use tracing::info;

use atrium_backend::Backend;
use atrium_shared::{may, Action, Profile, Role, UserId};

use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::state::{Actor, ClientContext};

pub struct AdminPanel<B> {
    ctx: ClientContext<B>,
}

impl<B: Backend> AdminPanel<B> {
    pub fn new(ctx: ClientContext<B>) -> Self {
        Self { ctx }
    }

    /// All profiles, for the moderation surface.
    pub async fn list_profiles(&self, actor: &Actor) -> Result<Vec<Profile>> {
        if !may(actor.role, Action::ViewModeration) {
            return Err(ClientError::PermissionDenied(
                "Moderation surfaces require moderator role".to_string(),
            ));
        }
        Ok(self.ctx.backend.fetch_profiles().await?)
    }

    /// Change a user's role. Admin only; any last-admin safeguard is the
    /// backend's concern, not checked here.
    pub async fn change_role(&self, actor: &Actor, user: &UserId, role: Role) -> Result<()> {
        if !may(actor.role, Action::ChangeRole) {
            return Err(ClientError::PermissionDenied(
                "Only admins can change roles".to_string(),
            ));
        }

        self.ctx.backend.set_role(user, role).await?;
        info!(user = %user, role = %role, by = %actor.id, "Role changed");
        self.ctx.events.emit(ClientEvent::DirectoryChanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use atrium_backend::{Backend as _, MemoryBackend};
    use atrium_shared::ChannelRegistry;

    async fn fixture() -> (AdminPanel<MemoryBackend>, MemoryBackend, UserId, UserId) {
        let store = MemoryBackend::new();
        let admin = store.sign_up("admin@hub.test", "pw", "Root").await.unwrap();
        store
            .set_role(&admin.user_id, Role::Admin)
            .await
            .unwrap();
        let user = store
            .client()
            .sign_up("u@hub.test", "pw", "Uma")
            .await
            .unwrap();

        let (events, _rx) = EventBus::new();
        let ctx = ClientContext::new(store.client(), ChannelRegistry::default(), events);
        (AdminPanel::new(ctx), store, admin.user_id, user.user_id)
    }

    #[tokio::test]
    async fn test_role_change_requires_admin() {
        let (panel, store, admin_id, user_id) = fixture().await;

        let as_user = Actor {
            id: user_id.clone(),
            role: Role::User,
        };
        let err = panel
            .change_role(&as_user, &admin_id, Role::User)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PermissionDenied(_)));

        let as_admin = Actor {
            id: admin_id,
            role: Role::Admin,
        };
        panel
            .change_role(&as_admin, &user_id, Role::Moderator)
            .await
            .unwrap();
        let profile = store.fetch_profile(&user_id).await.unwrap();
        assert_eq!(profile.role, Role::Moderator);

        // Changing one's own role goes through; protecting the last admin is
        // left to the backend.
        panel
            .change_role(&as_admin, &as_admin.id, Role::Moderator)
            .await
            .unwrap();
        let profile = store.fetch_profile(&as_admin.id).await.unwrap();
        assert_eq!(profile.role, Role::Moderator);
    }

    #[tokio::test]
    async fn test_moderation_list_gated() {
        let (panel, _store, admin_id, _user_id) = fixture().await;
        let as_user = Actor {
            id: UserId::new("nobody"),
            role: Role::User,
        };
        assert!(panel.list_profiles(&as_user).await.is_err());

        let as_admin = Actor {
            id: admin_id,
            role: Role::Admin,
        };
        assert_eq!(panel.list_profiles(&as_admin).await.unwrap().len(), 2);
    }
}
