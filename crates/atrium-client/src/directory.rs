//! Conversation directory: the ordered list of selectable targets.
//!
//! Channels the signed-in user may access come first (declaration order),
//! followed by direct-message candidates (online first, then recency of
//! last-seen). Every entry carries an unread count; user entries also carry
//! presence. Refreshes fail soft: a backend error logs, keeps the prior
//! list, and never crashes the UI.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use atrium_backend::{Backend, ProfileUpdate};
use atrium_shared::{Profile, TargetKey, UserId};

use crate::error::Result;
use crate::events::{ClientEvent, EventBus};
use crate::state::{Actor, ClientContext};

/// One selectable row in the directory.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub target: TargetKey,
    pub title: String,
    pub unread: u64,
    /// Presence, for direct-message entries only.
    pub online: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
    pub peer: Option<UserId>,
}

#[derive(Default)]
struct DirState {
    /// Other users, sorted for display.
    users: Vec<Profile>,
    /// All known profiles (including self) for name lookups.
    by_id: HashMap<UserId, Profile>,
    /// Unread count per target filter key.
    unread: HashMap<String, u64>,
}

pub struct Directory<B> {
    ctx: ClientContext<B>,
    inner: Arc<Mutex<DirState>>,
}

impl<B: Backend> Directory<B> {
    pub fn new(ctx: ClientContext<B>) -> Self {
        Self {
            ctx,
            inner: Arc::new(Mutex::new(DirState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DirState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-fetch the user list. Self is excluded; ordering is online-first,
    /// then recency of last-seen. Soft-fails on backend error.
    pub async fn refresh_users(&self, me: &UserId) {
        let profiles = match self.ctx.backend.fetch_profiles().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "User list refresh failed, keeping prior list");
                return;
            }
        };

        let mut others: Vec<Profile> = profiles
            .iter()
            .filter(|p| &p.id != me)
            .cloned()
            .collect();
        others.sort_by(|a, b| {
            b.online
                .cmp(&a.online)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });

        {
            let mut state = self.lock();
            state.by_id = profiles.into_iter().map(|p| (p.id.clone(), p)).collect();
            state.users = others;
        }
        self.ctx.events.emit(ClientEvent::DirectoryChanged);
    }

    /// Recompute unread counts for every visible target. Counts are fetched
    /// as counts, not histories, so cost stays bounded by the target list.
    pub async fn refresh_unread_counts(&self, actor: &Actor) {
        let targets: Vec<TargetKey> = self.targets_for(actor);

        let mut fresh: HashMap<String, u64> = HashMap::new();
        for target in targets {
            let marker = match self.ctx.backend.fetch_read_marker(&actor.id, &target).await {
                Ok(m) => m.unwrap_or(DateTime::<Utc>::MIN_UTC),
                Err(e) => {
                    warn!(key = %target, error = %e, "Read marker fetch failed");
                    continue;
                }
            };
            match self
                .ctx
                .backend
                .count_messages_since(&target, marker, &actor.id)
                .await
            {
                Ok(n) => {
                    fresh.insert(target.filter_key(), n);
                }
                Err(e) => warn!(key = %target, error = %e, "Unread count failed"),
            }
        }

        {
            let mut state = self.lock();
            // Targets that failed keep their previous count.
            for (key, n) in fresh {
                state.unread.insert(key, n);
            }
        }
        self.ctx.events.emit(ClientEvent::DirectoryChanged);
    }

    /// Mark a target selected: zero its displayed unread count immediately
    /// and advance the read marker fire-and-forget. A marker write failure
    /// is logged but never blocks target switching.
    pub fn select_target(&self, actor: &Actor, target: &TargetKey) {
        {
            let mut state = self.lock();
            state.unread.insert(target.filter_key(), 0);
        }
        self.ctx.events.emit(ClientEvent::DirectoryChanged);

        let backend = Arc::clone(&self.ctx.backend);
        let user = actor.id.clone();
        let target = target.clone();
        tokio::spawn(async move {
            if let Err(e) = backend
                .advance_read_marker(&user, &target, Utc::now())
                .await
            {
                warn!(key = %target, error = %e, "Read marker write failed");
            } else {
                debug!(key = %target, "Read marker advanced");
            }
        });
    }

    /// The ordered entry list for the signed-in actor.
    pub fn entries(&self, actor: &Actor) -> Vec<DirectoryEntry> {
        let state = self.lock();
        let mut entries = Vec::new();

        for channel in self.ctx.registry.accessible(actor.role) {
            let target = TargetKey::Channel(channel.id.clone());
            entries.push(DirectoryEntry {
                unread: state.unread.get(&target.filter_key()).copied().unwrap_or(0),
                title: channel.name.clone(),
                target,
                online: None,
                last_seen: None,
                peer: None,
            });
        }

        for user in &state.users {
            let target = TargetKey::direct(&actor.id, &user.id);
            entries.push(DirectoryEntry {
                unread: state.unread.get(&target.filter_key()).copied().unwrap_or(0),
                title: user.display_name.clone(),
                target,
                online: Some(user.online),
                last_seen: Some(user.last_seen),
                peer: Some(user.id.clone()),
            });
        }

        entries
    }

    /// Profile lookup for rendering (includes self).
    pub fn profile(&self, id: &UserId) -> Option<Profile> {
        self.lock().by_id.get(id).cloned()
    }

    /// Update the signed-in user's own profile fields, then re-fetch so the
    /// cache and every rendered name pick the change up.
    pub async fn update_profile(&self, me: &UserId, update: ProfileUpdate) -> Result<()> {
        self.ctx.backend.update_profile(me, update).await?;
        debug!(user = %me, "Profile updated");
        self.refresh_users(me).await;
        Ok(())
    }

    /// The signed-in actor snapshot (id + role) from the cached profiles,
    /// re-fetching when the profile is not cached yet.
    pub async fn actor(&self, me: &UserId) -> Result<Actor> {
        if let Some(profile) = self.profile(me) {
            return Ok(Actor {
                id: profile.id,
                role: profile.role,
            });
        }
        let profile = self.ctx.backend.fetch_profile(me).await?;
        Ok(Actor {
            id: profile.id,
            role: profile.role,
        })
    }

    fn targets_for(&self, actor: &Actor) -> Vec<TargetKey> {
        let state = self.lock();
        self.ctx
            .registry
            .accessible(actor.role)
            .map(|c| TargetKey::Channel(c.id.clone()))
            .chain(
                state
                    .users
                    .iter()
                    .map(|u| TargetKey::direct(&actor.id, &u.id)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_backend::{MemoryBackend, NewMessage};
    use atrium_shared::{ChannelRegistry, Role};

    async fn fixture() -> (Directory<MemoryBackend>, MemoryBackend, Actor, UserId) {
        let store = MemoryBackend::new();
        let alice = store.sign_up("a@hub.test", "pw", "Alice").await.unwrap();
        let bob = store.client();
        let bob_id = bob.sign_up("b@hub.test", "pw", "Bob").await.unwrap();

        let (events, _rx) = EventBus::new();
        let ctx = ClientContext::new(store.client(), ChannelRegistry::default(), events);
        let directory = Directory::new(ctx);
        let actor = Actor {
            id: alice.user_id,
            role: Role::User,
        };
        (directory, store, actor, bob_id.user_id)
    }

    #[tokio::test]
    async fn test_entries_exclude_self_and_gate_channels() {
        let (directory, _store, actor, bob) = fixture().await;
        directory.refresh_users(&actor.id).await;

        let entries = directory.entries(&actor);
        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        // User role: no moderators channel, and Alice herself is absent.
        assert_eq!(titles, ["General", "Random", "Bob"]);
        assert_eq!(entries[2].peer.as_ref(), Some(&bob));
    }

    #[tokio::test]
    async fn test_unread_zeroed_on_select_until_new_message() {
        let (directory, store, actor, bob) = fixture().await;
        directory.refresh_users(&actor.id).await;

        let dm = TargetKey::direct(&actor.id, &bob);
        store
            .insert_message(NewMessage {
                sender: bob.clone(),
                target: dm.clone(),
                text: Some("hey".to_string()),
                image_url: None,
                reply_to: None,
            })
            .await
            .unwrap();

        directory.refresh_unread_counts(&actor).await;
        let unread = |d: &Directory<MemoryBackend>| {
            d.entries(&actor)
                .into_iter()
                .find(|e| e.target == dm)
                .map(|e| e.unread)
                .unwrap()
        };
        assert_eq!(unread(&directory), 1);

        directory.select_target(&actor, &dm);
        assert_eq!(unread(&directory), 0);

        // Marker write is spawned; give it a tick, then recompute.
        tokio::task::yield_now().await;
        directory.refresh_unread_counts(&actor).await;
        assert_eq!(unread(&directory), 0);
    }

    #[tokio::test]
    async fn test_profile_update_refreshes_cache() {
        let (directory, _store, actor, _bob) = fixture().await;
        directory.refresh_users(&actor.id).await;
        assert_eq!(
            directory.profile(&actor.id).map(|p| p.display_name),
            Some("Alice".to_string())
        );

        directory
            .update_profile(
                &actor.id,
                ProfileUpdate {
                    display_name: Some("Alicia".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            directory.profile(&actor.id).map(|p| p.display_name),
            Some("Alicia".to_string())
        );
    }

    #[tokio::test]
    async fn test_own_messages_never_count_as_unread() {
        let (directory, store, actor, bob) = fixture().await;
        directory.refresh_users(&actor.id).await;

        let dm = TargetKey::direct(&actor.id, &bob);
        store
            .insert_message(NewMessage {
                sender: actor.id.clone(),
                target: dm.clone(),
                text: Some("from me".to_string()),
                image_url: None,
                reply_to: None,
            })
            .await
            .unwrap();

        directory.refresh_unread_counts(&actor).await;
        let entry = directory
            .entries(&actor)
            .into_iter()
            .find(|e| e.target == dm)
            .unwrap();
        assert_eq!(entry.unread, 0);
    }
}
