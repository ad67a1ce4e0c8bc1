//! In-process backend used by tests and local development.
//!
//! One shared row store; any number of client handles can be attached to it
//! with [`MemoryBackend::client`], each with its own auth session, so
//! multi-actor scenarios (A sends, B observes the change feed) run inside a
//! single process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use atrium_shared::constants::MAX_IMAGE_SIZE;
use atrium_shared::{Message, MessageId, Profile, Role, TargetKey, TypingFact, UserId};

use crate::adapter::{Backend, ChangeEvent, Identity, NewMessage, ProfileUpdate, Subscription};
use crate::error::{BackendError, Result};

/// Fallback avatar colors assigned at registration.
const AVATAR_PALETTE: [&str; 6] = [
    "#e06c75", "#d19a66", "#98c379", "#56b6c2", "#61afef", "#c678dd",
];

struct Account {
    password: String,
    user_id: UserId,
}

struct Watcher<T> {
    id: u64,
    filter: String,
    tx: mpsc::UnboundedSender<T>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    profiles: HashMap<UserId, Profile>,
    messages: Vec<Message>,
    /// (user id, target filter key) -> last acknowledged read.
    markers: HashMap<(String, String), DateTime<Utc>>,
    blobs: HashMap<String, Bytes>,
    msg_watchers: Vec<Watcher<ChangeEvent>>,
    typing_watchers: Vec<Watcher<TypingFact>>,
    next_seq: u64,
    next_watcher: u64,
}

/// Shared store plus a per-handle auth session.
pub struct MemoryBackend {
    shared: Arc<Mutex<Inner>>,
    session: Arc<Mutex<Option<Identity>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Inner::default())),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// A new handle over the same store with an independent session,
    /// i.e. another signed-in browser tab or device.
    pub fn client(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            session: Arc::new(Mutex::new(None)),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<Identity>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Mint a lexicographically sortable message id.
    fn mint_message_id(&mut self) -> MessageId {
        self.next_seq += 1;
        MessageId(format!("{:016}", self.next_seq))
    }

    fn notify_messages(&mut self, filter: &str, event: &ChangeEvent) {
        self.msg_watchers
            .retain(|w| w.filter != filter || w.tx.send(event.clone()).is_ok());
    }

    fn notify_typing(&mut self, filter: &str, fact: &TypingFact) {
        self.typing_watchers
            .retain(|w| w.filter != filter || w.tx.send(fact.clone()).is_ok());
    }
}

fn avatar_color_for(id: &UserId) -> String {
    let sum: usize = id.as_str().bytes().map(usize::from).sum();
    AVATAR_PALETTE[sum % AVATAR_PALETTE.len()].to_string()
}

impl Backend for MemoryBackend {
    // -- Auth --

    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<Identity> {
        let identity = {
            let mut inner = self.inner();
            if inner.accounts.contains_key(email) {
                return Err(BackendError::DuplicateIdentifier);
            }

            let user_id = UserId::new(Uuid::new_v4().to_string());
            inner.accounts.insert(
                email.to_string(),
                Account {
                    password: password.to_string(),
                    user_id: user_id.clone(),
                },
            );
            inner.profiles.insert(
                user_id.clone(),
                Profile {
                    id: user_id.clone(),
                    display_name: display_name.to_string(),
                    avatar_url: None,
                    avatar_color: Some(avatar_color_for(&user_id)),
                    role: Role::User,
                    online: false,
                    last_seen: Utc::now(),
                },
            );
            Identity {
                user_id,
                email: email.to_string(),
            }
        };

        debug!(user = %identity.user_id, "Account registered");
        *self.session_slot() = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let identity = {
            let inner = self.inner();
            let account = inner
                .accounts
                .get(email)
                .ok_or(BackendError::InvalidCredentials)?;
            if account.password != password {
                return Err(BackendError::InvalidCredentials);
            }
            Identity {
                user_id: account.user_id.clone(),
                email: email.to_string(),
            }
        };

        *self.session_slot() = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session_slot() = None;
        Ok(())
    }

    async fn current_identity(&self) -> Result<Option<Identity>> {
        Ok(self.session_slot().clone())
    }

    // -- Profiles --

    async fn fetch_profiles(&self) -> Result<Vec<Profile>> {
        Ok(self.inner().profiles.values().cloned().collect())
    }

    async fn fetch_profile(&self, id: &UserId) -> Result<Profile> {
        self.inner()
            .profiles
            .get(id)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn update_profile(&self, id: &UserId, update: ProfileUpdate) -> Result<()> {
        let mut inner = self.inner();
        let profile = inner.profiles.get_mut(id).ok_or(BackendError::NotFound)?;
        if let Some(name) = update.display_name {
            profile.display_name = name;
        }
        if let Some(url) = update.avatar_url {
            profile.avatar_url = Some(url);
        }
        if let Some(color) = update.avatar_color {
            profile.avatar_color = Some(color);
        }
        Ok(())
    }

    async fn set_role(&self, id: &UserId, role: Role) -> Result<()> {
        let mut inner = self.inner();
        let profile = inner.profiles.get_mut(id).ok_or(BackendError::NotFound)?;
        profile.role = role;
        Ok(())
    }

    async fn set_presence(
        &self,
        id: &UserId,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner();
        let profile = inner.profiles.get_mut(id).ok_or(BackendError::NotFound)?;
        profile.online = online;
        profile.last_seen = last_seen;
        Ok(())
    }

    // -- Messages --

    async fn fetch_messages(&self, target: &TargetKey) -> Result<Vec<Message>> {
        let mut rows: Vec<Message> = self
            .inner()
            .messages
            .iter()
            .filter(|m| &m.target == target)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(rows)
    }

    async fn count_messages_since(
        &self,
        target: &TargetKey,
        since: DateTime<Utc>,
        exclude_sender: &UserId,
    ) -> Result<u64> {
        Ok(self
            .inner()
            .messages
            .iter()
            .filter(|m| &m.target == target && &m.sender != exclude_sender && m.created_at > since)
            .count() as u64)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let mut inner = self.inner();
        let message = Message {
            id: inner.mint_message_id(),
            sender: new.sender,
            target: new.target,
            text: new.text,
            image_url: new.image_url,
            reply_to: new.reply_to,
            created_at: Utc::now(),
            edited_at: None,
        };
        inner.messages.push(message.clone());

        let filter = message.target.filter_key();
        inner.notify_messages(&filter, &ChangeEvent::Inserted(message.clone()));
        Ok(message)
    }

    async fn update_message_text(
        &self,
        id: &MessageId,
        text: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner();
        let message = inner
            .messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or(BackendError::NotFound)?;
        message.text = Some(text.to_string());
        message.edited_at = Some(edited_at);

        let updated = message.clone();
        let filter = updated.target.filter_key();
        inner.notify_messages(&filter, &ChangeEvent::Updated(updated));
        Ok(())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let mut inner = self.inner();
        let pos = inner
            .messages
            .iter()
            .position(|m| &m.id == id)
            .ok_or(BackendError::NotFound)?;
        let removed = inner.messages.remove(pos);

        let filter = removed.target.filter_key();
        inner.notify_messages(&filter, &ChangeEvent::Deleted(removed.id));
        Ok(())
    }

    async fn subscribe_messages(&self, target: &TargetKey) -> Result<Subscription<ChangeEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher_id = {
            let mut inner = self.inner();
            inner.next_watcher += 1;
            let id = inner.next_watcher;
            inner.msg_watchers.push(Watcher {
                id,
                filter: target.filter_key(),
                tx,
            });
            id
        };

        let shared = Arc::clone(&self.shared);
        Ok(Subscription::new(rx, move || {
            let mut inner = shared.lock().unwrap_or_else(|e| e.into_inner());
            inner.msg_watchers.retain(|w| w.id != watcher_id);
        }))
    }

    // -- Read markers --

    async fn advance_read_marker(
        &self,
        user: &UserId,
        target: &TargetKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner();
        let entry = inner
            .markers
            .entry((user.0.clone(), target.filter_key()))
            .or_insert(at);
        // Only-if-newer guard: a replayed or skewed write never regresses.
        if at > *entry {
            *entry = at;
        }
        Ok(())
    }

    async fn fetch_read_marker(
        &self,
        user: &UserId,
        target: &TargetKey,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .inner()
            .markers
            .get(&(user.0.clone(), target.filter_key()))
            .copied())
    }

    // -- Typing --

    async fn publish_typing(&self, fact: TypingFact) -> Result<()> {
        let filter = fact.target.filter_key();
        self.inner().notify_typing(&filter, &fact);
        Ok(())
    }

    async fn subscribe_typing(&self, target: &TargetKey) -> Result<Subscription<TypingFact>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher_id = {
            let mut inner = self.inner();
            inner.next_watcher += 1;
            let id = inner.next_watcher;
            inner.typing_watchers.push(Watcher {
                id,
                filter: target.filter_key(),
                tx,
            });
            id
        };

        let shared = Arc::clone(&self.shared);
        Ok(Subscription::new(rx, move || {
            let mut inner = shared.lock().unwrap_or_else(|e| e.into_inner());
            inner.typing_watchers.retain(|w| w.id != watcher_id);
        }))
    }

    // -- Object storage --

    async fn upload_image(&self, name: &str, data: Bytes, _content_type: &str) -> Result<String> {
        if data.is_empty() {
            return Err(BackendError::Rejected("Empty blob".to_string()));
        }
        if data.len() > MAX_IMAGE_SIZE {
            return Err(BackendError::BlobTooLarge {
                size: data.len(),
                max: MAX_IMAGE_SIZE,
            });
        }

        let mut inner = self.inner();
        inner.blobs.insert(name.to_string(), data);
        Ok(format!("mem://images/{name}"))
    }
}
