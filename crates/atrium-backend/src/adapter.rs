//! The backend capability contract.
//!
//! One trait covers the four capabilities every hosted generation of the hub
//! provides: ordered reads, row writes, filtered change-feed subscriptions,
//! and blob uploads, plus the auth surface. The synchronizer and directory
//! are generic over [`Backend`], so the same state machine runs against the
//! in-process [`memory`](crate::memory) store or the [`rest`](crate::rest)
//! adapter.

use std::future::Future;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use atrium_shared::{Message, MessageId, Profile, Role, TargetKey, TypingFact, UserId};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// The signed-in identity as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Fields of a message to insert. Id and creation time are assigned by the
/// backend on insert.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: UserId,
    pub target: TargetKey,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub reply_to: Option<atrium_shared::ReplyRef>,
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar_color: Option<String>,
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

/// One notification from a message change feed.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Inserted(Message),
    Updated(Message),
    Deleted(MessageId),
}

/// A live server-push subscription.
///
/// Delivery stops when the subscription is closed; dropping it closes it,
/// releasing the watcher (or polling task) on the backend side.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, on_close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Next event, or `None` once the feed is closed from the backend side.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Explicitly stop delivery and release backend resources.
    pub fn close(&mut self) {
        if let Some(f) = self.on_close.take() {
            f();
        }
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(f) = self.on_close.take() {
            f();
        }
    }
}

// ---------------------------------------------------------------------------
// The capability trait
// ---------------------------------------------------------------------------

/// Capability set of a hosted backend.
///
/// Methods return named `impl Future + Send` rather than plain `async fn` so
/// callers can hold the futures across `tokio::spawn` boundaries.
pub trait Backend: Send + Sync + 'static {
    // -- Auth --

    /// Register a new account. Fails with
    /// [`DuplicateIdentifier`](crate::BackendError::DuplicateIdentifier) when
    /// the email is taken.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> impl Future<Output = Result<Identity>> + Send;

    fn sign_in(&self, email: &str, password: &str)
        -> impl Future<Output = Result<Identity>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<()>> + Send;

    fn current_identity(&self) -> impl Future<Output = Result<Option<Identity>>> + Send;

    // -- Profiles --

    fn fetch_profiles(&self) -> impl Future<Output = Result<Vec<Profile>>> + Send;

    fn fetch_profile(&self, id: &UserId) -> impl Future<Output = Result<Profile>> + Send;

    fn update_profile(
        &self,
        id: &UserId,
        update: ProfileUpdate,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_role(&self, id: &UserId, role: Role) -> impl Future<Output = Result<()>> + Send;

    fn set_presence(
        &self,
        id: &UserId,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    // -- Messages --

    /// All messages for a target, ascending by `(created_at, id)`.
    fn fetch_messages(&self, target: &TargetKey)
        -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Count of messages on `target` newer than `since` and not authored by
    /// `exclude_sender`. Backs unread counts without shipping history.
    fn count_messages_since(
        &self,
        target: &TargetKey,
        since: DateTime<Utc>,
        exclude_sender: &UserId,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn insert_message(&self, new: NewMessage) -> impl Future<Output = Result<Message>> + Send;

    fn update_message_text(
        &self,
        id: &MessageId,
        text: &str,
        edited_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Hard removal. Once deleted the id is not retrievable.
    fn delete_message(&self, id: &MessageId) -> impl Future<Output = Result<()>> + Send;

    /// Open the change feed for one target, server-filtered by target key.
    fn subscribe_messages(
        &self,
        target: &TargetKey,
    ) -> impl Future<Output = Result<Subscription<ChangeEvent>>> + Send;

    // -- Read markers --

    /// Guarded upsert: the marker only ever moves forward. A write with `at`
    /// older than the stored marker is a no-op, so unread counts cannot
    /// regress under clock skew or replay.
    fn advance_read_marker(
        &self,
        user: &UserId,
        target: &TargetKey,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn fetch_read_marker(
        &self,
        user: &UserId,
        target: &TargetKey,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>>> + Send;

    // -- Typing --

    fn publish_typing(&self, fact: TypingFact) -> impl Future<Output = Result<()>> + Send;

    fn subscribe_typing(
        &self,
        target: &TargetKey,
    ) -> impl Future<Output = Result<Subscription<TypingFact>>> + Send;

    // -- Object storage --

    /// Upload a blob under a unique name; returns a durable public URL.
    fn upload_image(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}
