//! Message stream synchronizer: the single owner of live conversation state.
//!
//! Per active target the synchronizer runs `Idle → Loading → Live →
//! Reloading → Live`. Entering a target opens exactly one message
//! subscription and one typing subscription; switching targets tears the old
//! pair down before the new one is established. Any change-feed event
//! triggers a full re-fetch-and-replace of the visible list rather than a
//! differential patch, which sidesteps out-of-order delivery at the cost of
//! an O(n) re-render per event. Every fetch is tagged with the generation
//! current when it was issued; a completion for an older generation is
//! discarded, so a stale response can never repaint an abandoned target.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use atrium_backend::{Backend, BackendError, ChangeEvent, NewMessage, Subscription};
use atrium_shared::constants::{MAX_IMAGE_SIZE, MAX_TEXT_CHARS};
use atrium_shared::{may, Action, Message, MessageId, ReplyRef, TargetKey, TypingFact};

use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::presence::TypingObserver;
use crate::state::{Actor, ClientContext};

/// Synchronizer lifecycle for the active target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No target selected.
    Idle,
    /// Initial fetch in flight.
    Loading,
    /// Subscribed; the list reflects the last completed fetch.
    Live,
    /// A change event triggered a re-fetch while still subscribed.
    Reloading,
}

/// A pending image attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Bytes,
    pub content_type: String,
}

/// Input captured from the compose box for one send.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: String,
    pub image: Option<Attachment>,
    pub reply_to: Option<ReplyRef>,
}

struct SyncInner {
    actor: Option<Actor>,
    active: Option<TargetKey>,
    /// Bumped on every target switch; stale fetch completions compare
    /// against it and drop themselves.
    generation: u64,
    state: SyncState,
    messages: Vec<Message>,
    send_in_progress: bool,
    feed_task: Option<JoinHandle<()>>,
}

pub struct Synchronizer<B: Backend> {
    ctx: ClientContext<B>,
    observer: TypingObserver,
    inner: Arc<Mutex<SyncInner>>,
}

impl<B: Backend> Clone for Synchronizer<B> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            observer: self.observer.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> Synchronizer<B> {
    pub fn new(ctx: ClientContext<B>, observer: TypingObserver) -> Self {
        Self {
            ctx,
            observer,
            inner: Arc::new(Mutex::new(SyncInner {
                actor: None,
                active: None,
                generation: 0,
                state: SyncState::Idle,
                messages: Vec::new(),
                send_in_progress: false,
                feed_task: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncInner> {
        // Plain mutex: no await point ever holds this lock.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the signed-in actor used for permission gates.
    pub fn set_actor(&self, actor: Option<Actor>) {
        self.lock().actor = actor;
    }

    pub fn actor(&self) -> Option<Actor> {
        self.lock().actor.clone()
    }

    pub fn state(&self) -> SyncState {
        self.lock().state
    }

    pub fn active_target(&self) -> Option<TargetKey> {
        self.lock().active.clone()
    }

    /// Snapshot of the visible message list, ascending by creation.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn send_in_progress(&self) -> bool {
        self.lock().send_in_progress
    }

    /// Switch the active target (or clear it with `None`).
    ///
    /// The previous subscriptions are torn down before the new ones open, so
    /// at most one message feed and one typing feed are live at any time.
    pub async fn activate(&self, target: Option<TargetKey>) -> Result<()> {
        if let Some(TargetKey::Channel(id)) = &target {
            let actor = self.actor().ok_or(ClientError::Unauthenticated)?;
            let channel = self
                .ctx
                .registry
                .get(id)
                .ok_or_else(|| ClientError::Validation(format!("Unknown channel '{id}'")))?;
            if !channel.accessible_by(actor.role) {
                return Err(ClientError::PermissionDenied(format!(
                    "Channel '{}' requires {} role",
                    channel.name,
                    channel.min_role.map(|r| r.as_str()).unwrap_or("member"),
                )));
            }
        }

        let (generation, old_task) = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.active = target.clone();
            inner.messages.clear();
            inner.state = if target.is_some() {
                SyncState::Loading
            } else {
                SyncState::Idle
            };
            (inner.generation, inner.feed_task.take())
        };
        self.observer.clear();

        if let Some(handle) = old_task {
            // Abort and await so the old subscriptions are dropped (and
            // their backend watchers released) before we open new ones.
            handle.abort();
            let _ = handle.await;
        }

        let Some(target) = target else {
            debug!("Synchronizer idle");
            return Ok(());
        };

        let messages = match self.ctx.backend.subscribe_messages(&target).await {
            Ok(sub) => sub,
            Err(e) => {
                self.fail_activation(generation);
                return Err(e.into());
            }
        };
        let typing = match self.ctx.backend.subscribe_typing(&target).await {
            Ok(sub) => sub,
            Err(e) => {
                self.fail_activation(generation);
                return Err(e.into());
            }
        };

        {
            let mut inner = self.lock();
            if inner.generation != generation {
                // A newer switch raced us; dropping the subscriptions here
                // closes them.
                return Ok(());
            }
            let feed = self.clone();
            inner.feed_task = Some(tokio::spawn(feed.run_feed(generation, messages, typing)));
        }

        info!(key = %target, "Target activated");
        self.refetch(generation).await;
        Ok(())
    }

    fn fail_activation(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.active = None;
            inner.state = SyncState::Idle;
        }
    }

    /// Send the composed draft to the active target.
    ///
    /// Validation and permission checks run before any network call. If an
    /// image is attached it is uploaded first; an upload failure aborts the
    /// whole send. On any failure the error is surfaced as a recoverable
    /// notice and returned so the composer can restore the draft text.
    pub async fn send(&self, draft: Draft) -> Result<()> {
        let actor = self.actor().ok_or(ClientError::Unauthenticated)?;
        let target = self
            .active_target()
            .ok_or_else(|| ClientError::Validation("No conversation selected".to_string()))?;

        let text = draft.text.trim().to_string();
        if text.is_empty() && draft.image.is_none() {
            return Err(ClientError::Validation(
                "Message needs text or an image".to_string(),
            ));
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(ClientError::Validation("Message is too long".to_string()));
        }
        if let Some(image) = &draft.image {
            if image.bytes.len() > MAX_IMAGE_SIZE {
                return Err(ClientError::Validation("Image is too large".to_string()));
            }
        }
        if let TargetKey::Channel(id) = &target {
            let accessible = self
                .ctx
                .registry
                .get(id)
                .map(|c| c.accessible_by(actor.role))
                .unwrap_or(false);
            if !accessible {
                return Err(ClientError::PermissionDenied(format!(
                    "Cannot write to channel '{id}'"
                )));
            }
        }

        {
            let mut inner = self.lock();
            if inner.send_in_progress {
                return Err(ClientError::Validation(
                    "A send is already in progress".to_string(),
                ));
            }
            inner.send_in_progress = true;
        }

        let result = self
            .perform_send(&actor, &target, text, draft.image, draft.reply_to)
            .await;
        self.lock().send_in_progress = false;

        if let Err(e) = &result {
            warn!(key = %target, error = %e, "Send failed");
            self.ctx.events.notice(format!("Could not send message: {e}"));
        }
        result
    }

    async fn perform_send(
        &self,
        actor: &Actor,
        target: &TargetKey,
        text: String,
        image: Option<Attachment>,
        reply_to: Option<ReplyRef>,
    ) -> Result<()> {
        let image_url = match image {
            Some(attachment) => {
                let name = format!("{}-{}", Uuid::new_v4(), attachment.file_name);
                let url = self
                    .ctx
                    .backend
                    .upload_image(&name, attachment.bytes, &attachment.content_type)
                    .await?;
                Some(url)
            }
            None => None,
        };

        let message = self
            .ctx
            .backend
            .insert_message(NewMessage {
                sender: actor.id.clone(),
                target: target.clone(),
                text: if text.is_empty() { None } else { Some(text) },
                image_url,
                reply_to,
            })
            .await?;

        debug!(id = %message.id, key = %target, "Message sent");
        Ok(())
    }

    /// Edit one's own message. Empty or unchanged text is a no-op; the view
    /// is refreshed by the subscription's update event, not patched locally.
    pub async fn edit(&self, id: &MessageId, new_text: &str) -> Result<()> {
        let actor = self.actor().ok_or(ClientError::Unauthenticated)?;
        let Some(existing) = self.find_visible(id) else {
            return Err(ClientError::Stale(format!("Message {id} is not visible")));
        };
        if existing.sender != actor.id {
            return Err(ClientError::PermissionDenied(
                "Only your own messages can be edited".to_string(),
            ));
        }

        let text = new_text.trim();
        if text.is_empty() || Some(text) == existing.text.as_deref() {
            return Ok(());
        }

        match self
            .ctx
            .backend
            .update_message_text(id, text, Utc::now())
            .await
        {
            Ok(()) => Ok(()),
            // Deleted under us: the feed will reconcile the view.
            Err(BackendError::NotFound) => Ok(()),
            Err(e) => {
                warn!(id = %id, error = %e, "Edit failed");
                self.ctx.events.notice("Could not edit message");
                Err(e.into())
            }
        }
    }

    /// Delete a message: allowed for the author, or for actors holding the
    /// delete-others capability. Confirmation is the boundary layer's job.
    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        let actor = self.actor().ok_or(ClientError::Unauthenticated)?;
        let Some(existing) = self.find_visible(id) else {
            return Err(ClientError::Stale(format!("Message {id} is not visible")));
        };
        if existing.sender != actor.id && !may(actor.role, Action::DeleteAnyMessage) {
            return Err(ClientError::PermissionDenied(
                "Cannot delete another user's message".to_string(),
            ));
        }

        match self.ctx.backend.delete_message(id).await {
            Ok(()) => Ok(()),
            Err(BackendError::NotFound) => Ok(()),
            Err(e) => {
                warn!(id = %id, error = %e, "Delete failed");
                self.ctx.events.notice("Could not delete message");
                Err(e.into())
            }
        }
    }

    fn find_visible(&self, id: &MessageId) -> Option<Message> {
        self.lock().messages.iter().find(|m| &m.id == id).cloned()
    }

    /// Full re-fetch-and-replace for the generation's target. Stale
    /// completions (older generation) are discarded without touching state.
    async fn refetch(&self, generation: u64) {
        let target = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            let Some(target) = inner.active.clone() else {
                return;
            };
            if inner.state == SyncState::Live {
                inner.state = SyncState::Reloading;
            }
            target
        };

        match self.ctx.backend.fetch_messages(&target).await {
            Ok(rows) => {
                {
                    let mut inner = self.lock();
                    if inner.generation != generation {
                        debug!(key = %target, "Discarding stale fetch result");
                        return;
                    }
                    inner.messages = rows.clone();
                    inner.state = SyncState::Live;
                }
                self.ctx.events.emit(ClientEvent::TimelineReplaced {
                    target,
                    messages: rows,
                });
            }
            Err(e) => {
                warn!(key = %target, error = %e, "Message fetch failed");
                let mut inner = self.lock();
                if inner.generation == generation && inner.state == SyncState::Reloading {
                    // Keep the last consistent list on a failed reload.
                    inner.state = SyncState::Live;
                }
                drop(inner);
                self.ctx.events.notice("Could not load messages");
            }
        }
    }

    async fn run_feed(
        self,
        generation: u64,
        mut messages: Subscription<ChangeEvent>,
        mut typing: Subscription<TypingFact>,
    ) {
        let mut typing_open = true;
        loop {
            tokio::select! {
                event = messages.recv() => match event {
                    Some(_) => {
                        // Overlapping re-fetches for the same target are
                        // tolerated; each one replaces wholesale.
                        self.refetch(generation).await;
                    }
                    None => {
                        debug!("Message feed closed");
                        break;
                    }
                },
                fact = typing.recv(), if typing_open => match fact {
                    Some(fact) => self.on_typing(fact),
                    None => typing_open = false,
                },
            }
        }
    }

    fn on_typing(&self, fact: TypingFact) {
        let me = self.lock().actor.as_ref().map(|a| a.id.clone());
        if me.as_ref() == Some(&fact.user) {
            return;
        }
        let target = fact.target.clone();
        self.observer.observe(fact);
        self.ctx.events.emit(ClientEvent::StatusChanged { target });
    }
}
