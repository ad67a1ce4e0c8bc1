//! Typed events emitted toward the presentation layer.
//!
//! Components never touch presentation state directly; they emit a
//! [`ClientEvent`] and the UI redraws from the current view models.

use tokio::sync::mpsc;

use atrium_shared::{Message, TargetKey, UserId};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The signed-in identity changed (sign-in, sign-out, account switch).
    SessionChanged { user: Option<UserId> },
    /// The conversation directory (users, unread counts) changed.
    DirectoryChanged,
    /// The visible message list for a target was replaced wholesale.
    TimelineReplaced {
        target: TargetKey,
        messages: Vec<Message>,
    },
    /// The status line for the active target should be re-rendered
    /// (typing fact arrived or expired).
    StatusChanged { target: TargetKey },
    /// A recoverable failure the user should see.
    Notice { text: String },
}

/// Cheap-to-clone sender half shared by every component.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped, discarding event");
        }
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.emit(ClientEvent::Notice { text: text.into() });
    }
}
