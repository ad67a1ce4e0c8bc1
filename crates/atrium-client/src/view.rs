//! Presentation models and the composer.
//!
//! Pure assembly: these builders turn synchronized state into rows the UI
//! draws, and the [`Composer`] owns the input box lifecycle (optimistic
//! clear on submit, text restored on failure). No backend calls happen here
//! except through the synchronizer/typing handles passed into
//! [`Composer::submit`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use atrium_backend::Backend;
use atrium_shared::constants::REPLY_SNIPPET_CHARS;
use atrium_shared::{may, Action, Message, MessageId, ReplyRef, TargetKey, UserId};

use crate::directory::DirectoryEntry;
use crate::error::Result;
use crate::presence::{TypingObserver, TypingPublisher};
use crate::state::Actor;
use crate::sync::{Attachment, Draft, Synchronizer};

/// Display options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewSettings {
    /// Stealth mode: swap user-facing labels for neutral ones so the hub
    /// passes for a document list at a glance.
    pub stealth: bool,
}

// ---------------------------------------------------------------------------
// Directory view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRow {
    pub target: TargetKey,
    pub title: String,
    /// Status line: "typing…", "online", or last-seen recency.
    pub subtitle: String,
    pub unread_badge: Option<String>,
    pub online: Option<bool>,
}

pub fn build_directory(
    entries: &[DirectoryEntry],
    observer: &TypingObserver,
    settings: ViewSettings,
) -> Vec<DirectoryRow> {
    let typing = observer.typing_users();
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let subtitle = match (&entry.peer, entry.online) {
                (Some(peer), _) if typing.contains(peer) => "typing…".to_string(),
                (Some(_), Some(true)) => "online".to_string(),
                (Some(_), _) => entry
                    .last_seen
                    .map(|t| format!("last seen {}", relative_time(t, Utc::now())))
                    .unwrap_or_default(),
                _ => "channel".to_string(),
            };
            DirectoryRow {
                target: entry.target.clone(),
                title: if settings.stealth {
                    format!("Document {}", index + 1)
                } else {
                    entry.title.clone()
                },
                subtitle: if settings.stealth { String::new() } else { subtitle },
                unread_badge: unread_badge(entry.unread),
                online: entry.online,
            }
        })
        .collect()
}

fn unread_badge(unread: u64) -> Option<String> {
    match unread {
        0 => None,
        n if n > 99 => Some("99+".to_string()),
        n => Some(n.to_string()),
    }
}

/// Coarse human-readable recency.
fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - then).num_minutes().max(0);
    match minutes {
        0 => "just now".to_string(),
        m if m < 60 => format!("{m} min ago"),
        m if m < 24 * 60 => format!("{} h ago", m / 60),
        m => format!("{} d ago", m / (24 * 60)),
    }
}

// ---------------------------------------------------------------------------
// Timeline view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub author: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    pub id: MessageId,
    pub author: String,
    pub mine: bool,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub reply: Option<ReplyPreview>,
    pub edited: bool,
    pub timestamp: DateTime<Utc>,
    pub can_edit: bool,
    pub can_delete: bool,
}

pub fn build_timeline<F>(
    messages: &[Message],
    actor: &Actor,
    resolve_name: F,
    settings: ViewSettings,
) -> Vec<TimelineItem>
where
    F: Fn(&UserId) -> Option<String>,
{
    let can_moderate = may(actor.role, Action::DeleteAnyMessage);
    messages
        .iter()
        .map(|m| {
            let mine = m.sender == actor.id;
            let author = display_name(&m.sender, &resolve_name, settings);
            TimelineItem {
                id: m.id.clone(),
                author,
                mine,
                text: m.text.clone(),
                image_url: m.image_url.clone(),
                reply: m.reply_to.as_ref().map(|r| ReplyPreview {
                    author: display_name(&r.sender, &resolve_name, settings),
                    snippet: r.snippet.clone(),
                }),
                edited: m.edited_at.is_some(),
                timestamp: m.created_at,
                can_edit: mine,
                can_delete: mine || can_moderate,
            }
        })
        .collect()
}

fn display_name<F>(id: &UserId, resolve: &F, settings: ViewSettings) -> String
where
    F: Fn(&UserId) -> Option<String>,
{
    let name = resolve(id).unwrap_or_else(|| id.to_string());
    if settings.stealth {
        initials(&name)
    } else {
        name
    }
}

fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|w| w.chars().next())
        .take(2)
        .collect::<String>()
        .to_uppercase()
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

/// The compose box: draft text, pending attachment, captured reply.
#[derive(Debug, Default)]
pub struct Composer {
    text: String,
    attachment: Option<Attachment>,
    reply_to: Option<ReplyRef>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the draft; returns whether the input is now non-empty so the
    /// caller can feed the typing publisher.
    pub fn set_text(&mut self, text: impl Into<String>) -> bool {
        self.text = text.into();
        !self.text.trim().is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn clear_attachment(&mut self) {
        self.attachment = None;
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Capture a reply reference to `message`: id, a snippet of its text,
    /// and its sender, frozen as of now.
    pub fn begin_reply(&mut self, message: &Message) {
        self.reply_to = Some(ReplyRef {
            message_id: message.id.clone(),
            snippet: message.snippet(REPLY_SNIPPET_CHARS),
            sender: message.sender.clone(),
        });
    }

    pub fn cancel_reply(&mut self) {
        self.reply_to = None;
    }

    pub fn reply_to(&self) -> Option<&ReplyRef> {
        self.reply_to.as_ref()
    }

    /// Take the draft, optimistically clearing the box.
    pub fn take_draft(&mut self) -> Draft {
        Draft {
            text: std::mem::take(&mut self.text),
            image: self.attachment.take(),
            reply_to: self.reply_to.take(),
        }
    }

    /// Submit the current draft through the synchronizer.
    ///
    /// The box is cleared before the send; on failure the text is restored
    /// so nothing typed is silently lost. The pending image is not restored
    /// (known limitation carried from the original behavior).
    pub async fn submit<B: Backend>(
        &mut self,
        sync: &Synchronizer<B>,
        typing: &TypingPublisher<B>,
    ) -> Result<()> {
        let draft = self.take_draft();
        let text_backup = draft.text.clone();
        match sync.send(draft).await {
            Ok(()) => {
                typing.sent().await;
                Ok(())
            }
            Err(e) => {
                self.text = text_backup;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_shared::Role;

    fn message(id: &str, sender: &str, text: &str) -> Message {
        Message {
            id: MessageId(id.to_string()),
            sender: UserId::new(sender),
            target: TargetKey::channel("general"),
            text: Some(text.to_string()),
            image_url: None,
            reply_to: None,
            created_at: Utc::now(),
            edited_at: None,
        }
    }

    #[test]
    fn test_affordances_follow_role() {
        let messages = vec![message("1", "alice", "hi"), message("2", "bob", "yo")];
        let alice = Actor {
            id: UserId::new("alice"),
            role: Role::User,
        };
        let items = build_timeline(&messages, &alice, |_| None, ViewSettings::default());
        assert!(items[0].can_edit && items[0].can_delete);
        assert!(!items[1].can_edit && !items[1].can_delete);

        let moderator = Actor {
            id: UserId::new("alice"),
            role: Role::Moderator,
        };
        let items = build_timeline(&messages, &moderator, |_| None, ViewSettings::default());
        assert!(!items[1].can_edit && items[1].can_delete);
    }

    #[test]
    fn test_stealth_mode_masks_names() {
        let messages = vec![message("1", "bob", "hi")];
        let actor = Actor {
            id: UserId::new("alice"),
            role: Role::User,
        };
        let items = build_timeline(
            &messages,
            &actor,
            |_| Some("Bob Builder".to_string()),
            ViewSettings { stealth: true },
        );
        assert_eq!(items[0].author, "BB");
    }

    #[test]
    fn test_reply_capture_freezes_snippet() {
        let mut composer = Composer::new();
        let original = message("7", "bob", "the original text");
        composer.begin_reply(&original);
        let draft = composer.take_draft();
        let reply = draft.reply_to.unwrap();
        assert_eq!(reply.message_id, MessageId("7".to_string()));
        assert_eq!(reply.snippet, "the original text");
        assert_eq!(reply.sender, UserId::new("bob"));
        // Box is cleared after take.
        assert!(composer.reply_to().is_none());
    }

    #[test]
    fn test_relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(relative_time(now, now), "just now");
        assert_eq!(relative_time(now - chrono::Duration::minutes(5), now), "5 min ago");
        assert_eq!(relative_time(now - chrono::Duration::hours(3), now), "3 h ago");
        assert_eq!(relative_time(now - chrono::Duration::days(2), now), "2 d ago");
    }

    #[tokio::test]
    async fn test_directory_rows_typing_line_and_stealth() {
        let entries = vec![
            DirectoryEntry {
                target: TargetKey::channel("general"),
                title: "General".to_string(),
                unread: 0,
                online: None,
                last_seen: None,
                peer: None,
            },
            DirectoryEntry {
                target: TargetKey::direct(&UserId::new("alice"), &UserId::new("bob")),
                title: "Bob".to_string(),
                unread: 3,
                online: Some(true),
                last_seen: Some(Utc::now()),
                peer: Some(UserId::new("bob")),
            },
        ];
        let observer = TypingObserver::new();

        let rows = build_directory(&entries, &observer, ViewSettings::default());
        assert_eq!(rows[0].subtitle, "channel");
        assert_eq!(rows[1].subtitle, "online");
        assert_eq!(rows[1].unread_badge.as_deref(), Some("3"));

        observer.observe(atrium_shared::TypingFact {
            user: UserId::new("bob"),
            target: entries[1].target.clone(),
            is_typing: true,
            at: Utc::now(),
        });
        let rows = build_directory(&entries, &observer, ViewSettings::default());
        assert_eq!(rows[1].subtitle, "typing…");

        let rows = build_directory(&entries, &observer, ViewSettings { stealth: true });
        assert_eq!(rows[0].title, "Document 1");
        assert_eq!(rows[1].title, "Document 2");
        assert!(rows[1].subtitle.is_empty());
    }

    #[test]
    fn test_unread_badge_caps() {
        assert_eq!(unread_badge(0), None);
        assert_eq!(unread_badge(7), Some("7".to_string()));
        assert_eq!(unread_badge(200), Some("99+".to_string()));
    }
}
