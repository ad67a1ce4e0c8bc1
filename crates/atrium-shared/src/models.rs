//! Domain model structs exchanged with the backend adapter.
//!
//! Every struct derives `Serialize` and `Deserialize` because all of them
//! cross the adapter boundary as JSON rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::Role;
use crate::types::{MessageId, TargetKey, UserId};

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// A registered user's profile row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Stable identity id assigned by the auth service.
    pub id: UserId,
    /// Human-readable display name.
    pub display_name: String,
    /// Durable URL of the avatar image, if one was uploaded.
    pub avatar_url: Option<String>,
    /// Fallback avatar color (CSS color string) when no image is set.
    pub avatar_color: Option<String>,
    pub role: Role,
    /// Maintained by the presence heartbeat.
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Snapshot of a replied-to message, captured at reply time.
///
/// Deliberately not live-linked: if the original is later edited or deleted
/// the snippet keeps whatever was quoted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub message_id: MessageId,
    pub snippet: String,
    pub sender: UserId,
}

/// A single chat message. Belongs to exactly one target for its lifetime.
///
/// At least one of `text` / `image_url` is present; deletion is a hard
/// removal, not a tombstone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub target: TargetKey,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub reply_to: Option<ReplyRef>,
    pub created_at: DateTime<Utc>,
    /// Set on the first edit, refreshed on every subsequent one.
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Short text excerpt used when quoting this message in a reply.
    pub fn snippet(&self, max_chars: usize) -> String {
        let source = match self.text.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => "[image]",
        };
        if source.chars().count() <= max_chars {
            source.to_string()
        } else {
            let cut: String = source.chars().take(max_chars).collect();
            format!("{cut}…")
        }
    }
}

// ---------------------------------------------------------------------------
// Read marker
// ---------------------------------------------------------------------------

/// Last acknowledged read time for a (user, target) pair.
///
/// Unread count for a target is the number of messages on it authored by
/// someone else with `created_at > at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadMarker {
    pub user: UserId,
    pub target: TargetKey,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Typing fact
// ---------------------------------------------------------------------------

/// Ephemeral "is typing" signal. Only the most recent value per (user,
/// target) is meaningful; readers must treat a fact as stale after a fixed
/// window even if no explicit off-signal ever arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingFact {
    pub user: UserId,
    pub target: TargetKey,
    pub is_typing: bool,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelId;

    fn msg(text: Option<&str>, image: Option<&str>) -> Message {
        Message {
            id: MessageId("0001".into()),
            sender: UserId::new("a"),
            target: TargetKey::Channel(ChannelId::new("general")),
            text: text.map(String::from),
            image_url: image.map(String::from),
            reply_to: None,
            created_at: Utc::now(),
            edited_at: None,
        }
    }

    #[test]
    fn test_snippet_truncates() {
        let m = msg(Some("the quick brown fox jumps"), None);
        assert_eq!(m.snippet(9), "the quick…");
        assert_eq!(m.snippet(100), "the quick brown fox jumps");
    }

    #[test]
    fn test_snippet_image_only() {
        let m = msg(None, Some("mem://blob/1"));
        assert_eq!(m.snippet(40), "[image]");
    }
}
