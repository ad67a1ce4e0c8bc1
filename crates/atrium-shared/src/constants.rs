use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Atrium";

/// Idle time after the last keystroke before a `false` typing fact is
/// auto-published.
pub const TYPING_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Observers treat a typing fact older than this as stale and fall back to
/// presence status, even if no off-signal was ever delivered.
pub const TYPING_STALE_AFTER: Duration = Duration::from_secs(5);

/// Interval of the presence heartbeat.
pub const PRESENCE_HEARTBEAT: Duration = Duration::from_secs(60);

/// A user counts as online if any local activity occurred within this window.
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Maximum accepted image attachment size in bytes (5 MiB).
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Maximum length of a reply snippet, in characters.
pub const REPLY_SNIPPET_CHARS: usize = 80;

/// Maximum message text length, in characters.
pub const MAX_TEXT_CHARS: usize = 4000;
