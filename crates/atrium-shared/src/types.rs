use serde::{Deserialize, Serialize};

// Backend-assigned opaque user identifier (auth uid).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend-assigned message identifier.
///
/// Sortable: the backend mints ids that order lexicographically by creation,
/// so `(created_at, id)` is a total order over a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical key for a two-party private conversation.
///
/// The key is order independent: both participants' ids are sorted before
/// joining, so `DirectKey::new(a, b) == DirectKey::new(b, a)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DirectKey(String);

impl DirectKey {
    pub fn new(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        Self(format!("{}:{}", lo.0, hi.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The peer's id from this pair, given one participant.
    /// Returns `None` if `me` is not part of the pair.
    pub fn peer_of(&self, me: &UserId) -> Option<UserId> {
        let (lo, hi) = self.0.split_once(':')?;
        if lo == me.0 {
            Some(UserId::new(hi))
        } else if hi == me.0 {
            Some(UserId::new(lo))
        } else {
            None
        }
    }
}

impl std::fmt::Display for DirectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An addressable conversation target: a direct pair or a fixed channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "key", rename_all = "camelCase")]
pub enum TargetKey {
    Direct(DirectKey),
    Channel(ChannelId),
}

impl TargetKey {
    pub fn direct(a: &UserId, b: &UserId) -> Self {
        Self::Direct(DirectKey::new(a, b))
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self::Channel(ChannelId::new(id))
    }

    /// Flat string form used as the server-side filter key.
    pub fn filter_key(&self) -> String {
        match self {
            Self::Direct(pair) => format!("dm:{}", pair),
            Self::Channel(id) => format!("ch:{}", id),
        }
    }

    /// Parse the flat form back into a target. Returns `None` for keys this
    /// client version does not understand.
    pub fn from_filter_key(key: &str) -> Option<Self> {
        let (prefix, rest) = key.split_once(':')?;
        match prefix {
            "dm" => {
                let (a, b) = rest.split_once(':')?;
                Some(Self::direct(&UserId::new(a), &UserId::new(b)))
            }
            "ch" => Some(Self::channel(rest)),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.filter_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_key_order_independent() {
        let a = UserId::new("uid-alpha");
        let b = UserId::new("uid-beta");
        assert_eq!(DirectKey::new(&a, &b), DirectKey::new(&b, &a));
        assert_eq!(DirectKey::new(&a, &b).as_str(), "uid-alpha:uid-beta");
    }

    #[test]
    fn test_direct_key_peer_of() {
        let a = UserId::new("a");
        let b = UserId::new("b");
        let key = DirectKey::new(&b, &a);
        assert_eq!(key.peer_of(&a), Some(b.clone()));
        assert_eq!(key.peer_of(&b), Some(a));
        assert_eq!(key.peer_of(&UserId::new("c")), None);
    }

    #[test]
    fn test_filter_key_distinguishes_variants() {
        let dm = TargetKey::direct(&UserId::new("a"), &UserId::new("b"));
        let ch = TargetKey::channel("general");
        assert_eq!(dm.filter_key(), "dm:a:b");
        assert_eq!(ch.filter_key(), "ch:general");
        assert_ne!(dm, ch);
    }

    #[test]
    fn test_filter_key_round_trip() {
        let dm = TargetKey::direct(&UserId::new("a"), &UserId::new("b"));
        let ch = TargetKey::channel("general");
        assert_eq!(TargetKey::from_filter_key(&dm.filter_key()), Some(dm));
        assert_eq!(TargetKey::from_filter_key(&ch.filter_key()), Some(ch));
        assert_eq!(TargetKey::from_filter_key("bogus"), None);
    }
}
