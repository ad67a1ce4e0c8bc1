//! # atrium-shared
//!
//! Domain models and pure logic shared by the Atrium backend adapters and
//! client: identifiers and conversation-target keys, profile/message/marker
//! models, the role/permission evaluator, static channel configuration, and
//! timing constants.

pub mod channels;
pub mod constants;
pub mod models;
pub mod permissions;
pub mod types;

pub use channels::{ChannelDef, ChannelRegistry};
pub use models::{Message, Profile, ReadMarker, ReplyRef, TypingFact};
pub use permissions::{has_permission, may, Action, Role};
pub use types::{ChannelId, DirectKey, MessageId, TargetKey, UserId};
