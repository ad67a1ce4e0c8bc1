//! # atrium-client
//!
//! Client core of the Atrium hub: session adapter, conversation directory,
//! message stream synchronizer, typing/presence signaler, admin operations,
//! and the view layer. Everything is generic over the backend adapter, so
//! the same state machine runs against any hosted generation of the app.

pub mod admin;
pub mod directory;
pub mod events;
pub mod presence;
pub mod session;
pub mod state;
pub mod sync;
pub mod view;

mod error;

use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use atrium_backend::{Backend, Identity};
use atrium_shared::{ChannelRegistry, TargetKey};

pub use admin::AdminPanel;
pub use directory::{Directory, DirectoryEntry};
pub use error::{ClientError, Result};
pub use events::{ClientEvent, EventBus};
pub use presence::{PresenceHeartbeat, TypingObserver, TypingPublisher};
pub use session::SessionAdapter;
pub use state::{Actor, ClientContext};
pub use sync::{Attachment, Draft, SyncState, Synchronizer};
pub use view::{Composer, ViewSettings};

/// Install the default tracing subscriber for binaries and examples.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("atrium_client=debug,atrium_backend=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Fully wired client: one backend handle shared by every component, one
/// event stream out.
pub struct HubClient<B: Backend> {
    pub session: SessionAdapter<B>,
    pub directory: Directory<B>,
    pub sync: Synchronizer<B>,
    pub typing: TypingPublisher<B>,
    pub heartbeat: PresenceHeartbeat<B>,
    pub admin: AdminPanel<B>,
    pub observer: TypingObserver,
}

impl<B: Backend> HubClient<B> {
    pub fn new(
        backend: B,
        registry: ChannelRegistry,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = EventBus::new();
        let ctx = ClientContext::new(backend, registry, events);
        let observer = TypingObserver::new();

        let client = Self {
            session: SessionAdapter::new(ctx.clone()),
            directory: Directory::new(ctx.clone()),
            sync: Synchronizer::new(ctx.clone(), observer.clone()),
            typing: TypingPublisher::new(ctx.clone()),
            heartbeat: PresenceHeartbeat::new(ctx.clone()),
            admin: AdminPanel::new(ctx),
            observer,
        };
        (client, rx)
    }

    /// Wire up the signed-in user: load the directory, resolve the actor's
    /// role, and start presence.
    pub async fn start_session(&self, identity: &Identity) -> Result<Actor> {
        self.directory.refresh_users(&identity.user_id).await;
        let actor = self.directory.actor(&identity.user_id).await?;

        self.sync.set_actor(Some(actor.clone()));
        self.typing.set_actor(Some(actor.id.clone()));
        self.heartbeat.start(actor.id.clone());
        self.directory.refresh_unread_counts(&actor).await;
        Ok(actor)
    }

    /// Select a conversation target: activate the synchronizer (which tears
    /// down the previous subscriptions first), zero the displayed unread
    /// count, and point the typing publisher at the new target.
    pub async fn select_target(&self, target: TargetKey) -> Result<()> {
        let actor = self.sync.actor().ok_or(ClientError::Unauthenticated)?;
        self.sync.activate(Some(target.clone())).await?;
        self.directory.select_target(&actor, &target);
        self.typing.set_target(Some(target)).await;
        Ok(())
    }

    /// Tear the session down: stop feeds and presence, then sign out.
    pub async fn end_session(&self) -> Result<()> {
        self.sync.activate(None).await?;
        self.typing.set_target(None).await;
        self.typing.set_actor(None);
        self.heartbeat.shutdown().await;
        self.sync.set_actor(None);
        self.session.sign_out().await
    }
}
