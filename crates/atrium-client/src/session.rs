//! Session/identity adapter over the backend auth port.
//!
//! Exposes the current identity and a change notification that fires at most
//! once per actual transition (absent ↔ present, or a different user id).
//! On an absent session every other component treats the client as
//! unauthenticated; redirecting to a sign-in surface is the caller's job,
//! not this adapter's.

use tokio::sync::watch;
use tracing::info;

use atrium_backend::{Backend, Identity};

use crate::error::Result;
use crate::events::{ClientEvent, EventBus};
use crate::state::ClientContext;

pub struct SessionAdapter<B> {
    ctx: ClientContext<B>,
    current: watch::Sender<Option<Identity>>,
}

impl<B: Backend> SessionAdapter<B> {
    pub fn new(ctx: ClientContext<B>) -> Self {
        let (current, _) = watch::channel(None);
        Self { ctx, current }
    }

    /// Read the backend session state (e.g. a persisted session restored by
    /// the hosted SDK) and publish it.
    pub async fn resume(&self) -> Result<Option<Identity>> {
        let identity = self.ctx.backend.current_identity().await?;
        self.publish(identity.clone());
        Ok(identity)
    }

    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<Identity> {
        let identity = self
            .ctx
            .backend
            .sign_up(email, password, display_name)
            .await?;
        info!(user = %identity.user_id, "Registered");
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let identity = self.ctx.backend.sign_in(email, password).await?;
        info!(user = %identity.user_id, "Signed in");
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.ctx.backend.sign_out().await?;
        self.publish(None);
        Ok(())
    }

    /// Current identity, or `None` when unauthenticated.
    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    /// Watch stream of identity transitions.
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    /// Publish only on an actual transition, so subscribers never see a
    /// duplicate notification for the same session.
    fn publish(&self, next: Option<Identity>) {
        let changed = self.current.send_if_modified(|slot| {
            let same = match (&*slot, &next) {
                (None, None) => true,
                (Some(a), Some(b)) => a.user_id == b.user_id,
                _ => false,
            };
            if same {
                false
            } else {
                *slot = next.clone();
                true
            }
        });
        if changed {
            self.ctx.events.emit(ClientEvent::SessionChanged {
                user: next.map(|i| i.user_id),
            });
        }
    }
}
