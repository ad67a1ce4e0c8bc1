//! Typing and presence signaling.
//!
//! Publishing side: a keystroke that leaves the input non-empty publishes
//! `is_typing = true` for (self, active target); 3 seconds of idle, emptying
//! the input, or a completed send publishes `false`. Presence is a 60-second
//! heartbeat that marks the user online iff any local activity happened in
//! the last 10 minutes; on teardown an `online = false` write is attempted
//! best-effort (a page-unload analogue — delivery is not guaranteed).
//!
//! Observing side: only the latest fact per user matters, and a fact older
//! than 5 seconds is treated as stale even if no off-signal ever arrived, so
//! a lost `false` cannot wedge the "is typing" line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, warn};

use atrium_backend::Backend;
use atrium_shared::constants::{
    ACTIVITY_WINDOW, PRESENCE_HEARTBEAT, TYPING_IDLE_TIMEOUT, TYPING_STALE_AFTER,
};
use atrium_shared::{TargetKey, TypingFact, UserId};

use crate::state::ClientContext;

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

struct TypingEntry {
    is_typing: bool,
    seen: Instant,
}

/// Latest observed typing fact per user on the active target.
#[derive(Clone)]
pub struct TypingObserver {
    inner: Arc<Mutex<HashMap<UserId, TypingEntry>>>,
}

impl TypingObserver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn observe(&self, fact: TypingFact) {
        let mut map = self.lock();
        map.insert(
            fact.user,
            TypingEntry {
                is_typing: fact.is_typing,
                seen: Instant::now(),
            },
        );
    }

    /// Forget everything; called on target switch.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Users currently typing, freshness-checked: a `true` fact expires
    /// after the stale window and the caller falls back to presence status.
    pub fn typing_users(&self) -> Vec<UserId> {
        let map = self.lock();
        map.iter()
            .filter(|(_, e)| e.is_typing && e.seen.elapsed() <= TYPING_STALE_AFTER)
            .map(|(user, _)| user.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, TypingEntry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for TypingObserver {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

struct PublisherState {
    me: Option<UserId>,
    target: Option<TargetKey>,
    is_typing: bool,
    /// Bumped on every keystroke; cancels any pending idle timer.
    epoch: u64,
}

/// Publishes this client's typing facts on the fixed cadence and timeout.
pub struct TypingPublisher<B> {
    ctx: ClientContext<B>,
    inner: Arc<Mutex<PublisherState>>,
}

impl<B: Backend> Clone for TypingPublisher<B> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> TypingPublisher<B> {
    pub fn new(ctx: ClientContext<B>) -> Self {
        Self {
            ctx,
            inner: Arc::new(Mutex::new(PublisherState {
                me: None,
                target: None,
                is_typing: false,
                epoch: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PublisherState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_actor(&self, me: Option<UserId>) {
        let mut state = self.lock();
        state.me = me;
        state.is_typing = false;
        state.epoch += 1;
    }

    /// Switch the target this publisher signals against, clearing any
    /// typing state left on the previous one.
    pub async fn set_target(&self, target: Option<TargetKey>) {
        let previous = {
            let mut state = self.lock();
            state.epoch += 1;
            let was = state.is_typing.then(|| state.target.clone()).flatten();
            let me = state.me.clone();
            state.is_typing = false;
            state.target = target;
            was.zip(me)
        };
        if let Some((old_target, me)) = previous {
            self.publish(&me, &old_target, false).await;
        }
    }

    /// Called on every local input change.
    ///
    /// Each keystroke that leaves the input non-empty re-publishes the `true`
    /// fact, so observers' freshness window keeps refreshing for as long as
    /// typing continues.
    pub async fn input_changed(&self, non_empty: bool) {
        let (me, target, epoch) = {
            let mut state = self.lock();
            let (Some(me), Some(target)) = (state.me.clone(), state.target.clone()) else {
                return;
            };
            state.epoch += 1;
            if !non_empty {
                let was_typing = state.is_typing;
                state.is_typing = false;
                if was_typing {
                    drop(state);
                    self.publish(&me, &target, false).await;
                }
                return;
            }
            state.is_typing = true;
            (me, target, state.epoch)
        };

        self.publish(&me, &target, true).await;

        // Idle timer: if no newer keystroke arrives within the window,
        // auto-publish the off-signal.
        let publisher = self.clone();
        tokio::spawn(async move {
            sleep(TYPING_IDLE_TIMEOUT).await;
            let expired = {
                let mut state = publisher.lock();
                if state.epoch == epoch && state.is_typing {
                    state.is_typing = false;
                    true
                } else {
                    false
                }
            };
            if expired {
                publisher.publish(&me, &target, false).await;
            }
        });
    }

    /// Called immediately on a completed send.
    pub async fn sent(&self) {
        let cleared = {
            let mut state = self.lock();
            state.epoch += 1;
            let was = state.is_typing;
            state.is_typing = false;
            if was {
                state.me.clone().zip(state.target.clone())
            } else {
                None
            }
        };
        if let Some((me, target)) = cleared {
            self.publish(&me, &target, false).await;
        }
    }

    async fn publish(&self, me: &UserId, target: &TargetKey, is_typing: bool) {
        let fact = TypingFact {
            user: me.clone(),
            target: target.clone(),
            is_typing,
            at: Utc::now(),
        };
        // Ephemeral signal: a failed publish is logged, never surfaced.
        if let Err(e) = self.ctx.backend.publish_typing(fact).await {
            warn!(key = %target, error = %e, "Typing publish failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Presence heartbeat
// ---------------------------------------------------------------------------

struct HeartbeatState {
    me: Option<UserId>,
    last_activity: Instant,
    task: Option<JoinHandle<()>>,
}

/// Fixed-interval presence heartbeat.
pub struct PresenceHeartbeat<B> {
    ctx: ClientContext<B>,
    inner: Arc<Mutex<HeartbeatState>>,
}

impl<B: Backend> Clone for PresenceHeartbeat<B> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> PresenceHeartbeat<B> {
    pub fn new(ctx: ClientContext<B>) -> Self {
        Self {
            ctx,
            inner: Arc::new(Mutex::new(HeartbeatState {
                me: None,
                last_activity: Instant::now(),
                task: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeartbeatState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record local input/click/mouse activity.
    pub fn record_activity(&self) {
        self.lock().last_activity = Instant::now();
    }

    /// Start the heartbeat for the signed-in user. The first beat fires
    /// immediately.
    pub fn start(&self, me: UserId) {
        self.stop();
        {
            let mut state = self.lock();
            state.me = Some(me.clone());
            state.last_activity = Instant::now();
        }

        let heartbeat = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(PRESENCE_HEARTBEAT);
            loop {
                ticker.tick().await;
                let online = heartbeat.lock().last_activity.elapsed() <= ACTIVITY_WINDOW;
                if let Err(e) = heartbeat
                    .ctx
                    .backend
                    .set_presence(&me, online, Utc::now())
                    .await
                {
                    warn!(user = %me, error = %e, "Presence heartbeat failed");
                } else {
                    debug!(user = %me, online, "Presence heartbeat");
                }
            }
        });
        self.lock().task = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.lock().task.take() {
            handle.abort();
        }
    }

    /// Best-effort offline write on teardown. The page-unload analogue: not
    /// a reliable delivery point, so a failure is only logged.
    pub async fn shutdown(&self) {
        self.stop();
        let me = self.lock().me.take();
        if let Some(me) = me {
            if let Err(e) = self.ctx.backend.set_presence(&me, false, Utc::now()).await {
                warn!(user = %me, error = %e, "Offline write on shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use atrium_backend::{Backend, MemoryBackend};
    use atrium_shared::ChannelRegistry;

    fn ctx(store: &MemoryBackend) -> ClientContext<MemoryBackend> {
        let (events, _rx) = EventBus::new();
        ClientContext::new(store.client(), ChannelRegistry::default(), events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_publishes_off_signal() {
        let store = MemoryBackend::new();
        let target = TargetKey::channel("general");
        let mut feed = store.subscribe_typing(&target).await.unwrap();

        let publisher = TypingPublisher::new(ctx(&store));
        publisher.set_actor(Some(UserId::new("alice")));
        publisher.set_target(Some(target.clone())).await;

        publisher.input_changed(true).await;
        let fact = feed.recv().await.unwrap();
        assert!(fact.is_typing);

        // No further keystrokes: the idle timer fires after 3 s.
        sleep(TYPING_IDLE_TIMEOUT + std::time::Duration::from_millis(10)).await;
        let fact = feed.recv().await.unwrap();
        assert!(!fact.is_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keystrokes_extend_the_timer() {
        let store = MemoryBackend::new();
        let target = TargetKey::channel("general");
        let mut feed = store.subscribe_typing(&target).await.unwrap();

        let publisher = TypingPublisher::new(ctx(&store));
        publisher.set_actor(Some(UserId::new("alice")));
        publisher.set_target(Some(target.clone())).await;

        publisher.input_changed(true).await;
        assert!(feed.recv().await.unwrap().is_typing);

        // Keep typing every 2 s; every keystroke re-publishes the on-signal
        // and pushes the idle timer out, so no off-signal fires in between.
        for _ in 0..3 {
            sleep(std::time::Duration::from_secs(2)).await;
            publisher.input_changed(true).await;
            assert!(feed.recv().await.unwrap().is_typing);
        }
        sleep(TYPING_IDLE_TIMEOUT + std::time::Duration::from_millis(10)).await;
        let fact = feed.recv().await.unwrap();
        assert!(!fact.is_typing, "off-signal only after the final idle window");
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_typing_stays_fresh_for_observers() {
        let store = MemoryBackend::new();
        let target = TargetKey::channel("general");
        let mut feed = store.subscribe_typing(&target).await.unwrap();

        let publisher = TypingPublisher::new(ctx(&store));
        publisher.set_actor(Some(UserId::new("alice")));
        publisher.set_target(Some(target.clone())).await;
        let observer = TypingObserver::new();

        publisher.input_changed(true).await;
        observer.observe(feed.recv().await.unwrap());

        // Type steadily for longer than the stale window; the typing line
        // must never drop while keystrokes keep arriving.
        for _ in 0..4 {
            sleep(std::time::Duration::from_secs(2)).await;
            publisher.input_changed(true).await;
            observer.observe(feed.recv().await.unwrap());
            assert_eq!(observer.typing_users(), vec![UserId::new("alice")]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_clears_typing_immediately() {
        let store = MemoryBackend::new();
        let target = TargetKey::channel("general");
        let mut feed = store.subscribe_typing(&target).await.unwrap();

        let publisher = TypingPublisher::new(ctx(&store));
        publisher.set_actor(Some(UserId::new("alice")));
        publisher.set_target(Some(target.clone())).await;

        publisher.input_changed(true).await;
        assert!(feed.recv().await.unwrap().is_typing);

        publisher.sent().await;
        assert!(!feed.recv().await.unwrap().is_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_expires_stale_facts() {
        let observer = TypingObserver::new();
        observer.observe(TypingFact {
            user: UserId::new("bob"),
            target: TargetKey::channel("general"),
            is_typing: true,
            at: Utc::now(),
        });
        assert_eq!(observer.typing_users(), vec![UserId::new("bob")]);

        // A lost off-signal: after the stale window the observer falls back
        // on its own.
        sleep(TYPING_STALE_AFTER + std::time::Duration::from_millis(10)).await;
        assert!(observer.typing_users().is_empty());
    }
}
