//! End-to-end chat flows over the in-process backend: two wired clients
//! sharing one store, exercising send/edit/delete, permission gates, unread
//! counts, and target switching.

use std::time::Duration;

use atrium_backend::{Backend, Identity, MemoryBackend};
use atrium_client::{ClientError, Composer, HubClient, SyncState};
use atrium_shared::{ChannelRegistry, Role, TargetKey};
use chrono::Utc;

async fn eventually(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn signed_in_client(
    store: &MemoryBackend,
    email: &str,
    name: &str,
) -> (HubClient<MemoryBackend>, Identity) {
    let (client, _rx) = HubClient::new(store.client(), ChannelRegistry::default());
    let identity = client.session.sign_up(email, "pw", name).await.unwrap();
    client.start_session(&identity).await.unwrap();
    (client, identity)
}

#[tokio::test]
async fn test_direct_message_visible_to_both_parties() {
    let store = MemoryBackend::new();
    let (alice, a) = signed_in_client(&store, "a@hub.test", "Alice").await;
    let (bob, b) = signed_in_client(&store, "b@hub.test", "Bob").await;

    let dm = TargetKey::direct(&a.user_id, &b.user_id);
    alice.select_target(dm.clone()).await.unwrap();
    bob.select_target(dm.clone()).await.unwrap();

    let mut composer = Composer::new();
    composer.set_text("hello");
    composer.submit(&alice.sync, &alice.typing).await.unwrap();
    assert_eq!(composer.text(), "", "input cleared optimistically");

    for client in [&alice, &bob] {
        eventually(|| client.sync.messages().len() == 1, "message visible").await;
        let messages = client.sync.messages();
        assert_eq!(messages[0].text.as_deref(), Some("hello"));
        assert_eq!(messages[0].sender, a.user_id);
        assert_eq!(messages[0].target, dm);
        assert!(messages[0].created_at <= Utc::now());
        assert_eq!(client.sync.state(), SyncState::Live);
    }
}

#[tokio::test]
async fn test_edit_own_message_sets_edited_timestamp() {
    let store = MemoryBackend::new();
    let (alice, _a) = signed_in_client(&store, "a@hub.test", "Alice").await;
    let general = TargetKey::channel("general");
    alice.select_target(general.clone()).await.unwrap();

    let mut composer = Composer::new();
    composer.set_text("hello");
    composer.submit(&alice.sync, &alice.typing).await.unwrap();
    eventually(|| alice.sync.messages().len() == 1, "send visible").await;

    let original = alice.sync.messages().remove(0);
    assert!(original.edited_at.is_none());

    alice.sync.edit(&original.id, "hi").await.unwrap();
    eventually(
        || alice.sync.messages()[0].text.as_deref() == Some("hi"),
        "edit visible",
    )
    .await;

    let edited = alice.sync.messages().remove(0);
    assert_eq!(edited.id, original.id, "id unchanged by edit");
    assert!(edited.edited_at.is_some());
}

#[tokio::test]
async fn test_edit_unchanged_or_empty_text_is_noop() {
    let store = MemoryBackend::new();
    let (alice, _a) = signed_in_client(&store, "a@hub.test", "Alice").await;
    let general = TargetKey::channel("general");
    alice.select_target(general.clone()).await.unwrap();

    let mut composer = Composer::new();
    composer.set_text("hello");
    composer.submit(&alice.sync, &alice.typing).await.unwrap();
    eventually(|| alice.sync.messages().len() == 1, "send visible").await;

    let id = alice.sync.messages()[0].id.clone();
    alice.sync.edit(&id, "hello").await.unwrap();
    alice.sync.edit(&id, "   ").await.unwrap();

    let rows = store.fetch_messages(&general).await.unwrap();
    assert!(rows[0].edited_at.is_none(), "no-op edits write nothing");
}

#[tokio::test]
async fn test_empty_send_rejected_before_any_write() {
    let store = MemoryBackend::new();
    let (alice, _a) = signed_in_client(&store, "a@hub.test", "Alice").await;
    let general = TargetKey::channel("general");
    alice.select_target(general.clone()).await.unwrap();

    let mut composer = Composer::new();
    composer.set_text("   ");
    let err = composer
        .submit(&alice.sync, &alice.typing)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(composer.text(), "   ", "draft text restored on failure");
    assert!(store.fetch_messages(&general).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gated_channel_blocked_for_user_role() {
    let store = MemoryBackend::new();
    let (alice, a) = signed_in_client(&store, "a@hub.test", "Alice").await;

    let moderators = TargetKey::channel("moderators");
    let err = alice.select_target(moderators.clone()).await.unwrap_err();
    assert!(matches!(err, ClientError::PermissionDenied(_)));
    assert_eq!(alice.sync.state(), SyncState::Idle);

    // Promoted, the same selection succeeds.
    store.set_role(&a.user_id, Role::Moderator).await.unwrap();
    alice.directory.refresh_users(&a.user_id).await;
    let actor = alice.directory.actor(&a.user_id).await.unwrap();
    alice.sync.set_actor(Some(actor));
    alice.select_target(moderators).await.unwrap();
    assert_eq!(alice.sync.state(), SyncState::Live);
}

#[tokio::test]
async fn test_delete_requires_author_or_moderator() {
    let store = MemoryBackend::new();
    let (alice, _a) = signed_in_client(&store, "a@hub.test", "Alice").await;
    let (bob, b) = signed_in_client(&store, "b@hub.test", "Bob").await;

    let general = TargetKey::channel("general");
    alice.select_target(general.clone()).await.unwrap();
    bob.select_target(general.clone()).await.unwrap();

    let mut composer = Composer::new();
    composer.set_text("delete me");
    composer.submit(&alice.sync, &alice.typing).await.unwrap();
    eventually(|| bob.sync.messages().len() == 1, "message visible to bob").await;

    let id = bob.sync.messages()[0].id.clone();
    let err = bob.sync.delete(&id).await.unwrap_err();
    assert!(matches!(err, ClientError::PermissionDenied(_)));

    store.set_role(&b.user_id, Role::Moderator).await.unwrap();
    bob.directory.refresh_users(&b.user_id).await;
    let actor = bob.directory.actor(&b.user_id).await.unwrap();
    bob.sync.set_actor(Some(actor));
    bob.sync.delete(&id).await.unwrap();

    eventually(|| alice.sync.messages().is_empty(), "delete visible to alice").await;
    assert!(store.fetch_messages(&general).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unread_zero_after_read_until_new_foreign_message() {
    let store = MemoryBackend::new();
    let (alice, a) = signed_in_client(&store, "a@hub.test", "Alice").await;
    let (bob, b) = signed_in_client(&store, "b@hub.test", "Bob").await;

    let dm = TargetKey::direct(&a.user_id, &b.user_id);
    alice.select_target(dm.clone()).await.unwrap();

    let mut composer = Composer::new();
    composer.set_text("ping");
    composer.submit(&alice.sync, &alice.typing).await.unwrap();
    eventually(|| alice.sync.messages().len() == 1, "send visible").await;

    let bob_actor = bob.directory.actor(&b.user_id).await.unwrap();
    bob.directory.refresh_users(&b.user_id).await;
    bob.directory.refresh_unread_counts(&bob_actor).await;
    let unread = |client: &HubClient<MemoryBackend>, actor| {
        client
            .directory
            .entries(actor)
            .into_iter()
            .find(|e| e.target == dm)
            .map(|e| e.unread)
            .unwrap()
    };
    assert_eq!(unread(&bob, &bob_actor), 1);

    // Reading the conversation zeroes the count, and it stays zero on
    // recompute until a new foreign message lands.
    bob.select_target(dm.clone()).await.unwrap();
    assert_eq!(unread(&bob, &bob_actor), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    bob.directory.refresh_unread_counts(&bob_actor).await;
    assert_eq!(unread(&bob, &bob_actor), 0);

    let mut composer = Composer::new();
    composer.set_text("pong?");
    composer.submit(&alice.sync, &alice.typing).await.unwrap();
    eventually(|| bob.sync.messages().len() == 2, "second message visible").await;
    bob.directory.refresh_unread_counts(&bob_actor).await;
    assert_eq!(unread(&bob, &bob_actor), 1);
}

#[tokio::test]
async fn test_target_switch_discards_previous_timeline() {
    let store = MemoryBackend::new();
    let (alice, _a) = signed_in_client(&store, "a@hub.test", "Alice").await;

    let general = TargetKey::channel("general");
    alice.select_target(general.clone()).await.unwrap();
    let mut composer = Composer::new();
    composer.set_text("in general");
    composer.submit(&alice.sync, &alice.typing).await.unwrap();
    eventually(|| alice.sync.messages().len() == 1, "send visible").await;

    // Rapid switches: the last one wins and no stale rows leak through.
    let random = TargetKey::channel("random");
    alice.select_target(random.clone()).await.unwrap();
    alice.select_target(general.clone()).await.unwrap();
    alice.select_target(random.clone()).await.unwrap();

    assert_eq!(alice.sync.active_target(), Some(random.clone()));
    eventually(
        || alice.sync.state() == SyncState::Live,
        "synchronizer settles",
    )
    .await;
    assert!(alice.sync.messages().is_empty());

    // Messages still arrive for the now-active target only.
    let mut composer = Composer::new();
    composer.set_text("in random");
    composer.submit(&alice.sync, &alice.typing).await.unwrap();
    eventually(|| alice.sync.messages().len() == 1, "send visible").await;
    assert_eq!(alice.sync.messages()[0].target, random);
}

#[tokio::test]
async fn test_typing_fact_reaches_peer_observer() {
    let store = MemoryBackend::new();
    let (alice, a) = signed_in_client(&store, "a@hub.test", "Alice").await;
    let (bob, b) = signed_in_client(&store, "b@hub.test", "Bob").await;

    let dm = TargetKey::direct(&a.user_id, &b.user_id);
    alice.select_target(dm.clone()).await.unwrap();
    bob.select_target(dm.clone()).await.unwrap();

    alice.typing.input_changed(true).await;
    eventually(
        || bob.observer.typing_users() == vec![a.user_id.clone()],
        "typing fact observed",
    )
    .await;

    // Own facts are never rendered back at the sender.
    assert!(alice.observer.typing_users().is_empty());
}

#[tokio::test]
async fn test_sign_in_required_for_target_selection() {
    let store = MemoryBackend::new();
    let (client, _rx) = HubClient::new(store.client(), ChannelRegistry::default());
    let err = client
        .select_target(TargetKey::channel("general"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Unauthenticated));
}

#[tokio::test]
async fn test_end_session_tears_everything_down() {
    let store = MemoryBackend::new();
    let (alice, a) = signed_in_client(&store, "a@hub.test", "Alice").await;
    alice
        .select_target(TargetKey::channel("general"))
        .await
        .unwrap();

    alice.end_session().await.unwrap();
    assert_eq!(alice.sync.state(), SyncState::Idle);
    assert!(alice.session.current().is_none());

    let profile = store.fetch_profile(&a.user_id).await.unwrap();
    assert!(!profile.online, "best-effort offline write applied");
}
