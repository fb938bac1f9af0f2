//! Voice-call presence inside a channel.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::{ChannelId, ServerId};
use realtime_test_utils::{TestCluster, TestServer, TestUser};
use wire_protocol::Envelope;

struct Call {
    cluster: TestCluster,
    server_id: ServerId,
    channel_id: ChannelId,
}

async fn voice_server(owner: &TestUser, members: &[&TestUser]) -> Call {
    let server = TestServer::new("s1", owner)
        .with_members(members)
        .with_voice_channel("v1");
    Call {
        cluster: TestCluster::start(&[server]).await.unwrap(),
        server_id: ServerId::from("s1"),
        channel_id: ChannelId::from("v1"),
    }
}

impl Call {
    fn join(&self, user: &TestUser, deafened: bool, muted: bool) {
        self.cluster
            .api
            .connect_to_call(&self.server_id, &self.channel_id, &user.id, deafened, muted)
            .unwrap();
    }

    fn leave(&self, user: &TestUser) {
        self.cluster
            .api
            .disconnect_from_call(&self.server_id, &self.channel_id, &user.id)
            .unwrap();
    }
}

fn count_initializations(envelopes: &[Envelope]) -> usize {
    envelopes
        .iter()
        .filter(|envelope| matches!(envelope, Envelope::CallInitialization(_)))
        .count()
}

#[tokio::test]
async fn test_joiner_receives_single_private_initialization() {
    let alice = TestUser::new("alice");
    let bob = TestUser::new("bob");
    let carol = TestUser::new("carol");
    let call = voice_server(&alice, &[&bob, &carol]).await;

    let [mut alice_session, mut bob_session] = call.cluster.online([&alice, &bob]).await.unwrap();
    call.join(&alice, false, false);
    call.join(&bob, true, true);
    alice_session.drain().await.unwrap();
    bob_session.drain().await.unwrap();

    let mut carol_session = call.cluster.connect(&carol).await.unwrap();
    let envelopes = carol_session.drain().await.unwrap();

    assert_eq!(count_initializations(&envelopes), 1);
    let init = envelopes
        .iter()
        .find_map(|envelope| match envelope {
            Envelope::CallInitialization(init) => Some(init),
            _ => None,
        })
        .unwrap();
    assert_eq!(init.channel_id, call.channel_id);
    let participants: Vec<_> = init.call_users.iter().map(|u| u.user_id.clone()).collect();
    assert_eq!(participants, vec![alice.id.clone(), bob.id.clone()]);
    assert!(init.call_users.iter().any(|u| u.user_id == bob.id && u.muted && u.deafened));

    // Existing members only see the server-level join.
    for session in [&mut alice_session, &mut bob_session] {
        assert_eq!(count_initializations(&session.drain().await.unwrap()), 0);
    }

    call.cluster.shutdown().await;
}

#[tokio::test]
async fn test_no_initialization_without_an_active_call() {
    let alice = TestUser::new("alice");
    let bob = TestUser::new("bob");
    let call = voice_server(&alice, &[&bob]).await;

    let [_alice_session] = call.cluster.online([&alice]).await.unwrap();
    let mut bob_session = call.cluster.connect(&bob).await.unwrap();

    assert_eq!(count_initializations(&bob_session.drain().await.unwrap()), 0);

    call.cluster.shutdown().await;
}

#[tokio::test]
async fn test_rejoining_updates_voice_state() {
    let alice = TestUser::new("alice");
    let bob = TestUser::new("bob");
    let call = voice_server(&alice, &[&bob]).await;
    let [mut alice_session, mut bob_session] = call.cluster.online([&alice, &bob]).await.unwrap();

    call.join(&alice, false, false);
    call.join(&alice, false, true);

    let snapshot = call.cluster.inspect_channel("s1", "v1").await.unwrap();
    assert_eq!(snapshot.call.len(), 1);
    assert!(snapshot.call.first().unwrap().muted);

    for session in [&mut alice_session, &mut bob_session] {
        let updates: Vec<bool> = session
            .drain()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|envelope| match envelope {
                Envelope::ConnectToCall(joined) => Some(joined.muted),
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec![false, true]);
    }

    call.cluster.shutdown().await;
}

#[tokio::test]
async fn test_leaving_is_broadcast_to_every_member_including_leaver() {
    let alice = TestUser::new("alice");
    let bob = TestUser::new("bob");
    let call = voice_server(&alice, &[&bob]).await;
    let [mut alice_session, mut bob_session] = call.cluster.online([&alice, &bob]).await.unwrap();
    call.join(&alice, false, false);
    alice_session.drain().await.unwrap();
    bob_session.drain().await.unwrap();

    call.leave(&alice);

    for session in [&mut alice_session, &mut bob_session] {
        match session.recv().await.unwrap() {
            Envelope::DisconnectFromCall(left) => assert_eq!(left.user_id, alice.id),
            other => panic!("expected call leave, got {other:?}"),
        }
    }
    assert!(call
        .cluster
        .inspect_channel("s1", "v1")
        .await
        .unwrap()
        .call
        .is_empty());

    // A second leave is silent.
    call.leave(&alice);
    alice_session.assert_quiet().await;
    bob_session.assert_quiet().await;

    call.cluster.shutdown().await;
}

#[tokio::test]
async fn test_session_stop_ends_call_presence() {
    let alice = TestUser::new("alice");
    let bob = TestUser::new("bob");
    let call = voice_server(&alice, &[&bob]).await;
    let [alice_session, mut bob_session] = call.cluster.online([&alice, &bob]).await.unwrap();
    call.join(&alice, false, false);
    bob_session.drain().await.unwrap();

    alice_session.stop().await.unwrap();

    let envelopes = bob_session.drain().await.unwrap();
    assert!(envelopes
        .iter()
        .any(|e| matches!(e, Envelope::DisconnectFromCall(left) if left.user_id == alice.id)));
    assert!(envelopes
        .iter()
        .any(|e| matches!(e, Envelope::UserDisconnect(gone) if gone.user_id == alice.id)));
    let snapshot = call.cluster.inspect_channel("s1", "v1").await.unwrap();
    assert!(snapshot.call.is_empty());
    assert_eq!(snapshot.users, vec![bob.id.clone()]);

    call.cluster.shutdown().await;
}

#[tokio::test]
async fn test_offline_user_cannot_join_call() {
    let alice = TestUser::new("alice");
    let bob = TestUser::new("bob");
    let call = voice_server(&alice, &[&bob]).await;
    let [mut alice_session] = call.cluster.online([&alice]).await.unwrap();

    call.join(&bob, false, false);

    assert!(call
        .cluster
        .inspect_channel("s1", "v1")
        .await
        .unwrap()
        .call
        .is_empty());
    alice_session.assert_quiet().await;

    call.cluster.shutdown().await;
}
