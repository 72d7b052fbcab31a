//! End-to-end tests: two sessions negotiating through an in-memory relay.
//!
//! The relay is a `MemoryHub`, so every frame one member sends reaches
//! every other member. Some tests add a third "spy" member to watch the
//! wire or to inject hand-written frames.

use std::time::Duration;

use parley::prelude::*;
use parley::{IceConnectionState, MemoryHub, NegotiationState, RelayChannel, SignalOutcome};
use parley_negotiation::scripted::{PeerCall, ScriptedConnector};
use parley_negotiation::PeerOp;
use parley_protocol::{CandidateDescriptor, Codec, JsonCodec, SessionDescription, SignalKind};
use parley_transport::MemoryRelay;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn candidate(host: &str) -> CandidateDescriptor {
    CandidateDescriptor::new(
        "0",
        Some(0),
        format!("candidate:1 1 UDP 2122260223 {host} 50000 typ host"),
    )
}

/// Waits for the first notice matching `pred`, skipping others.
async fn wait_for(
    notices: &mut broadcast::Receiver<SessionNotice>,
    pred: impl Fn(&SessionNotice) -> bool,
) -> SessionNotice {
    timeout(WAIT, async {
        loop {
            match notices.recv().await {
                Ok(notice) if pred(&notice) => return notice,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("notice channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

async fn wait_ready(notices: &mut broadcast::Receiver<SessionNotice>, key: &ConnectionKey) {
    wait_for(notices, |n| matches!(n, SessionNotice::Ready { key: k } if k == key)).await;
}

/// Polls `check` until it holds.
async fn eventually(check: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Sends a plain-text frame and waits until the session has handled it.
/// Frames are handled in order, so everything the spy sent before has
/// been handled too.
async fn settle(spy: &MemoryRelay, notices: &mut broadcast::Receiver<SessionNotice>) {
    spy.send("TEST!settle").await.unwrap();
    wait_for(notices, |n| {
        matches!(n, SessionNotice::RelayText { text } if text == "TEST!settle")
    })
    .await;
}

async fn assert_no_frame(relay: &MemoryRelay) {
    let frame = timeout(Duration::from_millis(50), relay.recv()).await;
    assert!(frame.is_err(), "unexpected frame {frame:?}");
}

async fn next_frame(relay: &MemoryRelay) -> String {
    timeout(WAIT, relay.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("relay should not error")
        .expect("relay should be open")
}

/// A session running on its own task.
struct Running {
    handle: SessionHandle,
    notices: broadcast::Receiver<SessionNotice>,
    task: JoinHandle<Result<(), ParleyError>>,
}

fn spawn(mut session: SignalingSession<MemoryRelay, ScriptedConnector>) -> Running {
    let handle = session.handle();
    let notices = session.subscribe();
    let task = tokio::spawn(async move { session.run().await });
    Running {
        handle,
        notices,
        task,
    }
}

fn direct_pair(
    hub: &MemoryHub,
) -> (Running, ScriptedConnector, Running, ScriptedConnector) {
    let alice_engine = ScriptedConnector::new("alice").with_candidates(vec![candidate("10.0.0.1")]);
    let bob_engine = ScriptedConnector::new("bob").with_candidates(vec![candidate("10.0.0.2")]);

    let alice = SessionBuilder::new()
        .client_id("alice")
        .role(NegotiationRole::Offerer)
        .build(hub.join(), alice_engine.clone());
    let bob = SessionBuilder::new()
        .client_id("bob")
        .role(NegotiationRole::Answerer)
        .build(hub.join(), bob_engine.clone());

    (spawn(alice), alice_engine, spawn(bob), bob_engine)
}

fn multiplexed_pair(
    hub: &MemoryHub,
    mode: FrameMode,
    bob_engine: ScriptedConnector,
) -> (Running, ScriptedConnector, Running) {
    let alice_engine = ScriptedConnector::new("alice");
    let alice = SessionBuilder::new()
        .client_id("alice")
        .mode(mode)
        .build(hub.join(), alice_engine.clone());
    let bob = SessionBuilder::new()
        .client_id("bob")
        .mode(mode)
        .build(hub.join(), bob_engine);
    (spawn(alice), alice_engine, spawn(bob))
}

// =========================================================================
// Direct mode
// =========================================================================

#[tokio::test]
async fn test_direct_session_reaches_ready_on_both_sides() {
    let hub = MemoryHub::new();
    let spy = hub.join();
    let (mut alice, alice_engine, mut bob, bob_engine) = direct_pair(&hub);
    let key = ConnectionKey::default();

    wait_ready(&mut alice.notices, &key).await;
    wait_ready(&mut bob.notices, &key).await;

    // --- Wire order: exactly one offer, first; one answer; two candidates ---
    let mut frames = Vec::new();
    for _ in 0..4 {
        frames.push(next_frame(&spy).await);
    }
    assert!(frames[0].starts_with("OFFER!"), "first frame was {:?}", frames[0]);
    assert_eq!(frames.iter().filter(|f| f.starts_with("OFFER!")).count(), 1);
    assert_eq!(frames.iter().filter(|f| f.starts_with("ANSWER!")).count(), 1);
    assert_eq!(frames.iter().filter(|f| f.starts_with("CANDIDATE!")).count(), 2);

    let offer = FrameMode::Direct.decode(&frames[0]);
    let desc: SessionDescription = JsonCodec.decode(&offer.payload).unwrap();
    assert!(desc.sdp.contains("a=datachannel:sendChannel"));

    // --- Each side applied the other's candidate ---
    let from_bob = PeerCall::AddCandidate(candidate("10.0.0.2").candidate);
    let from_alice = PeerCall::AddCandidate(candidate("10.0.0.1").candidate);
    eventually(|| alice_engine.calls().contains(&from_bob)).await;
    eventually(|| bob_engine.calls().contains(&from_alice)).await;

    assert_eq!(
        alice.handle.connection_state(key.clone()).await.unwrap(),
        NegotiationState::Stable
    );

    alice.handle.shutdown().await.unwrap();
    bob.handle.shutdown().await.unwrap();
    assert!(alice.task.await.unwrap().is_ok());
    assert!(bob.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_direct_data_channel_send_and_receive() {
    let hub = MemoryHub::new();
    let (mut alice, alice_engine, mut bob, bob_engine) = direct_pair(&hub);
    let key = ConnectionKey::default();

    wait_for(&mut bob.notices, |n| {
        matches!(n, SessionNotice::DataChannelOpened { label, .. } if label == "sendChannel")
    })
    .await;
    wait_ready(&mut alice.notices, &key).await;

    alice
        .handle
        .send_data(key.clone(), None, "hello")
        .await
        .unwrap();
    assert!(alice_engine.calls().contains(&PeerCall::ChannelSend {
        label: "sendChannel".into(),
        text: "hello".into(),
    }));

    bob_engine.deliver(&key, "sendChannel", "hi back");
    let notice = wait_for(&mut bob.notices, |n| matches!(n, SessionNotice::DataReceived { .. })).await;
    assert_eq!(
        notice,
        SessionNotice::DataReceived {
            key: key.clone(),
            label: "sendChannel".into(),
            text: "hi back".into(),
        }
    );

    let missing = alice.handle.send_data(key, Some("video"), "x").await;
    assert!(matches!(missing, Err(ParleyError::NoDataChannel(_))));
}

#[tokio::test]
async fn test_direct_answerer_reports_ice_state() {
    let hub = MemoryHub::new();
    let (_alice, _alice_engine, mut bob, _bob_engine) = direct_pair(&hub);

    let notice = wait_for(&mut bob.notices, |n| {
        matches!(n, SessionNotice::IceStateChanged { state: IceConnectionState::Connected, .. })
    })
    .await;
    assert!(matches!(notice, SessionNotice::IceStateChanged { .. }));
}

#[tokio::test]
async fn test_renegotiation_produces_second_round() {
    let hub = MemoryHub::new();
    let spy = hub.join();
    let (mut alice, alice_engine, mut bob, _bob_engine) = direct_pair(&hub);
    let key = ConnectionKey::default();

    wait_ready(&mut alice.notices, &key).await;
    wait_ready(&mut bob.notices, &key).await;

    let outcome = alice.handle.renegotiate(key.clone()).await.unwrap();
    assert_eq!(outcome, SignalOutcome::Queued);

    wait_ready(&mut alice.notices, &key).await;
    wait_ready(&mut bob.notices, &key).await;

    let offers = alice_engine
        .calls()
        .into_iter()
        .filter(|c| *c == PeerCall::CreateOffer)
        .count();
    assert_eq!(offers, 2);

    let mut offer_frames = 0;
    for _ in 0..6 {
        if next_frame(&spy).await.starts_with("OFFER!") {
            offer_frames += 1;
        }
    }
    assert_eq!(offer_frames, 2);
}

#[tokio::test]
async fn test_relay_text_passes_through_both_ways() {
    let hub = MemoryHub::new();
    let spy = hub.join();
    let alice = SessionBuilder::new()
        .role(NegotiationRole::Answerer)
        .build(hub.join(), ScriptedConnector::new("alice"));
    let mut alice = spawn(alice);

    spy.send("TEST!WEBSOCKET TEST").await.unwrap();
    let notice = wait_for(&mut alice.notices, |n| matches!(n, SessionNotice::RelayText { .. })).await;
    assert_eq!(
        notice,
        SessionNotice::RelayText {
            text: "TEST!WEBSOCKET TEST".into()
        }
    );

    alice.handle.send_relay_text("hello relay").await.unwrap();
    assert_eq!(next_frame(&spy).await, "hello relay");

    let framed = alice.handle.send_relay_text(r#"OFFER!{"SessionType":"offer","Sdp":"v=0"}"#).await;
    assert!(matches!(framed, Err(ParleyError::Protocol(_))));
    assert_no_frame(&spy).await;
}

#[tokio::test]
async fn test_candidate_before_offer_is_buffered_then_applied() {
    let hub = MemoryHub::new();
    let spy = hub.join();
    let engine = ScriptedConnector::new("bob");
    let bob = SessionBuilder::new()
        .role(NegotiationRole::Answerer)
        .build(hub.join(), engine.clone());
    let _bob = spawn(bob);

    let early = candidate("192.168.1.9");
    let candidate_json = JsonCodec.encode(&early).unwrap();
    let offer_json = JsonCodec
        .encode(&SessionDescription::offer("v=0\r\no=spy 1 1 IN IP4 0.0.0.0\r\n"))
        .unwrap();

    spy.send(&format!("CANDIDATE!{candidate_json}")).await.unwrap();
    spy.send(&format!("OFFER!{offer_json}")).await.unwrap();

    let answer = FrameMode::Direct.decode(&next_frame(&spy).await);
    assert_eq!(answer.kind, SignalKind::Answer);

    let calls = engine.calls();
    let set_remote = calls
        .iter()
        .position(|c| *c == PeerCall::SetRemote(parley_protocol::SdpKind::Offer))
        .expect("offer applied");
    let added = calls
        .iter()
        .position(|c| *c == PeerCall::AddCandidate(early.candidate.clone()))
        .expect("candidate applied");
    let answered = calls
        .iter()
        .position(|c| *c == PeerCall::CreateAnswer)
        .expect("answer created");
    assert!(set_remote < added && added < answered);
}

#[tokio::test]
async fn test_malformed_payload_is_dropped_and_session_survives() {
    let hub = MemoryHub::new();
    let spy = hub.join();
    let engine = ScriptedConnector::new("bob");
    let bob = SessionBuilder::new()
        .role(NegotiationRole::Answerer)
        .build(hub.join(), engine.clone());
    let mut bob = spawn(bob);

    spy.send(r#"OFFER!{"SessionType":"of"#).await.unwrap();
    spy.send(r#"ANSWER!{"SessionType":"answer","Sdp":"v=0"}"#)
        .await
        .unwrap();
    settle(&spy, &mut bob.notices).await;

    assert_eq!(
        bob.handle
            .connection_state(ConnectionKey::default())
            .await
            .unwrap(),
        NegotiationState::Idle
    );
    assert!(!engine
        .calls()
        .iter()
        .any(|c| matches!(c, PeerCall::SetRemote(_) | PeerCall::CreateAnswer)));
    assert_no_frame(&spy).await;
}

#[tokio::test]
async fn test_relay_loss_closes_channels_before_connection() {
    let hub = MemoryHub::new();
    let (mut alice, alice_engine, mut bob, _bob_engine) = direct_pair(&hub);
    let key = ConnectionKey::default();
    wait_ready(&mut alice.notices, &key).await;
    wait_ready(&mut bob.notices, &key).await;

    hub.shutdown();

    wait_for(&mut alice.notices, |n| *n == SessionNotice::RelayDisconnected).await;
    let result = timeout(WAIT, alice.task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ParleyError::RelayDisconnected)));

    let calls = alice_engine.calls_for(&key);
    let channel_closed = calls
        .iter()
        .position(|c| *c == PeerCall::CloseChannel("sendChannel".into()))
        .expect("data channel closed");
    let peer_closed = calls
        .iter()
        .position(|c| *c == PeerCall::Close)
        .expect("connection closed");
    assert!(channel_closed < peer_closed);

    let result = timeout(WAIT, bob.task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ParleyError::RelayDisconnected)));
    assert!(matches!(
        alice.handle.connection_state(key).await,
        Err(ParleyError::SessionStopped)
    ));
}

#[tokio::test]
async fn test_open_channel_in_direct_mode_is_rejected() {
    let hub = MemoryHub::new();
    let (alice, _, _bob, _) = direct_pair(&hub);
    let result = alice.handle.open_channel(None, None).await;
    assert!(matches!(result, Err(ParleyError::NotMultiplexed)));
}

#[tokio::test]
async fn test_adapter_failure_closes_channels_before_connection() {
    let hub = MemoryHub::new();
    let engine = ScriptedConnector::new("alice").failing(PeerOp::SetLocalDescription);
    let alice = SessionBuilder::new()
        .role(NegotiationRole::Offerer)
        .build(hub.join(), engine.clone());
    let mut alice = spawn(alice);
    let key = ConnectionKey::default();

    wait_for(&mut alice.notices, |n| matches!(n, SessionNotice::Failed { .. })).await;

    let calls = engine.calls_for(&key);
    let channel_closed = calls
        .iter()
        .position(|c| *c == PeerCall::CloseChannel("sendChannel".into()))
        .expect("data channel closed");
    let peer_closed = calls
        .iter()
        .position(|c| *c == PeerCall::Close)
        .expect("connection closed");
    assert!(channel_closed < peer_closed, "calls were {calls:?}");
    assert_eq!(calls.iter().filter(|c| **c == PeerCall::Close).count(), 1);
    assert_eq!(
        alice.handle.connection_state(key).await.unwrap(),
        NegotiationState::Closed
    );
}

// =========================================================================
// Multiplexed modes
// =========================================================================

#[tokio::test]
async fn test_numbered_channel_reaches_ready() {
    let hub = MemoryHub::new();
    let spy = hub.join();
    let (mut alice, _alice_engine, mut bob) =
        multiplexed_pair(&hub, FrameMode::Numbered, ScriptedConnector::new("bob"));

    let key = alice
        .handle
        .open_channel(Some(ChannelId::from(7u32)), None)
        .await
        .unwrap();
    assert_eq!(key, ConnectionKey::channel(7u32));

    wait_ready(&mut alice.notices, &key).await;
    wait_ready(&mut bob.notices, &key).await;

    assert_eq!(next_frame(&spy).await, "CHANNEL!7!alice");
    assert!(next_frame(&spy).await.starts_with("OFFER!7!"));

    let duplicate = alice.handle.open_channel(Some(ChannelId::from(7u32)), None).await;
    assert!(matches!(duplicate, Err(ParleyError::DuplicateConnection(_))));
}

#[tokio::test]
async fn test_numbered_adapter_failure_is_isolated() {
    let hub = MemoryHub::new();
    let bad = ConnectionKey::channel(2u32);
    let bob_engine = ScriptedConnector::new("bob").failing_on(bad.clone(), PeerOp::CreateAnswer);
    let (mut alice, _alice_engine, mut bob) =
        multiplexed_pair(&hub, FrameMode::Numbered, bob_engine.clone());

    let good = alice
        .handle
        .open_channel(Some(ChannelId::from(1u32)), None)
        .await
        .unwrap();
    alice
        .handle
        .open_channel(Some(ChannelId::from(2u32)), None)
        .await
        .unwrap();

    let failed = wait_for(&mut bob.notices, |n| matches!(n, SessionNotice::Failed { .. })).await;
    assert!(matches!(failed, SessionNotice::Failed { ref key, .. } if *key == bad));
    // Alice is ready only after Bob answered on the good channel.
    wait_ready(&mut alice.notices, &good).await;

    assert_eq!(
        bob.handle.connection_state(bad.clone()).await.unwrap(),
        NegotiationState::Closed
    );
    assert_eq!(
        bob.handle.connection_state(good.clone()).await.unwrap(),
        NegotiationState::Stable
    );
    let calls = bob_engine.calls_for(&bad);
    assert!(calls.contains(&PeerCall::Close));
    assert!(!calls.contains(&PeerCall::CreateAnswer));
}

#[tokio::test]
async fn test_tagged_channels_reach_ready_from_either_endpoint() {
    let hub = MemoryHub::new();
    let (mut alice, _alice_engine, mut bob) =
        multiplexed_pair(&hub, FrameMode::Tagged, ScriptedConnector::new("bob"));

    // Alice sends on "cam": she offers, Bob receives.
    let cam = alice
        .handle
        .open_channel(Some(ChannelId::new("cam")), None)
        .await
        .unwrap();
    assert_eq!(cam, ConnectionKey::tagged("cam", Endpoint::Sender));
    wait_ready(&mut alice.notices, &cam).await;
    wait_ready(&mut bob.notices, &ConnectionKey::tagged("cam", Endpoint::Receiver)).await;

    // Alice receives on "mic": Bob's side becomes the offering sender.
    let mic = alice
        .handle
        .open_channel(Some(ChannelId::new("mic")), Some(Endpoint::Receiver))
        .await
        .unwrap();
    assert_eq!(mic, ConnectionKey::tagged("mic", Endpoint::Receiver));
    wait_ready(&mut alice.notices, &mic).await;
    wait_ready(&mut bob.notices, &ConnectionKey::tagged("mic", Endpoint::Sender)).await;

    let mut connections = bob.handle.connections().await.unwrap();
    connections.sort_by_key(|(key, _)| key.to_string());
    assert_eq!(
        connections,
        vec![
            (ConnectionKey::tagged("cam", Endpoint::Receiver), NegotiationState::Stable),
            (ConnectionKey::tagged("mic", Endpoint::Sender), NegotiationState::Stable),
        ]
    );
}

#[tokio::test]
async fn test_close_connection_removes_record() {
    let hub = MemoryHub::new();
    let (mut alice, alice_engine, _bob) =
        multiplexed_pair(&hub, FrameMode::Numbered, ScriptedConnector::new("bob"));

    let key = alice.handle.open_channel(None, None).await.unwrap();
    wait_ready(&mut alice.notices, &key).await;

    alice.handle.close_connection(key.clone()).await.unwrap();
    wait_for(&mut alice.notices, |n| matches!(n, SessionNotice::Closed { key: k } if *k == key)).await;

    assert!(matches!(
        alice.handle.connection_state(key.clone()).await,
        Err(ParleyError::UnknownConnection(_))
    ));
    assert_eq!(alice_engine.calls_for(&key).last(), Some(&PeerCall::Close));
}

#[tokio::test]
async fn test_late_signals_for_closed_channel_are_dropped() {
    let hub = MemoryHub::new();
    let spy = hub.join();
    let engine = ScriptedConnector::new("alice");
    let alice = SessionBuilder::new()
        .client_id("alice")
        .mode(FrameMode::Numbered)
        .build(hub.join(), engine.clone());
    let mut alice = spawn(alice);

    // "09" names the same channel peers write as 9.
    let key = alice
        .handle
        .open_channel(Some(ChannelId::new("09")), None)
        .await
        .unwrap();
    assert_eq!(key, ConnectionKey::channel(9u32));
    assert_eq!(next_frame(&spy).await, "CHANNEL!9!alice");
    alice.handle.close_connection(key.clone()).await.unwrap();

    let candidate_json = JsonCodec.encode(&candidate("10.0.0.9")).unwrap();
    let offer_json = JsonCodec
        .encode(&SessionDescription::offer("v=0\r\no=spy 1 1 IN IP4 0.0.0.0\r\n"))
        .unwrap();
    spy.send(&format!("CANDIDATE!9!{candidate_json}")).await.unwrap();
    spy.send(&format!("OFFER!9!{offer_json}")).await.unwrap();
    spy.send("CHANNEL!9!spy").await.unwrap();
    settle(&spy, &mut alice.notices).await;

    assert!(alice.handle.connections().await.unwrap().is_empty());
    assert_eq!(engine.connections().len(), 1);

    // Opening it again locally is allowed.
    let reopened = alice
        .handle
        .open_channel(Some(ChannelId::from(9u32)), None)
        .await
        .unwrap();
    assert_eq!(reopened, key);
}

// =========================================================================
// Pump-driven sessions
// =========================================================================

#[tokio::test]
async fn test_pump_drives_sessions_without_run() {
    let hub = MemoryHub::new();
    let mut alice = SessionBuilder::new()
        .role(NegotiationRole::Offerer)
        .data_channel(None)
        .build(hub.join(), ScriptedConnector::new("alice"));
    let mut bob = SessionBuilder::new()
        .role(NegotiationRole::Answerer)
        .build(hub.join(), ScriptedConnector::new("bob"));
    let mut alice_notices = alice.subscribe();

    alice.start().await.unwrap();
    bob.start().await.unwrap();

    let ready = timeout(WAIT, async {
        loop {
            alice.pump().await.unwrap();
            bob.pump().await.unwrap();
            if let Ok(SessionNotice::Ready { .. }) = alice_notices.try_recv() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "sessions never became ready");
    assert_eq!(alice.connection_count(), 1);
}
