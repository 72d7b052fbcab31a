//! Two signaling sessions talking through an in-process relay.
//!
//! Runs one direct-mode link and one tagged channel end to end with the
//! scripted engine, then exchanges a data-channel message. Set
//! `RUST_LOG=parley=debug` to watch the negotiation.

use std::time::Duration;

use parley::prelude::*;
use parley::{MemoryHub, NegotiationState, DEFAULT_DATA_CHANNEL};
use parley_negotiation::scripted::{PeerCall, ScriptedConnector};
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parley=info".parse()?),
        )
        .init();

    direct().await?;
    tagged().await?;
    Ok(())
}

/// Offerer and answerer on the single direct-mode link.
async fn direct() -> Result<(), Box<dyn std::error::Error>> {
    let hub = MemoryHub::new();
    let alice_engine = ScriptedConnector::new("alice");
    let bob_engine = ScriptedConnector::new("bob");

    let mut alice = SessionBuilder::new()
        .client_id("alice")
        .role(NegotiationRole::Offerer)
        .build(hub.join(), alice_engine.clone());
    let mut bob = SessionBuilder::new()
        .client_id("bob")
        .role(NegotiationRole::Answerer)
        .build(hub.join(), bob_engine.clone());

    let (alice_handle, mut alice_notices) = (alice.handle(), alice.subscribe());
    let (bob_handle, mut bob_notices) = (bob.handle(), bob.subscribe());
    let alice_task = tokio::spawn(async move { alice.run().await });
    let bob_task = tokio::spawn(async move { bob.run().await });

    let key = ConnectionKey::default();
    ready(&mut alice_notices, &key).await?;
    ready(&mut bob_notices, &key).await?;
    tracing::info!(%key, "direct link ready on both sides");

    alice_handle.send_data(key.clone(), None, "hello bob").await?;
    let sent = alice_engine
        .calls()
        .into_iter()
        .filter(|call| matches!(call, PeerCall::ChannelSend { .. }))
        .count();
    tracing::info!(sent, "alice sent on the data channel");

    bob_engine.deliver(&key, DEFAULT_DATA_CHANNEL, "hello alice");
    let received = next(&mut bob_notices, |n| matches!(n, SessionNotice::DataReceived { .. })).await?;
    tracing::info!(?received, "bob received");

    alice_handle.shutdown().await?;
    bob_handle.shutdown().await?;
    alice_task.await??;
    bob_task.await??;
    Ok(())
}

/// Alice opens a tagged channel as sender; Bob answers as receiver.
async fn tagged() -> Result<(), Box<dyn std::error::Error>> {
    let hub = MemoryHub::new();
    let mut alice = SessionBuilder::new()
        .client_id("alice")
        .mode(FrameMode::Tagged)
        .build(hub.join(), ScriptedConnector::new("alice"));
    let mut bob = SessionBuilder::new()
        .client_id("bob")
        .mode(FrameMode::Tagged)
        .build(hub.join(), ScriptedConnector::new("bob"));

    let (alice_handle, mut alice_notices) = (alice.handle(), alice.subscribe());
    let bob_handle = bob.handle();
    let alice_task = tokio::spawn(async move { alice.run().await });
    let bob_task = tokio::spawn(async move { bob.run().await });

    let key = alice_handle
        .open_channel(Some(ChannelId::new("cam")), None)
        .await?;
    ready(&mut alice_notices, &key).await?;

    for (key, state) in bob_handle.connections().await? {
        tracing::info!(%key, %state, "bob connection");
        if state != NegotiationState::Stable {
            return Err(format!("{key} stuck in {state}").into());
        }
    }

    alice_handle.shutdown().await?;
    bob_handle.shutdown().await?;
    alice_task.await??;
    bob_task.await??;
    Ok(())
}

async fn ready(
    notices: &mut broadcast::Receiver<SessionNotice>,
    key: &ConnectionKey,
) -> Result<SessionNotice, Box<dyn std::error::Error>> {
    next(notices, |n| matches!(n, SessionNotice::Ready { key: k } if k == key)).await
}

/// Waits for the first notice matching `pred`.
async fn next(
    notices: &mut broadcast::Receiver<SessionNotice>,
    pred: impl Fn(&SessionNotice) -> bool,
) -> Result<SessionNotice, Box<dyn std::error::Error>> {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match notices.recv().await {
                Ok(notice) if pred(&notice) => return Ok(notice),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    Ok(found)
}
