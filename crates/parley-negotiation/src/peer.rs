//! The peer connection adapter contract.
//!
//! The negotiation layer never talks to a media engine directly. It drives
//! a [`PeerConnection`] through the offer/answer calls and receives the
//! engine's callbacks as [`PeerEvent`]s pushed into a [`PeerEventSink`].
//!
//! The sink is the only way an engine reports back. Callbacks may fire on
//! any thread; all they do is push an event onto an unbounded queue owned
//! by the session driver, which applies it later in order.

use std::fmt;
use std::future::Future;

use parley_protocol::{CandidateDescriptor, ConnectionKey, SessionDescription};
use tokio::sync::mpsc;

use crate::IceConnectionState;

// ---------------------------------------------------------------------------
// PeerOp
// ---------------------------------------------------------------------------

/// Names one adapter operation, for errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerOp {
    Connect,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddCandidate,
    CreateDataChannel,
    ChannelSend,
    Close,
}

impl fmt::Display for PeerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::CreateOffer => "create offer",
            Self::CreateAnswer => "create answer",
            Self::SetLocalDescription => "set local description",
            Self::SetRemoteDescription => "set remote description",
            Self::AddCandidate => "add candidate",
            Self::CreateDataChannel => "create data channel",
            Self::ChannelSend => "send on data channel",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Adapter traits
// ---------------------------------------------------------------------------

/// One peer connection inside a media/data engine.
///
/// All operations are async and may complete later than they are called;
/// the negotiator awaits each one before issuing the next, so an
/// implementation never sees overlapping calls on the same connection.
///
/// Implementations report engine callbacks through the [`PeerEventSink`]
/// they were given at [`PeerConnector::connect`].
pub trait PeerConnection: Send + 'static {
    /// The engine's error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The engine's data channel handle.
    type DataChannel: DataChannel;

    /// Generates a local offer. Does not apply it.
    fn create_offer(
        &mut self,
    ) -> impl Future<Output = Result<SessionDescription, Self::Error>> + Send;

    /// Generates a local answer to the applied remote offer. Does not
    /// apply it.
    fn create_answer(
        &mut self,
    ) -> impl Future<Output = Result<SessionDescription, Self::Error>> + Send;

    /// Applies a locally created description. Local candidates start to
    /// flow (as [`PeerEvent::IceCandidate`]) once this succeeds.
    fn set_local_description(
        &mut self,
        desc: &SessionDescription,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Applies a description received from the remote peer.
    fn set_remote_description(
        &mut self,
        desc: &SessionDescription,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Adds one remote candidate. Only valid after a remote description
    /// has been applied.
    fn add_candidate(
        &mut self,
        candidate: &CandidateDescriptor,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Opens a data channel. On a fresh connection this makes the engine
    /// raise [`PeerEvent::NegotiationNeeded`].
    fn create_data_channel(
        &mut self,
        label: &str,
    ) -> impl Future<Output = Result<Self::DataChannel, Self::Error>> + Send;

    /// Tears the connection down.
    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A data channel opened on a [`PeerConnection`].
pub trait DataChannel: Send + Sync + 'static {
    /// The engine's error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The label the channel was created with.
    fn label(&self) -> &str;

    /// Sends one text message.
    fn send(&self, text: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Closes the channel.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Creates [`PeerConnection`]s, one per connection record.
pub trait PeerConnector: Send + 'static {
    /// The connection type this connector produces.
    type Connection: PeerConnection;

    /// The error returned when a connection cannot be created.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a connection configured with `ice_servers` that reports
    /// its callbacks to `events`.
    fn connect(
        &mut self,
        ice_servers: &[String],
        events: PeerEventSink<ChannelOf<Self::Connection>>,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// The data channel type of a connection.
pub type ChannelOf<P> = <P as PeerConnection>::DataChannel;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A callback raised by the engine for one connection.
#[derive(Debug)]
pub enum PeerEvent<D> {
    /// A local candidate was discovered and should be sent to the remote.
    IceCandidate(CandidateDescriptor),
    /// The engine wants a (re)negotiation round.
    NegotiationNeeded,
    /// The remote side opened a data channel.
    DataChannel(D),
    /// Transport connectivity changed.
    IceState(IceConnectionState),
    /// A text message arrived on a data channel.
    ChannelMessage { label: String, text: String },
}

/// A [`PeerEvent`] tagged with the record it belongs to.
#[derive(Debug)]
pub struct PeerNotification<D> {
    pub key: ConnectionKey,
    pub event: PeerEvent<D>,
}

/// Where an engine pushes its callbacks.
///
/// Cheap to clone; every clone reports for the same record. Pushing never
/// blocks and silently does nothing once the session has gone away.
pub struct PeerEventSink<D> {
    key: ConnectionKey,
    tx: mpsc::UnboundedSender<PeerNotification<D>>,
}

impl<D> PeerEventSink<D> {
    /// Creates a sink that tags every event with `key`.
    pub fn new(key: ConnectionKey, tx: mpsc::UnboundedSender<PeerNotification<D>>) -> Self {
        Self { key, tx }
    }

    /// The record this sink reports for.
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn ice_candidate(&self, candidate: CandidateDescriptor) {
        self.push(PeerEvent::IceCandidate(candidate));
    }

    pub fn negotiation_needed(&self) {
        self.push(PeerEvent::NegotiationNeeded);
    }

    pub fn data_channel(&self, channel: D) {
        self.push(PeerEvent::DataChannel(channel));
    }

    pub fn ice_state(&self, state: IceConnectionState) {
        self.push(PeerEvent::IceState(state));
    }

    pub fn channel_message(&self, label: impl Into<String>, text: impl Into<String>) {
        self.push(PeerEvent::ChannelMessage {
            label: label.into(),
            text: text.into(),
        });
    }

    fn push(&self, event: PeerEvent<D>) {
        let notification = PeerNotification {
            key: self.key.clone(),
            event,
        };
        // The receiver only goes away when the session is dropped.
        let _ = self.tx.send(notification);
    }
}

// Manual impls: deriving would require `D: Clone` / `D: Debug`.
impl<D> Clone for PeerEventSink<D> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<D> fmt::Debug for PeerEventSink<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEventSink")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::Endpoint;

    #[test]
    fn test_sink_tags_events_with_key() {
        let (tx, mut rx) = mpsc::unbounded_channel::<PeerNotification<()>>();
        let key = ConnectionKey::tagged("cam", Endpoint::Sender);
        let sink = PeerEventSink::new(key.clone(), tx);

        sink.clone().negotiation_needed();
        sink.channel_message("sendChannel", "hi");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.key, key);
        assert!(matches!(first.event, PeerEvent::NegotiationNeeded));

        let second = rx.try_recv().unwrap();
        assert!(matches!(
            second.event,
            PeerEvent::ChannelMessage { ref label, ref text } if label == "sendChannel" && text == "hi"
        ));
    }

    #[test]
    fn test_sink_push_after_receiver_dropped_is_noop() {
        let (tx, rx) = mpsc::unbounded_channel::<PeerNotification<()>>();
        let sink = PeerEventSink::new(ConnectionKey::default(), tx);
        drop(rx);
        sink.ice_state(IceConnectionState::Checking);
    }

    #[test]
    fn test_peer_op_display() {
        assert_eq!(PeerOp::SetRemoteDescription.to_string(), "set remote description");
    }
}
