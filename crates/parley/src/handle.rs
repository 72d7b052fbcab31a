//! Talking to a running session: commands in, notices out.
//!
//! A [`SessionHandle`] is cheap to clone and can be used from any task.
//! Each call sends a command into the session's inbox and, where there is
//! an answer, waits for it on a oneshot reply channel. The session driver
//! is the only place connection records change.

use parley_negotiation::{IceConnectionState, NegotiationState, SignalOutcome};
use parley_protocol::{ChannelId, ConnectionKey, Endpoint};
use parley_transport::TransportError;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::ParleyError;

type Reply<T> = oneshot::Sender<Result<T, ParleyError>>;

/// Everything the driver reacts to, besides peer events.
pub(crate) enum Inbound {
    /// One text frame from the relay.
    RelayFrame(String),
    /// The relay reader stopped: `None` on a clean close.
    RelayClosed(Option<TransportError>),
    Command(SessionCommand),
}

/// Commands sent to the session driver through a [`SessionHandle`].
pub(crate) enum SessionCommand {
    OpenChannel {
        channel: Option<ChannelId>,
        endpoint: Option<Endpoint>,
        reply: Reply<ConnectionKey>,
    },
    Renegotiate {
        key: ConnectionKey,
        reply: Reply<SignalOutcome>,
    },
    SendData {
        key: ConnectionKey,
        label: Option<String>,
        text: String,
        reply: Reply<()>,
    },
    SendRelayText {
        text: String,
        reply: Reply<()>,
    },
    CloseConnection {
        key: ConnectionKey,
        reply: Reply<()>,
    },
    ConnectionState {
        key: ConnectionKey,
        reply: Reply<NegotiationState>,
    },
    Connections {
        reply: Reply<Vec<(ConnectionKey, NegotiationState)>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Something observable that happened in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A negotiation round completed; the record is `Stable`.
    Ready { key: ConnectionKey },
    /// An adapter operation failed and the record was closed.
    Failed { key: ConnectionKey, reason: String },
    /// The record was closed on request.
    Closed { key: ConnectionKey },
    /// A data channel was opened, locally or by the remote peer.
    DataChannelOpened { key: ConnectionKey, label: String },
    /// A text message arrived on a data channel.
    DataReceived {
        key: ConnectionKey,
        label: String,
        text: String,
    },
    /// The engine reported a connectivity change.
    IceStateChanged {
        key: ConnectionKey,
        state: IceConnectionState,
    },
    /// A relay frame that is not a signaling frame.
    RelayText { text: String },
    /// The relay connection ended; every record has been closed.
    RelayDisconnected,
}

/// Handle to a running session. Used to send commands to it.
///
/// Cloning is cheap: it's an `mpsc` sender plus a `broadcast`
/// sender for subscriptions.
#[derive(Clone)]
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<Inbound>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionHandle {
    pub(crate) fn new(
        inbox: mpsc::UnboundedSender<Inbound>,
        notices: broadcast::Sender<SessionNotice>,
    ) -> Self {
        Self { inbox, notices }
    }

    /// Subscribes to notices raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Opens a new multiplexed link and starts negotiating it.
    ///
    /// With no `channel` a random id is chosen. In the tagged family
    /// `endpoint` picks the local side (default `Sender`, which offers);
    /// the numbered family takes no endpoint.
    ///
    /// # Errors
    /// - [`ParleyError::NotMultiplexed`] in direct mode.
    /// - [`ParleyError::DuplicateConnection`] if the link already exists.
    pub async fn open_channel(
        &self,
        channel: Option<ChannelId>,
        endpoint: Option<Endpoint>,
    ) -> Result<ConnectionKey, ParleyError> {
        self.request(|reply| SessionCommand::OpenChannel {
            channel,
            endpoint,
            reply,
        })
        .await
    }

    /// Asks an offerer record to start a new negotiation round.
    pub async fn renegotiate(&self, key: ConnectionKey) -> Result<SignalOutcome, ParleyError> {
        self.request(|reply| SessionCommand::Renegotiate { key, reply })
            .await
    }

    /// Sends text on a data channel of `key`. With no `label` the first
    /// open channel is used.
    pub async fn send_data(
        &self,
        key: ConnectionKey,
        label: Option<&str>,
        text: impl Into<String>,
    ) -> Result<(), ParleyError> {
        let label = label.map(str::to_owned);
        let text = text.into();
        self.request(|reply| SessionCommand::SendData {
            key,
            label,
            text,
            reply,
        })
        .await
    }

    /// Writes raw text to the relay, bypassing framing.
    ///
    /// # Errors
    /// [`ParleyError::Protocol`] if peers in this session's frame mode
    /// would read `text` as a signaling frame.
    pub async fn send_relay_text(&self, text: impl Into<String>) -> Result<(), ParleyError> {
        let text = text.into();
        self.request(|reply| SessionCommand::SendRelayText { text, reply })
            .await
    }

    /// Closes one record: its data channels first, then its connection.
    pub async fn close_connection(&self, key: ConnectionKey) -> Result<(), ParleyError> {
        self.request(|reply| SessionCommand::CloseConnection { key, reply })
            .await
    }

    /// Returns the negotiation state of one record.
    pub async fn connection_state(
        &self,
        key: ConnectionKey,
    ) -> Result<NegotiationState, ParleyError> {
        self.request(|reply| SessionCommand::ConnectionState { key, reply })
            .await
    }

    /// Lists every record with its negotiation state.
    pub async fn connections(&self) -> Result<Vec<(ConnectionKey, NegotiationState)>, ParleyError> {
        self.request(|reply| SessionCommand::Connections { reply })
            .await
    }

    /// Closes every record and the relay, then stops the driver.
    ///
    /// Returns once the driver has finished shutting down.
    pub async fn shutdown(&self) -> Result<(), ParleyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox
            .send(Inbound::Command(SessionCommand::Shutdown { reply: reply_tx }))
            .map_err(|_| ParleyError::SessionStopped)?;
        reply_rx.await.map_err(|_| ParleyError::SessionStopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, ParleyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox
            .send(Inbound::Command(command(reply_tx)))
            .map_err(|_| ParleyError::SessionStopped)?;
        reply_rx.await.map_err(|_| ParleyError::SessionStopped)?
    }
}
