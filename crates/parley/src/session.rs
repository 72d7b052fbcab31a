//! `SessionBuilder` and the session driver loop.
//!
//! A [`SignalingSession`] ties the layers together:
//! relay transport → frame codec → connection records → peer adapter.
//!
//! Two producers feed the driver and neither touches a record:
//! - a spawned reader task pushes every relay frame into the inbox;
//! - every `PeerEventSink` pushes engine callbacks into the peer queue.
//!
//! The driver ([`SignalingSession::run`], or [`SignalingSession::pump`]
//! for callers that tick it themselves) is the only consumer of both
//! queues, so records are mutated from one place, in arrival order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parley_negotiation::{ChannelOf, NegotiationRole, PeerConnector, PeerNotification};
use parley_protocol::{ConnectionKey, FrameMode, JsonCodec};
use parley_transport::{RelayChannel, RelayId, TransportError, WebSocketRelay};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::handle::{Inbound, SessionHandle, SessionNotice};
use crate::record::ConnectionRecord;
use crate::{ParleyError, SessionConfig};

pub(crate) type PeerConn<C> = <C as PeerConnector>::Connection;
pub(crate) type Notification<C> = PeerNotification<ChannelOf<PeerConn<C>>>;

// ---------------------------------------------------------------------------
// SessionBuilder
// ---------------------------------------------------------------------------

/// Builder for configuring a [`SignalingSession`].
///
/// # Example
///
/// ```rust,ignore
/// use parley::prelude::*;
///
/// let mut session = SessionBuilder::new()
///     .mode(FrameMode::Numbered)
///     .connect_websocket("ws://127.0.0.1:3000/", my_connector)
///     .await?;
/// session.run().await
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = id.into();
        self
    }

    pub fn mode(mut self, mode: FrameMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Sets the role of the direct-mode record.
    pub fn role(mut self, role: NegotiationRole) -> Self {
        self.config.role = role;
        self
    }

    pub fn ice_servers(mut self, servers: Vec<String>) -> Self {
        self.config.ice_servers = servers;
        self
    }

    /// Sets the data channel offerers open, or `None` to negotiate
    /// without one.
    pub fn data_channel(mut self, label: Option<&str>) -> Self {
        self.config.data_channel = label.map(str::to_owned);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    pub fn notice_capacity(mut self, capacity: usize) -> Self {
        self.config.notice_capacity = capacity;
        self
    }

    /// Builds a session over an already connected relay.
    pub fn build<R, C>(self, relay: R, connector: C) -> SignalingSession<R, C>
    where
        R: RelayChannel<Error = TransportError>,
        C: PeerConnector,
    {
        SignalingSession::new(self.config, relay, connector)
    }

    /// Connects to a WebSocket relay and builds a session over it.
    ///
    /// # Errors
    /// Returns [`ParleyError::Transport`] if the relay cannot be reached.
    pub async fn connect_websocket<C: PeerConnector>(
        self,
        url: &str,
        connector: C,
    ) -> Result<SignalingSession<WebSocketRelay, C>, ParleyError> {
        let relay = WebSocketRelay::connect(url, &self.config.user_agent).await?;
        Ok(self.build(relay, connector))
    }
}

// ---------------------------------------------------------------------------
// SignalingSession
// ---------------------------------------------------------------------------

/// One client's signaling session over one relay connection.
///
/// Owns every connection record. Call [`run`](Self::run) to drive it, or
/// [`start`](Self::start) once and then [`pump`](Self::pump) periodically.
/// Talk to it from other tasks through a [`SessionHandle`].
pub struct SignalingSession<R, C>
where
    R: RelayChannel<Error = TransportError>,
    C: PeerConnector,
{
    pub(crate) config: SessionConfig,
    pub(crate) relay: Arc<R>,
    pub(crate) connector: C,
    pub(crate) codec: JsonCodec,
    pub(crate) records: HashMap<ConnectionKey, ConnectionRecord<PeerConn<C>>>,
    /// Keys closed on request; late frames for them are dropped.
    pub(crate) retired: HashSet<ConnectionKey>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    pub(crate) peer_tx: mpsc::UnboundedSender<Notification<C>>,
    peer_rx: mpsc::UnboundedReceiver<Notification<C>>,
    pub(crate) notices: broadcast::Sender<SessionNotice>,
    reader: Option<JoinHandle<()>>,
    started: bool,
    stopped: bool,
}

/// What the driver does after handling one event.
pub(crate) enum Flow {
    Continue,
    Stop(Result<(), ParleyError>),
}

enum Event<C: PeerConnector> {
    Inbound(Inbound),
    Peer(Notification<C>),
}

impl<R, C> SignalingSession<R, C>
where
    R: RelayChannel<Error = TransportError>,
    C: PeerConnector,
{
    fn new(config: SessionConfig, relay: R, connector: C) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(config.notice_capacity.max(1));
        Self {
            config,
            relay: Arc::new(relay),
            connector,
            codec: JsonCodec,
            records: HashMap::new(),
            retired: HashSet::new(),
            inbox_tx,
            inbox,
            peer_tx,
            peer_rx,
            notices,
            reader: None,
            started: false,
            stopped: false,
        }
    }

    /// Returns a handle for sending commands from other tasks.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.inbox_tx.clone(), self.notices.clone())
    }

    /// Subscribes to notices raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The relay connection this session runs on.
    pub fn relay_id(&self) -> RelayId {
        self.relay.id()
    }

    /// Number of connection records, closed ones included.
    pub fn connection_count(&self) -> usize {
        self.records.len()
    }

    /// Starts reading the relay and, in direct mode, creates the single
    /// connection record. Calling it again does nothing.
    ///
    /// # Errors
    /// Returns an error if the direct-mode record cannot be created.
    pub async fn start(&mut self) -> Result<(), ParleyError> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let relay = Arc::clone(&self.relay);
        let inbox = self.inbox_tx.clone();
        self.reader = Some(tokio::spawn(read_relay(relay, inbox)));

        tracing::info!(
            client = %self.config.client_id,
            relay = %self.relay.id(),
            mode = %self.config.mode,
            "signaling session started"
        );

        if self.config.mode == FrameMode::Direct {
            let role = self.config.role;
            self.create_record(ConnectionKey::default(), role).await?;
        }
        Ok(())
    }

    /// Drives the session until it is shut down or the relay goes away.
    ///
    /// Starts the session first if needed.
    ///
    /// # Errors
    /// - [`ParleyError::RelayDisconnected`] when the relay connection ends.
    ///   Every record has been closed by then; reconnecting is up to the
    ///   caller.
    /// - [`ParleyError::SessionStopped`] if the session was already stopped.
    pub async fn run(&mut self) -> Result<(), ParleyError> {
        if self.stopped {
            return Err(ParleyError::SessionStopped);
        }
        self.start().await?;

        loop {
            let event: Event<C> = tokio::select! {
                Some(inbound) = self.inbox.recv() => Event::Inbound(inbound),
                Some(notification) = self.peer_rx.recv() => Event::Peer(notification),
                else => return Err(ParleyError::SessionStopped),
            };
            if let Flow::Stop(result) = self.handle_event(event).await {
                self.stopped = true;
                return result;
            }
        }
    }

    /// Handles every event that is ready right now, without waiting.
    ///
    /// Returns how many events were handled. Useful when the session is
    /// driven from a periodic tick instead of its own task.
    ///
    /// # Errors
    /// Same as [`run`](Self::run). A shutdown handled by this call returns
    /// `Ok`; later calls return [`ParleyError::SessionStopped`].
    pub async fn pump(&mut self) -> Result<usize, ParleyError> {
        if self.stopped {
            return Err(ParleyError::SessionStopped);
        }
        self.start().await?;

        let mut handled = 0;
        loop {
            let event: Event<C> = if let Ok(inbound) = self.inbox.try_recv() {
                Event::Inbound(inbound)
            } else if let Ok(notification) = self.peer_rx.try_recv() {
                Event::Peer(notification)
            } else {
                return Ok(handled);
            };
            handled += 1;
            if let Flow::Stop(result) = self.handle_event(event).await {
                self.stopped = true;
                return result.map(|()| handled);
            }
        }
    }

    async fn handle_event(&mut self, event: Event<C>) -> Flow {
        match event {
            Event::Inbound(Inbound::RelayFrame(text)) => {
                self.handle_frame(&text).await;
                Flow::Continue
            }
            Event::Inbound(Inbound::RelayClosed(error)) => {
                self.relay_lost(error).await;
                Flow::Stop(Err(ParleyError::RelayDisconnected))
            }
            Event::Inbound(Inbound::Command(command)) => {
                self.handle_command(command).await
            }
            Event::Peer(notification) => {
                self.handle_peer_event(notification).await;
                Flow::Continue
            }
        }
    }

    pub(crate) fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl<R, C> Drop for SignalingSession<R, C>
where
    R: RelayChannel<Error = TransportError>,
    C: PeerConnector,
{
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Forwards relay frames into the driver's inbox until the relay ends.
async fn read_relay<R>(relay: Arc<R>, inbox: mpsc::UnboundedSender<Inbound>)
where
    R: RelayChannel<Error = TransportError>,
{
    loop {
        match relay.recv().await {
            Ok(Some(text)) => {
                tracing::trace!(relay = %relay.id(), len = text.len(), "relay frame received");
                if inbox.send(Inbound::RelayFrame(text)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!(relay = %relay.id(), "relay closed");
                let _ = inbox.send(Inbound::RelayClosed(None));
                break;
            }
            Err(e) => {
                tracing::warn!(relay = %relay.id(), error = %e, "relay receive failed");
                let _ = inbox.send(Inbound::RelayClosed(Some(e)));
                break;
            }
        }
    }
}
