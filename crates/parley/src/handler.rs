//! Per-event handlers for the session driver.
//!
//! The flow for a relay frame is:
//!   1. Decode with the session's frame mode → `Other` frames become
//!      [`SessionNotice::RelayText`]
//!   2. Route → which record the frame is for, and whether it may create
//!      that record
//!   3. Decode the JSON payload → hand it to the record's negotiator
//!   4. Drive the negotiator → send whatever it produced, in order
//!
//! Peer events and handle commands follow the same shape: find the
//! record, change it, drive it.

use parley_negotiation::{
    DataChannel, NegotiationError, NegotiationRole, NegotiationState, Negotiator, Outbound,
    PeerConnector, PeerEvent, PeerEventSink, PeerOp, SignalOutcome,
};
use parley_protocol::{
    CandidateDescriptor, ChannelId, Codec, ConnectionKey, Endpoint, FrameMode,
    SessionDescription, SignalKind, SignalingMessage,
};
use parley_transport::{RelayChannel, TransportError};

use crate::config::random_hex;
use crate::handle::{SessionCommand, SessionNotice};
use crate::record::ConnectionRecord;
use crate::session::{Flow, Notification};
use crate::{ParleyError, SignalingSession};

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Where a decoded signaling frame goes.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Route {
    /// Hand the signal to `key`. If no such record exists, create one
    /// with `create`, or drop the signal when `create` is `None`.
    Deliver {
        key: ConnectionKey,
        create: Option<NegotiationRole>,
    },
    /// The remote announced a link; make sure `key` exists with `role`.
    Announce {
        key: ConnectionKey,
        role: NegotiationRole,
    },
    Ignore(&'static str),
}

/// Decides which local record a frame is addressed to.
///
/// In the tagged family an endpoint tag names the *sender's* side, so the
/// local record is the opposite endpoint. Untagged offers go to the local
/// receiver, untagged answers to the local sender, and untagged
/// candidates to whichever single record exists on the channel.
pub(crate) fn route<'a>(
    mode: FrameMode,
    msg: &SignalingMessage,
    known: impl IntoIterator<Item = &'a ConnectionKey>,
) -> Route {
    use NegotiationRole::{Answerer, Offerer};
    use SignalKind::*;

    match mode {
        FrameMode::Direct => match msg.kind {
            Offer | Answer | Candidate => Route::Deliver {
                key: ConnectionKey::default(),
                create: None,
            },
            _ => Route::Ignore("not a direct signal"),
        },
        FrameMode::Numbered => {
            let Some(channel) = msg.channel.clone() else {
                return Route::Ignore("numbered frame without channel");
            };
            let key = ConnectionKey::channel(channel);
            match msg.kind {
                Channel => Route::Announce { key, role: Answerer },
                Offer | Candidate => Route::Deliver {
                    key,
                    create: Some(Answerer),
                },
                Answer => Route::Deliver { key, create: None },
                _ => Route::Ignore("not a numbered signal"),
            }
        }
        FrameMode::Tagged => {
            let Some(channel) = msg.channel.clone() else {
                return Route::Ignore("tagged frame without channel");
            };
            match msg.kind {
                Sender | Channel => Route::Announce {
                    key: ConnectionKey::tagged(channel, Endpoint::Receiver),
                    role: Answerer,
                },
                Receiver => Route::Announce {
                    key: ConnectionKey::tagged(channel, Endpoint::Sender),
                    role: Offerer,
                },
                Offer | Answer | Candidate => {
                    let local = match (msg.endpoint, msg.kind) {
                        (Some(remote), _) => remote.opposite(),
                        (None, Offer) => Endpoint::Receiver,
                        (None, Answer) => Endpoint::Sender,
                        (None, _) => {
                            let mut on_channel = known
                                .into_iter()
                                .filter(|k| k.channel.as_ref() == Some(&channel));
                            match (on_channel.next(), on_channel.next()) {
                                (Some(only), None) => only.endpoint.unwrap_or(Endpoint::Receiver),
                                (None, _) => Endpoint::Receiver,
                                (Some(_), Some(_)) => {
                                    return Route::Ignore("untagged candidate matches two connections");
                                }
                            }
                        }
                    };
                    let create = (local == Endpoint::Receiver && msg.kind != Answer)
                        .then_some(Answerer);
                    Route::Deliver {
                        key: ConnectionKey::tagged(channel, local),
                        create,
                    }
                }
                Other => Route::Ignore("not a tagged signal"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Driver handlers
// ---------------------------------------------------------------------------

impl<R, C> SignalingSession<R, C>
where
    R: RelayChannel<Error = TransportError>,
    C: PeerConnector,
{
    // -- relay frames -------------------------------------------------------

    pub(crate) async fn handle_frame(&mut self, raw: &str) {
        let msg = self.config.mode.decode(raw);

        if msg.kind == SignalKind::Other {
            tracing::debug!(client = %self.config.client_id, "non-signaling relay text");
            self.notify(SessionNotice::RelayText { text: msg.payload });
            return;
        }

        match route(self.config.mode, &msg, self.records.keys()) {
            Route::Ignore(reason) => {
                tracing::warn!(kind = %msg.kind, reason, "signal dropped");
            }
            Route::Announce { key, role } => {
                tracing::debug!(%key, kind = %msg.kind, "channel announced");
                self.handle_announcement(key, role).await;
            }
            Route::Deliver { key, create } => {
                tracing::debug!(%key, kind = %msg.kind, "signal received");
                self.deliver(key, create, msg).await;
            }
        }
    }

    async fn handle_announcement(&mut self, key: ConnectionKey, role: NegotiationRole) {
        if self.retired.contains(&key) {
            tracing::warn!(%key, "announcement for closed connection, ignoring");
            return;
        }
        if self.records.contains_key(&key) {
            tracing::debug!(%key, "announced connection already exists");
            return;
        }
        if let Err(e) = self.create_record(key.clone(), role).await {
            self.report_failure(&key, e);
        }
    }

    async fn deliver(
        &mut self,
        key: ConnectionKey,
        create: Option<NegotiationRole>,
        msg: SignalingMessage,
    ) {
        if self.retired.contains(&key) {
            tracing::warn!(%key, kind = %msg.kind, "signal for closed connection, ignoring");
            return;
        }
        if !self.records.contains_key(&key) {
            let Some(role) = create else {
                tracing::warn!(%key, kind = %msg.kind, "signal for unknown connection, ignoring");
                return;
            };
            if let Err(e) = self.create_record(key.clone(), role).await {
                self.report_failure(&key, e);
                return;
            }
        }

        match msg.kind {
            SignalKind::Offer | SignalKind::Answer => {
                let desc: SessionDescription = match self.codec.decode(&msg.payload) {
                    Ok(desc) => desc,
                    Err(e) => {
                        tracing::warn!(%key, error = %e, "malformed description dropped");
                        return;
                    }
                };
                let Some(record) = self.records.get_mut(&key) else {
                    return;
                };
                let outcome = if msg.kind == SignalKind::Offer {
                    record.negotiator.receive_offer(desc)
                } else {
                    record.negotiator.receive_answer(desc)
                };
                match outcome {
                    Ok(SignalOutcome::Queued) => self.drive(&key).await,
                    Ok(outcome) => tracing::debug!(%key, ?outcome, "description not queued"),
                    Err(e) => tracing::debug!(%key, error = %e, "description for closed connection"),
                }
            }
            SignalKind::Candidate => {
                let candidate: CandidateDescriptor = match self.codec.decode(&msg.payload) {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        tracing::warn!(%key, error = %e, "malformed candidate dropped");
                        return;
                    }
                };
                let Some(record) = self.records.get_mut(&key) else {
                    return;
                };
                match record.negotiator.receive_candidate(candidate).await {
                    Ok(outcome) => tracing::trace!(%key, ?outcome, "remote candidate"),
                    Err(e) => tracing::debug!(%key, error = %e, "candidate for closed connection"),
                }
            }
            _ => {}
        }
    }

    // -- peer events --------------------------------------------------------

    pub(crate) async fn handle_peer_event(&mut self, notification: Notification<C>) {
        let key = notification.key;
        let Some(record) = self.records.get_mut(&key) else {
            tracing::trace!(%key, "event for removed connection");
            return;
        };

        match notification.event {
            PeerEvent::IceCandidate(candidate) => match record.negotiator.local_candidate(candidate) {
                Ok(Some(out)) => {
                    if let Err(e) = self.transmit(&key, vec![out]).await {
                        tracing::warn!(%key, error = %e, "failed to send candidate");
                    }
                }
                Ok(None) => tracing::trace!(%key, "local candidate held"),
                Err(_) => {}
            },
            PeerEvent::NegotiationNeeded => match record.negotiator.negotiation_needed() {
                Ok(SignalOutcome::Queued) => self.drive(&key).await,
                Ok(outcome) => tracing::debug!(%key, ?outcome, "negotiation-needed not queued"),
                Err(_) => {}
            },
            PeerEvent::DataChannel(channel) => {
                let label = channel.label().to_owned();
                if record.negotiator.is_closed() {
                    let _ = channel.close().await;
                    return;
                }
                record.channels.push(channel);
                tracing::info!(%key, %label, "remote data channel opened");
                self.notify(SessionNotice::DataChannelOpened { key, label });
            }
            PeerEvent::IceState(state) => {
                tracing::debug!(%key, %state, "ice connection state");
                self.notify(SessionNotice::IceStateChanged { key, state });
            }
            PeerEvent::ChannelMessage { label, text } => {
                self.notify(SessionNotice::DataReceived { key, label, text });
            }
        }
    }

    // -- commands -----------------------------------------------------------

    pub(crate) async fn handle_command(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::OpenChannel {
                channel,
                endpoint,
                reply,
            } => {
                let result = self.open_channel(channel, endpoint).await;
                let _ = reply.send(result);
            }
            SessionCommand::Renegotiate { key, reply } => {
                let result = self.renegotiate(&key).await;
                let _ = reply.send(result);
            }
            SessionCommand::SendData {
                key,
                label,
                text,
                reply,
            } => {
                let result = self.send_data(&key, label.as_deref(), &text).await;
                let _ = reply.send(result);
            }
            SessionCommand::SendRelayText { text, reply } => {
                let result = self.send_signal(&SignalingMessage::other(text)).await;
                let _ = reply.send(result);
            }
            SessionCommand::CloseConnection { key, reply } => {
                let result = self.close_connection(&key).await;
                let _ = reply.send(result);
            }
            SessionCommand::ConnectionState { key, reply } => {
                let result = self
                    .records
                    .get(&key)
                    .map(|record| record.negotiator.state())
                    .ok_or(ParleyError::UnknownConnection(key));
                let _ = reply.send(result);
            }
            SessionCommand::Connections { reply } => {
                let list = self
                    .records
                    .iter()
                    .map(|(key, record)| (key.clone(), record.negotiator.state()))
                    .collect();
                let _ = reply.send(Ok(list));
            }
            SessionCommand::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return Flow::Stop(Ok(()));
            }
        }
        Flow::Continue
    }

    async fn open_channel(
        &mut self,
        channel: Option<ChannelId>,
        endpoint: Option<Endpoint>,
    ) -> Result<ConnectionKey, ParleyError> {
        let (key, announce, role) = match self.config.mode {
            FrameMode::Direct => return Err(ParleyError::NotMultiplexed),
            FrameMode::Numbered => {
                if endpoint.is_some() {
                    return Err(parley_protocol::ProtocolError::InvalidMessage(
                        "numbered channels have no endpoint".into(),
                    )
                    .into());
                }
                let channel = match channel {
                    Some(channel) => channel.as_number().map(ChannelId::from).ok_or_else(|| {
                        parley_protocol::ProtocolError::InvalidMessage(format!(
                            "numbered channel id must be a decimal u32, got {channel:?}"
                        ))
                    })?,
                    None => ChannelId::from(rand::random::<u32>()),
                };
                (
                    ConnectionKey::channel(channel),
                    SignalKind::Channel,
                    NegotiationRole::Offerer,
                )
            }
            FrameMode::Tagged => {
                let channel = channel.unwrap_or_else(|| ChannelId::new(random_hex::<4>()));
                match endpoint.unwrap_or(Endpoint::Sender) {
                    Endpoint::Sender => (
                        ConnectionKey::tagged(channel, Endpoint::Sender),
                        SignalKind::Sender,
                        NegotiationRole::Offerer,
                    ),
                    Endpoint::Receiver => (
                        ConnectionKey::tagged(channel, Endpoint::Receiver),
                        SignalKind::Receiver,
                        NegotiationRole::Answerer,
                    ),
                }
            }
        };

        if self.records.contains_key(&key) {
            return Err(ParleyError::DuplicateConnection(key));
        }
        // Reopening a closed link is an explicit local decision.
        self.retired.remove(&key);

        let mut msg = SignalingMessage::new(announce, self.config.client_id.clone());
        msg.channel = key.channel.clone();
        self.send_signal(&msg).await?;

        self.create_record(key.clone(), role).await?;
        Ok(key)
    }

    async fn renegotiate(&mut self, key: &ConnectionKey) -> Result<SignalOutcome, ParleyError> {
        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| ParleyError::UnknownConnection(key.clone()))?;
        let outcome = record.negotiator.negotiation_needed()?;
        if outcome == SignalOutcome::Queued {
            self.drive(key).await;
        }
        Ok(outcome)
    }

    async fn send_data(
        &self,
        key: &ConnectionKey,
        label: Option<&str>,
        text: &str,
    ) -> Result<(), ParleyError> {
        let record = self
            .records
            .get(key)
            .ok_or_else(|| ParleyError::UnknownConnection(key.clone()))?;
        if record.negotiator.is_closed() {
            return Err(NegotiationError::Closed(key.clone()).into());
        }
        let channel = record
            .channel(label)
            .ok_or_else(|| ParleyError::NoDataChannel(key.clone()))?;
        channel
            .send(text)
            .await
            .map_err(|e| NegotiationError::adapter(PeerOp::ChannelSend, e))?;
        Ok(())
    }

    async fn close_connection(&mut self, key: &ConnectionKey) -> Result<(), ParleyError> {
        let mut record = self
            .records
            .remove(key)
            .ok_or_else(|| ParleyError::UnknownConnection(key.clone()))?;
        record.close().await;
        self.retired.insert(key.clone());
        self.notify(SessionNotice::Closed { key: key.clone() });
        Ok(())
    }

    async fn shutdown(&mut self) {
        tracing::info!(client = %self.config.client_id, "signaling session shutting down");
        self.close_all().await;
        if let Err(e) = self.relay.close().await {
            tracing::debug!(error = %e, "relay close failed");
        }
        self.stop_reader();
    }

    pub(crate) async fn relay_lost(&mut self, error: Option<TransportError>) {
        match error {
            Some(e) => tracing::warn!(client = %self.config.client_id, error = %e, "relay connection lost"),
            None => tracing::info!(client = %self.config.client_id, "relay connection closed"),
        }
        self.close_all().await;
        self.stop_reader();
        self.notify(SessionNotice::RelayDisconnected);
    }

    // -- records ------------------------------------------------------------

    /// Creates a record and, for an offerer, starts negotiating it.
    pub(crate) async fn create_record(
        &mut self,
        key: ConnectionKey,
        role: NegotiationRole,
    ) -> Result<(), ParleyError> {
        if self.records.contains_key(&key) {
            return Err(ParleyError::DuplicateConnection(key));
        }

        let sink = PeerEventSink::new(key.clone(), self.peer_tx.clone());
        let peer = self
            .connector
            .connect(&self.config.ice_servers, sink)
            .await
            .map_err(|e| NegotiationError::adapter(PeerOp::Connect, e))?;

        tracing::info!(client = %self.config.client_id, %key, %role, "connection created");
        let negotiator = Negotiator::new(key.clone(), role, peer);
        self.records
            .insert(key.clone(), ConnectionRecord::new(negotiator));

        if role == NegotiationRole::Offerer {
            self.begin_negotiation(&key).await;
        }
        Ok(())
    }

    /// Opens the configured data channel, which makes the engine ask for
    /// negotiation. Without one, asks the negotiator directly.
    async fn begin_negotiation(&mut self, key: &ConnectionKey) {
        let label = self.config.data_channel.clone();
        let Some(record) = self.records.get_mut(key) else {
            return;
        };

        if let Some(label) = label {
            match record.negotiator.open_data_channel(&label).await {
                Ok(channel) => {
                    record.channels.push(channel);
                    self.notify(SessionNotice::DataChannelOpened {
                        key: key.clone(),
                        label,
                    });
                    return;
                }
                Err(e) => {
                    tracing::warn!(%key, error = %e, "could not open data channel, negotiating without it");
                }
            }
        }

        match record.negotiator.negotiation_needed() {
            Ok(SignalOutcome::Queued) => self.drive(key).await,
            Ok(outcome) => tracing::debug!(%key, ?outcome, "negotiation not queued"),
            Err(e) => tracing::debug!(%key, error = %e, "cannot negotiate"),
        }
    }

    /// Runs the record's pending signals and sends what they produce.
    async fn drive(&mut self, key: &ConnectionKey) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };

        let before = record.negotiator.state();
        let out = match record.negotiator.process().await {
            Ok(out) => out,
            Err(e) => {
                self.fail_record(key, e.into()).await;
                return;
            }
        };
        let after = record.negotiator.state();
        let sent_description = out.iter().any(|o| matches!(o, Outbound::Description(_)));

        if let Err(e) = self.transmit(key, out).await {
            tracing::warn!(%key, error = %e, "failed to send signals");
        }

        if after == NegotiationState::Stable
            && (before != NegotiationState::Stable || sent_description)
        {
            tracing::info!(client = %self.config.client_id, %key, "connection ready");
            self.notify(SessionNotice::Ready { key: key.clone() });
        }
    }

    async fn fail_record(&mut self, key: &ConnectionKey, error: ParleyError) {
        if let Some(record) = self.records.get_mut(key) {
            record.close().await;
        }
        self.report_failure(key, error);
    }

    fn report_failure(&self, key: &ConnectionKey, error: ParleyError) {
        tracing::warn!(%key, error = %error, "connection failed");
        self.notify(SessionNotice::Failed {
            key: key.clone(),
            reason: error.to_string(),
        });
    }

    async fn close_all(&mut self) {
        let mut closed = Vec::new();
        for (key, record) in self.records.iter_mut() {
            if !record.negotiator.is_closed() {
                closed.push(key.clone());
            }
            record.close().await;
        }
        for key in closed {
            self.notify(SessionNotice::Closed { key });
        }
    }

    // -- outbound -----------------------------------------------------------

    /// Sends a record's outbound signals, addressed the way `key` is.
    async fn transmit(&self, key: &ConnectionKey, out: Vec<Outbound>) -> Result<(), ParleyError> {
        for item in out {
            let msg = match item {
                Outbound::Description(desc) => {
                    SignalingMessage::new(desc.kind.signal_kind(), self.codec.encode(&desc)?)
                }
                Outbound::Candidate(candidate) => {
                    SignalingMessage::new(SignalKind::Candidate, self.codec.encode(&candidate)?)
                }
            };
            self.send_signal(&msg.for_key(key)).await?;
        }
        Ok(())
    }

    async fn send_signal(&self, msg: &SignalingMessage) -> Result<(), ParleyError> {
        let text = self.config.mode.encode(msg)?;
        self.relay.send(&text).await?;
        tracing::trace!(kind = %msg.kind, len = text.len(), "signal sent");
        Ok(())
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }
}
