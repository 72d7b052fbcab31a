//! The negotiator: one connection record's offer/answer state machine.
//!
//! Signals arrive from two directions. Remote descriptions come in over
//! the relay; local negotiation-needed comes from the engine. Neither is
//! acted on where it arrives. Each one sets a pending tag on the record,
//! and [`Negotiator::process`] later consumes every set tag exactly once,
//! awaiting each adapter call before issuing the next.
//!
//! # Round trip
//!
//! ```text
//!  Offerer                                    Answerer
//!  negotiation_needed()  → tag
//!  process(): create_offer   ── OFFER ──→     receive_offer() → tag
//!                                             process(): apply_remote_offer
//!                                                        create_answer
//!  receive_answer() → tag    ←── ANSWER ──
//!  process(): apply_remote_answer
//!  Stable                                     Stable
//! ```
//!
//! Candidates flow both ways at any time. Remote candidates that arrive
//! before a remote description is applied are buffered and flushed right
//! after it, in arrival order. Local candidates the engine finds before
//! the local description has gone out are held and released after it.

use std::collections::VecDeque;

use parley_protocol::{
    CandidateDescriptor, ConnectionKey, SdpKind, SessionDescription,
};

use crate::{
    ChannelOf, NegotiationError, NegotiationRole, NegotiationState,
    PeerConnection, PeerOp,
};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a negotiator did with an incoming signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Tagged for the next [`Negotiator::process`] pass.
    Queued,
    /// Handed to the adapter right away.
    Applied,
    /// Held until a remote description has been applied.
    Buffered,
    /// Dropped; nothing changed.
    Ignored(IgnoreReason),
}

/// Why a signal was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The signal is meant for the other role.
    WrongRole,
    /// An answer arrived while no offer of ours was outstanding.
    NotAwaitingAnswer,
    /// The same description was already applied or queued.
    Duplicate,
    /// A negotiation round is already queued or in progress.
    AlreadyNegotiating,
    /// The adapter refused it, or the payload has the wrong kind.
    Rejected,
}

/// Something the session must send to the remote peer, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Description(SessionDescription),
    Candidate(CandidateDescriptor),
}

#[derive(Debug, Default)]
struct PendingSignals {
    negotiation_needed: bool,
    offer: Option<SessionDescription>,
    answer: Option<SessionDescription>,
}

impl PendingSignals {
    fn is_empty(&self) -> bool {
        !self.negotiation_needed && self.offer.is_none() && self.answer.is_none()
    }
}

// ---------------------------------------------------------------------------
// Negotiator
// ---------------------------------------------------------------------------

/// Drives one [`PeerConnection`] through the offer/answer exchange.
///
/// Not thread-safe: a negotiator is owned by the session driver and all
/// calls on it are sequential.
pub struct Negotiator<P: PeerConnection> {
    key: ConnectionKey,
    role: NegotiationRole,
    state: NegotiationState,
    peer: P,
    pending: PendingSignals,
    remote_candidates: VecDeque<CandidateDescriptor>,
    local_candidates: VecDeque<CandidateDescriptor>,
    has_remote_description: bool,
    /// Set once a local description has been handed out for sending.
    local_sent: bool,
    last_remote_offer: Option<String>,
    last_remote_answer: Option<String>,
    /// Cleared once `PeerConnection::close` has been called.
    adapter_open: bool,
}

impl<P: PeerConnection> Negotiator<P> {
    pub fn new(key: ConnectionKey, role: NegotiationRole, peer: P) -> Self {
        Self {
            key,
            role,
            state: NegotiationState::Idle,
            peer,
            pending: PendingSignals::default(),
            remote_candidates: VecDeque::new(),
            local_candidates: VecDeque::new(),
            has_remote_description: false,
            local_sent: false,
            last_remote_offer: None,
            last_remote_answer: None,
            adapter_open: true,
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    /// `true` if a later [`process`](Self::process) call has work to do.
    pub fn has_pending_signals(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Remote candidates waiting for a remote description.
    pub fn buffered_remote_candidates(&self) -> usize {
        self.remote_candidates.len()
    }

    /// Local candidates waiting for the local description to go out.
    pub fn held_local_candidates(&self) -> usize {
        self.local_candidates.len()
    }

    // -- incoming signals ---------------------------------------------------

    /// Records that the engine wants a negotiation round.
    ///
    /// Only an offerer negotiates, and only from `Idle` or `Stable`. A
    /// request made while a round is queued or running is coalesced into
    /// it.
    pub fn negotiation_needed(&mut self) -> Result<SignalOutcome, NegotiationError> {
        self.ensure_open()?;

        if self.role != NegotiationRole::Offerer {
            tracing::debug!(key = %self.key, "answerer ignores negotiation-needed");
            return Ok(SignalOutcome::Ignored(IgnoreReason::WrongRole));
        }
        let can_start = matches!(
            self.state,
            NegotiationState::Idle | NegotiationState::Stable
        );
        if !can_start || self.pending.negotiation_needed {
            tracing::debug!(key = %self.key, state = %self.state, "negotiation already in progress");
            return Ok(SignalOutcome::Ignored(IgnoreReason::AlreadyNegotiating));
        }

        self.pending.negotiation_needed = true;
        Ok(SignalOutcome::Queued)
    }

    /// Records a remote offer for the next [`process`](Self::process).
    pub fn receive_offer(
        &mut self,
        desc: SessionDescription,
    ) -> Result<SignalOutcome, NegotiationError> {
        self.ensure_open()?;

        if self.role != NegotiationRole::Answerer {
            tracing::warn!(key = %self.key, "offerer received an offer, ignoring");
            return Ok(SignalOutcome::Ignored(IgnoreReason::WrongRole));
        }
        if desc.kind != SdpKind::Offer {
            tracing::warn!(key = %self.key, kind = %desc.kind, "offer frame carried a non-offer description");
            return Ok(SignalOutcome::Ignored(IgnoreReason::Rejected));
        }
        let seen = self.last_remote_offer.as_deref() == Some(desc.sdp.as_str())
            || self.pending.offer.as_ref() == Some(&desc);
        if seen {
            tracing::debug!(key = %self.key, "duplicate offer ignored");
            return Ok(SignalOutcome::Ignored(IgnoreReason::Duplicate));
        }

        self.pending.offer = Some(desc);
        Ok(SignalOutcome::Queued)
    }

    /// Records a remote answer for the next [`process`](Self::process).
    ///
    /// Accepted only while our offer is outstanding, and only once per
    /// round.
    pub fn receive_answer(
        &mut self,
        desc: SessionDescription,
    ) -> Result<SignalOutcome, NegotiationError> {
        self.ensure_open()?;

        if self.role != NegotiationRole::Offerer {
            tracing::warn!(key = %self.key, "answerer received an answer, ignoring");
            return Ok(SignalOutcome::Ignored(IgnoreReason::WrongRole));
        }
        if desc.kind != SdpKind::Answer {
            tracing::warn!(key = %self.key, kind = %desc.kind, "answer frame carried a non-answer description");
            return Ok(SignalOutcome::Ignored(IgnoreReason::Rejected));
        }
        let seen = self.last_remote_answer.as_deref() == Some(desc.sdp.as_str())
            || self.pending.answer.is_some();
        if seen {
            tracing::warn!(key = %self.key, "duplicate answer ignored");
            return Ok(SignalOutcome::Ignored(IgnoreReason::Duplicate));
        }
        if self.state != NegotiationState::LocalOfferSet {
            tracing::warn!(key = %self.key, state = %self.state, "answer arrived with no offer outstanding");
            return Ok(SignalOutcome::Ignored(IgnoreReason::NotAwaitingAnswer));
        }

        self.pending.answer = Some(desc);
        Ok(SignalOutcome::Queued)
    }

    /// Applies a remote candidate, or buffers it until a remote
    /// description is in place.
    ///
    /// An adapter rejecting a single candidate is not fatal: it is logged
    /// and reported as [`IgnoreReason::Rejected`].
    pub async fn receive_candidate(
        &mut self,
        candidate: CandidateDescriptor,
    ) -> Result<SignalOutcome, NegotiationError> {
        self.ensure_open()?;

        if !self.has_remote_description {
            tracing::trace!(key = %self.key, "buffering remote candidate");
            self.remote_candidates.push_back(candidate);
            return Ok(SignalOutcome::Buffered);
        }

        match self.peer.add_candidate(&candidate).await {
            Ok(()) => Ok(SignalOutcome::Applied),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "remote candidate rejected");
                Ok(SignalOutcome::Ignored(IgnoreReason::Rejected))
            }
        }
    }

    /// Accepts a candidate the engine discovered locally.
    ///
    /// Returns it for sending if the local description has already gone
    /// out; otherwise holds it and returns `None`.
    pub fn local_candidate(
        &mut self,
        candidate: CandidateDescriptor,
    ) -> Result<Option<Outbound>, NegotiationError> {
        self.ensure_open()?;

        if self.local_sent {
            Ok(Some(Outbound::Candidate(candidate)))
        } else {
            self.local_candidates.push_back(candidate);
            Ok(None)
        }
    }

    // -- processing ---------------------------------------------------------

    /// Consumes every pending tag once, in the order answer, offer,
    /// negotiation-needed, and returns what must be sent.
    ///
    /// # Errors
    /// Any adapter failure moves the record to `Closed` and is returned as
    /// [`NegotiationError::Adapter`]; [`close`](Self::close) then releases
    /// the adapter.
    pub async fn process(&mut self) -> Result<Vec<Outbound>, NegotiationError> {
        self.ensure_open()?;
        let mut out = Vec::new();

        if let Some(answer) = self.pending.answer.take() {
            self.apply_remote_answer(answer).await?;
        }

        if let Some(offer) = self.pending.offer.take() {
            self.apply_remote_offer(offer).await?;
            out.extend(self.create_answer().await?);
        }

        if std::mem::take(&mut self.pending.negotiation_needed) {
            let can_start = matches!(
                self.state,
                NegotiationState::Idle | NegotiationState::Stable
            );
            if can_start {
                out.extend(self.create_offer().await?);
            }
        }

        Ok(out)
    }

    /// Creates and applies a local offer.
    ///
    /// Returns the offer followed by any held local candidates.
    pub async fn create_offer(&mut self) -> Result<Vec<Outbound>, NegotiationError> {
        self.ensure_open()?;
        let can_start = matches!(
            self.state,
            NegotiationState::Idle | NegotiationState::Stable
        );
        if self.role != NegotiationRole::Offerer || !can_start {
            return Err(self.invalid(PeerOp::CreateOffer));
        }

        self.transition(NegotiationState::LocalOfferPending);
        let offer = match self.peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail(PeerOp::CreateOffer, e)),
        };
        if let Err(e) = self.peer.set_local_description(&offer).await {
            return Err(self.fail(PeerOp::SetLocalDescription, e));
        }

        self.last_remote_answer = None;
        self.transition(NegotiationState::LocalOfferSet);
        Ok(self.release(offer))
    }

    /// Applies a remote offer, then flushes buffered remote candidates.
    pub async fn apply_remote_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if self.role != NegotiationRole::Answerer || self.state.is_pending() {
            return Err(self.invalid(PeerOp::SetRemoteDescription));
        }

        if let Err(e) = self.peer.set_remote_description(&offer).await {
            return Err(self.fail(PeerOp::SetRemoteDescription, e));
        }

        self.last_remote_offer = Some(offer.sdp);
        self.has_remote_description = true;
        self.transition(NegotiationState::RemoteOfferReceived);
        self.flush_remote_candidates().await;
        Ok(())
    }

    /// Creates and applies a local answer.
    ///
    /// # Errors
    /// [`NegotiationError::InvalidState`] unless a remote offer has been
    /// applied and not yet answered.
    pub async fn create_answer(&mut self) -> Result<Vec<Outbound>, NegotiationError> {
        self.ensure_open()?;
        if self.state != NegotiationState::RemoteOfferReceived {
            return Err(self.invalid(PeerOp::CreateAnswer));
        }

        self.transition(NegotiationState::LocalAnswerPending);
        let answer = match self.peer.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(PeerOp::CreateAnswer, e)),
        };
        if let Err(e) = self.peer.set_local_description(&answer).await {
            return Err(self.fail(PeerOp::SetLocalDescription, e));
        }

        self.transition(NegotiationState::Stable);
        Ok(self.release(answer))
    }

    /// Applies the remote answer to our outstanding offer, then flushes
    /// buffered remote candidates.
    pub async fn apply_remote_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if self.role != NegotiationRole::Offerer
            || self.state != NegotiationState::LocalOfferSet
        {
            return Err(self.invalid(PeerOp::SetRemoteDescription));
        }

        if let Err(e) = self.peer.set_remote_description(&answer).await {
            return Err(self.fail(PeerOp::SetRemoteDescription, e));
        }

        self.last_remote_answer = Some(answer.sdp);
        self.has_remote_description = true;
        self.transition(NegotiationState::Stable);
        self.flush_remote_candidates().await;
        Ok(())
    }

    /// Opens a data channel on the connection.
    ///
    /// A failure here is returned but does not close the record.
    pub async fn open_data_channel(
        &mut self,
        label: &str,
    ) -> Result<ChannelOf<P>, NegotiationError> {
        self.ensure_open()?;
        self.peer
            .create_data_channel(label)
            .await
            .map_err(|e| NegotiationError::adapter(PeerOp::CreateDataChannel, e))
    }

    /// Closes the adapter, then drops pending signals and buffered
    /// candidates. Closing twice is a no-op.
    ///
    /// Also completes the teardown of a record an adapter failure has
    /// already moved to `Closed`.
    pub async fn close(&mut self) {
        if !self.adapter_open {
            return;
        }
        self.adapter_open = false;
        if let Err(e) = self.peer.close().await {
            tracing::warn!(key = %self.key, error = %e, "adapter close failed");
        }
        self.retire();
        tracing::info!(key = %self.key, "connection closed");
    }

    // -- internals ----------------------------------------------------------

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::Closed(self.key.clone()));
        }
        Ok(())
    }

    fn invalid(&self, op: PeerOp) -> NegotiationError {
        NegotiationError::InvalidState {
            op,
            state: self.state,
            role: self.role,
        }
    }

    fn transition(&mut self, to: NegotiationState) {
        tracing::debug!(key = %self.key, from = %self.state, %to, "negotiation state");
        self.state = to;
    }

    /// Marks the local description as sent and hands it out together
    /// with anything held behind it.
    fn release(&mut self, desc: SessionDescription) -> Vec<Outbound> {
        self.local_sent = true;
        let mut out = Vec::with_capacity(1 + self.local_candidates.len());
        out.push(Outbound::Description(desc));
        out.extend(self.local_candidates.drain(..).map(Outbound::Candidate));
        out
    }

    async fn flush_remote_candidates(&mut self) {
        while let Some(candidate) = self.remote_candidates.pop_front() {
            if let Err(e) = self.peer.add_candidate(&candidate).await {
                tracing::warn!(key = %self.key, error = %e, "buffered remote candidate rejected");
            }
        }
    }

    /// Moves to `Closed` after an adapter failure. The adapter itself is
    /// closed by [`close`](Self::close), once the owner has closed its
    /// data channels.
    fn fail(&mut self, op: PeerOp, error: P::Error) -> NegotiationError {
        tracing::warn!(key = %self.key, %op, error = %error, "adapter operation failed, connection closed");
        self.state = NegotiationState::Closed;
        self.pending = PendingSignals::default();
        NegotiationError::adapter(op, error)
    }

    fn retire(&mut self) {
        self.state = NegotiationState::Closed;
        self.pending = PendingSignals::default();
        self.remote_candidates.clear();
        self.local_candidates.clear();
    }
}
