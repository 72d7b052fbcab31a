//! A scripted, in-process peer engine.
//!
//! [`ScriptedConnector`] implements the adapter traits without any media
//! stack. Descriptions are generated text, candidates come from a fixed
//! list, and every call is appended to a shared log so tests can assert
//! on exactly what the negotiator asked the engine to do.
//!
//! It behaves like a real engine where ordering matters:
//! - `create_answer` fails until a remote offer is applied;
//! - `add_candidate` fails until any remote description is applied;
//! - `set_local_description` emits the configured local candidates;
//! - `create_data_channel` raises negotiation-needed;
//! - a remote offer carrying `a=datachannel:<label>` lines opens those
//!   channels on the answering side.
//!
//! Failures can be injected per operation, for every connection or for
//! one record.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_protocol::{CandidateDescriptor, ConnectionKey, SdpKind, SessionDescription};

use crate::{
    DataChannel, IceConnectionState, PeerConnection, PeerConnector, PeerEventSink, PeerOp,
};

const DATA_CHANNEL_ATTR: &str = "a=datachannel:";

/// One call made on a scripted connection or channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    CreateDataChannel(String),
    ChannelSend { label: String, text: String },
    CloseChannel(String),
    Close,
}

/// Errors raised by the scripted engine.
#[derive(Debug, thiserror::Error)]
pub enum ScriptedError {
    #[error("injected failure: {0}")]
    Injected(PeerOp),

    #[error("no remote offer to answer")]
    NoRemoteOffer,

    #[error("no remote description")]
    NoRemoteDescription,
}

type CallLog = Arc<Mutex<Vec<(ConnectionKey, PeerCall)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ScriptedConnector
// ---------------------------------------------------------------------------

/// Creates [`ScriptedPeer`]s. Clones share the call log and event sinks.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    name: String,
    calls: CallLog,
    sinks: Arc<Mutex<HashMap<ConnectionKey, PeerEventSink<ScriptedChannel>>>>,
    failures: Vec<(Option<ConnectionKey>, PeerOp)>,
    candidates: Vec<CandidateDescriptor>,
}

impl ScriptedConnector {
    /// `name` appears in the generated SDP origin line.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::default(),
            sinks: Arc::default(),
            failures: Vec::new(),
            candidates: Vec::new(),
        }
    }

    /// Local candidates every connection reports after
    /// `set_local_description`.
    pub fn with_candidates(mut self, candidates: Vec<CandidateDescriptor>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Makes `op` fail on every connection.
    pub fn failing(mut self, op: PeerOp) -> Self {
        self.failures.push((None, op));
        self
    }

    /// Makes `op` fail on the connection for `key` only.
    pub fn failing_on(mut self, key: ConnectionKey, op: PeerOp) -> Self {
        self.failures.push((Some(key), op));
        self
    }

    /// Every call made so far, across all connections.
    pub fn calls(&self) -> Vec<PeerCall> {
        lock(&self.calls).iter().map(|(_, c)| c.clone()).collect()
    }

    /// Calls made on the connection for `key`.
    pub fn calls_for(&self, key: &ConnectionKey) -> Vec<PeerCall> {
        lock(&self.calls)
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Keys of every connection created so far.
    pub fn connections(&self) -> Vec<ConnectionKey> {
        lock(&self.sinks).keys().cloned().collect()
    }

    /// Simulates a text message arriving on a data channel of `key`.
    pub fn deliver(&self, key: &ConnectionKey, label: &str, text: &str) -> bool {
        match lock(&self.sinks).get(key) {
            Some(sink) => {
                sink.channel_message(label, text);
                true
            }
            None => false,
        }
    }

    /// Simulates an ICE connectivity change on `key`.
    pub fn report_ice_state(&self, key: &ConnectionKey, state: IceConnectionState) -> bool {
        match lock(&self.sinks).get(key) {
            Some(sink) => {
                sink.ice_state(state);
                true
            }
            None => false,
        }
    }
}

impl PeerConnector for ScriptedConnector {
    type Connection = ScriptedPeer;
    type Error = ScriptedError;

    async fn connect(
        &mut self,
        _ice_servers: &[String],
        events: PeerEventSink<ScriptedChannel>,
    ) -> Result<ScriptedPeer, ScriptedError> {
        let key = events.key().clone();
        let failures: Vec<PeerOp> = self
            .failures
            .iter()
            .filter(|(k, _)| k.as_ref().is_none_or(|k| *k == key))
            .map(|(_, op)| *op)
            .collect();
        if failures.contains(&PeerOp::Connect) {
            return Err(ScriptedError::Injected(PeerOp::Connect));
        }

        lock(&self.sinks).insert(key.clone(), events.clone());
        Ok(ScriptedPeer {
            name: self.name.clone(),
            key,
            events,
            calls: Arc::clone(&self.calls),
            failures,
            candidates: self.candidates.clone(),
            version: 0,
            labels: Vec::new(),
            announced: HashSet::new(),
            remote: None,
            local: None,
            connected: false,
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedPeer
// ---------------------------------------------------------------------------

/// One scripted connection.
#[derive(Debug)]
pub struct ScriptedPeer {
    name: String,
    key: ConnectionKey,
    events: PeerEventSink<ScriptedChannel>,
    calls: CallLog,
    failures: Vec<PeerOp>,
    candidates: Vec<CandidateDescriptor>,
    version: u64,
    labels: Vec<String>,
    announced: HashSet<String>,
    remote: Option<SessionDescription>,
    local: Option<SessionDescription>,
    connected: bool,
}

impl ScriptedPeer {
    fn check(&self, op: PeerOp) -> Result<(), ScriptedError> {
        if self.failures.contains(&op) {
            return Err(ScriptedError::Injected(op));
        }
        Ok(())
    }

    fn record(&self, call: PeerCall) {
        lock(&self.calls).push((self.key.clone(), call));
    }

    fn sdp(&mut self) -> String {
        self.version += 1;
        let mut sdp = format!(
            "v=0\r\no={} {} 1 IN IP4 127.0.0.1\r\ns=-\r\n",
            self.name, self.version
        );
        for label in &self.labels {
            sdp.push_str(DATA_CHANNEL_ATTR);
            sdp.push_str(label);
            sdp.push_str("\r\n");
        }
        sdp
    }

    /// Reports connectivity once both descriptions are in place.
    fn maybe_connect(&mut self) {
        if !self.connected && self.local.is_some() && self.remote.is_some() {
            self.connected = true;
            self.events.ice_state(IceConnectionState::Checking);
            self.events.ice_state(IceConnectionState::Connected);
        }
    }

    fn channel(&self, label: &str) -> ScriptedChannel {
        ScriptedChannel {
            label: label.to_owned(),
            key: self.key.clone(),
            calls: Arc::clone(&self.calls),
        }
    }
}

impl PeerConnection for ScriptedPeer {
    type Error = ScriptedError;
    type DataChannel = ScriptedChannel;

    async fn create_offer(&mut self) -> Result<SessionDescription, ScriptedError> {
        self.check(PeerOp::CreateOffer)?;
        self.record(PeerCall::CreateOffer);
        Ok(SessionDescription::offer(self.sdp()))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, ScriptedError> {
        self.check(PeerOp::CreateAnswer)?;
        let has_offer = self
            .remote
            .as_ref()
            .is_some_and(|d| d.kind == SdpKind::Offer);
        if !has_offer {
            return Err(ScriptedError::NoRemoteOffer);
        }
        self.record(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer(self.sdp()))
    }

    async fn set_local_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), ScriptedError> {
        self.check(PeerOp::SetLocalDescription)?;
        self.record(PeerCall::SetLocal(desc.kind));
        self.local = Some(desc.clone());
        for candidate in &self.candidates {
            self.events.ice_candidate(candidate.clone());
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        desc: &SessionDescription,
    ) -> Result<(), ScriptedError> {
        self.check(PeerOp::SetRemoteDescription)?;
        self.record(PeerCall::SetRemote(desc.kind));
        if desc.kind == SdpKind::Offer {
            let labels: Vec<&str> = desc
                .sdp
                .lines()
                .filter_map(|line| line.strip_prefix(DATA_CHANNEL_ATTR))
                .collect();
            for label in labels {
                if self.announced.insert(label.to_owned()) {
                    self.events.data_channel(self.channel(label));
                }
            }
        }
        self.remote = Some(desc.clone());
        self.maybe_connect();
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: &CandidateDescriptor) -> Result<(), ScriptedError> {
        self.check(PeerOp::AddCandidate)?;
        if self.remote.is_none() {
            return Err(ScriptedError::NoRemoteDescription);
        }
        self.record(PeerCall::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn create_data_channel(&mut self, label: &str) -> Result<ScriptedChannel, ScriptedError> {
        self.check(PeerOp::CreateDataChannel)?;
        self.record(PeerCall::CreateDataChannel(label.to_owned()));
        self.labels.push(label.to_owned());
        self.events.negotiation_needed();
        Ok(self.channel(label))
    }

    async fn close(&mut self) -> Result<(), ScriptedError> {
        self.record(PeerCall::Close);
        self.check(PeerOp::Close)
    }
}

// ---------------------------------------------------------------------------
// ScriptedChannel
// ---------------------------------------------------------------------------

/// A data channel on a [`ScriptedPeer`]. Sends are logged, not delivered;
/// use [`ScriptedConnector::deliver`] to simulate incoming messages.
#[derive(Debug, Clone)]
pub struct ScriptedChannel {
    label: String,
    key: ConnectionKey,
    calls: CallLog,
}

impl DataChannel for ScriptedChannel {
    type Error = ScriptedError;

    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, text: &str) -> Result<(), ScriptedError> {
        lock(&self.calls).push((
            self.key.clone(),
            PeerCall::ChannelSend {
                label: self.label.clone(),
                text: text.to_owned(),
            },
        ));
        Ok(())
    }

    async fn close(&self) -> Result<(), ScriptedError> {
        lock(&self.calls).push((self.key.clone(), PeerCall::CloseChannel(self.label.clone())));
        Ok(())
    }
}
