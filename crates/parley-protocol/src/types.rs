//! Core protocol types for Parley's signaling wire format.
//!
//! Two kinds of things travel over the relay:
//!
//! - **Frames**: one text message per relay frame, a leading type token
//!   followed by `!`-separated fields ([`SignalingMessage`]).
//! - **Payloads**: the last field of a frame. For descriptions and
//!   candidates it is a small JSON object ([`SessionDescription`],
//!   [`CandidateDescriptor`]); everything else is opaque text.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// SignalKind
// ---------------------------------------------------------------------------

/// The leading type token of a frame.
///
/// Tokens are case-sensitive on the wire (`OFFER`, not `offer`). Anything
/// unrecognised becomes [`SignalKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// A session description offer.
    Offer,
    /// A session description answer.
    Answer,
    /// One ICE candidate.
    Candidate,
    /// Announces a multiplexed channel.
    Channel,
    /// Announces the sending side of a tagged channel.
    Sender,
    /// Announces the receiving side of a tagged channel.
    Receiver,
    /// Not a signaling frame; the payload is the raw text.
    Other,
}

impl SignalKind {
    /// All kinds that have a wire token.
    pub const TOKENS: [SignalKind; 6] = [
        SignalKind::Offer,
        SignalKind::Answer,
        SignalKind::Candidate,
        SignalKind::Channel,
        SignalKind::Sender,
        SignalKind::Receiver,
    ];

    /// Parses a leading token. Returns `None` for anything that is not one
    /// of the six known tokens (including `OTHER` itself).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "OFFER" => Some(Self::Offer),
            "ANSWER" => Some(Self::Answer),
            "CANDIDATE" => Some(Self::Candidate),
            "CHANNEL" => Some(Self::Channel),
            "SENDER" => Some(Self::Sender),
            "RECEIVER" => Some(Self::Receiver),
            _ => None,
        }
    }

    /// The wire token for this kind.
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Offer => "OFFER",
            Self::Answer => "ANSWER",
            Self::Candidate => "CANDIDATE",
            Self::Channel => "CHANNEL",
            Self::Sender => "SENDER",
            Self::Receiver => "RECEIVER",
            Self::Other => "OTHER",
        }
    }

    /// `true` for the kinds that announce a channel or endpoint rather
    /// than carry negotiation data.
    pub fn is_announcement(self) -> bool {
        matches!(self, Self::Channel | Self::Sender | Self::Receiver)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

// ---------------------------------------------------------------------------
// Channel identity
// ---------------------------------------------------------------------------

/// Identifies one logical peer link on a multiplexed relay.
///
/// The numbered wire family only carries decimal ids; the tagged family
/// carries any non-empty text without the delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Creates a channel id from text.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a number, if it is a decimal `u32`.
    pub fn as_number(&self) -> Option<u32> {
        self.0.parse().ok()
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of a tagged channel a frame or a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    /// The side that offers (sends media/data).
    Sender,
    /// The side that answers (receives media/data).
    Receiver,
}

impl Endpoint {
    /// Parses an endpoint tag (`SENDER` / `RECEIVER`).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "SENDER" => Some(Self::Sender),
            "RECEIVER" => Some(Self::Receiver),
            _ => None,
        }
    }

    /// The wire tag for this endpoint.
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Sender => "SENDER",
            Self::Receiver => "RECEIVER",
        }
    }

    /// The endpoint on the other end of the link.
    pub fn opposite(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => f.write_str("sender"),
            Self::Receiver => f.write_str("receiver"),
        }
    }
}

/// Names one connection record inside a session.
///
/// `ConnectionKey::default()` is the single record of a non-multiplexed
/// session. Multiplexed records carry their channel id and, in the tagged
/// family, the *local* endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub channel: Option<ChannelId>,
    pub endpoint: Option<Endpoint>,
}

impl ConnectionKey {
    /// A record on a numbered channel.
    pub fn channel(channel: impl Into<ChannelId>) -> Self {
        Self {
            channel: Some(channel.into()),
            endpoint: None,
        }
    }

    /// A record for one endpoint of a tagged channel.
    pub fn tagged(channel: impl Into<ChannelId>, endpoint: Endpoint) -> Self {
        Self {
            channel: Some(channel.into()),
            endpoint: Some(endpoint),
        }
    }

    /// `true` for the single non-multiplexed record.
    pub fn is_default(&self) -> bool {
        self.channel.is_none()
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.channel, self.endpoint) {
            (None, _) => f.write_str("default"),
            (Some(ch), None) => write!(f, "ch-{ch}"),
            (Some(ch), Some(ep)) => write!(f, "ch-{ch}/{ep}"),
        }
    }
}

// ---------------------------------------------------------------------------
// SignalingMessage
// ---------------------------------------------------------------------------

/// One parsed relay frame.
///
/// Built per received frame and dropped after dispatch. Frames that do
/// not parse for the active wire family are kept as
/// [`SignalKind::Other`] with the whole raw text as `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    pub kind: SignalKind,
    pub channel: Option<ChannelId>,
    pub endpoint: Option<Endpoint>,
    pub payload: String,
}

impl SignalingMessage {
    /// A non-multiplexed message.
    pub fn new(kind: SignalKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            channel: None,
            endpoint: None,
            payload: payload.into(),
        }
    }

    /// Raw relay text that is not part of the signaling protocol.
    pub fn other(raw: impl Into<String>) -> Self {
        Self::new(SignalKind::Other, raw)
    }

    /// Sets the channel id.
    pub fn on_channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Sets the endpoint tag.
    pub fn from_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Addresses the message the way `key` is addressed on the wire.
    pub fn for_key(mut self, key: &ConnectionKey) -> Self {
        self.channel = key.channel.clone();
        self.endpoint = key.endpoint;
        self
    }
}

// ---------------------------------------------------------------------------
// SessionDescription
// ---------------------------------------------------------------------------

/// Whether a description is an offer or an answer.
///
/// Written lower-case (`"offer"`); the capitalised spellings other
/// implementations emit are accepted on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SdpKind {
    #[serde(rename = "offer", alias = "Offer", alias = "OFFER")]
    Offer,
    #[serde(rename = "answer", alias = "Answer", alias = "ANSWER")]
    Answer,
}

impl SdpKind {
    /// The frame kind that carries a description of this kind.
    pub fn signal_kind(self) -> SignalKind {
        match self {
            Self::Offer => SignalKind::Offer,
            Self::Answer => SignalKind::Answer,
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => f.write_str("offer"),
            Self::Answer => f.write_str("answer"),
        }
    }
}

/// An immutable session description: the opaque SDP blob plus its kind.
///
/// JSON form: `{"SessionType":"offer","Sdp":"v=0..."}`. The SDP text is
/// never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "SessionType")]
    pub kind: SdpKind,
    #[serde(rename = "Sdp")]
    pub sdp: String,
}

impl SessionDescription {
    /// An offer carrying `sdp`.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// An answer carrying `sdp`.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// CandidateDescriptor
// ---------------------------------------------------------------------------

/// One discovered network path for the remote peer to try.
///
/// JSON form:
/// `{"SdpMid":"0","SdpMLineIndex":0,"Candidate":"candidate:1 1 UDP ..."}`.
/// A missing or `null` media-line index reads as `0` and a missing or
/// `null` media id as `""`, matching what engines emit for absent values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateDescriptor {
    #[serde(rename = "SdpMid", default, deserialize_with = "null_as_default")]
    pub sdp_mid: String,
    #[serde(
        rename = "SdpMLineIndex",
        default,
        deserialize_with = "null_as_default"
    )]
    pub sdp_m_line_index: u32,
    #[serde(rename = "Candidate")]
    pub candidate: String,
}

impl CandidateDescriptor {
    /// Creates a candidate descriptor.
    pub fn new(
        sdp_mid: impl Into<String>,
        sdp_m_line_index: Option<u32>,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_m_line_index: sdp_m_line_index.unwrap_or(0),
            candidate: candidate.into(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
