//! Session configuration.

use parley_negotiation::NegotiationRole;
use parley_protocol::FrameMode;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ParleyError;

/// The public STUN server used when none is configured.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Label of the data channel an offerer opens to start negotiating.
pub const DEFAULT_DATA_CHANNEL: &str = "sendChannel";

/// `User-Agent` sent on the WebSocket relay handshake.
pub const DEFAULT_USER_AGENT: &str = "parley datachannel";

/// Configuration for one signaling session.
///
/// Every field has a default, so a JSON config only needs the fields it
/// changes:
///
/// ```rust
/// use parley::SessionConfig;
/// use parley_protocol::FrameMode;
///
/// let config = SessionConfig::from_json(r#"{ "mode": "tagged" }"#).unwrap();
/// assert_eq!(config.mode, FrameMode::Tagged);
/// assert_eq!(config.data_channel.as_deref(), Some("sendChannel"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Identifies this client in channel announcements.
    ///
    /// Default: 16 random hex characters.
    pub client_id: String,

    /// Which wire family the relay speaks.
    pub mode: FrameMode,

    /// Role of the single record in direct mode. Multiplexed records take
    /// their role from how the channel was opened.
    pub role: NegotiationRole,

    /// ICE server URLs handed to the peer connector.
    pub ice_servers: Vec<String>,

    /// Data channel an offerer opens to trigger negotiation. With `None`
    /// the offerer requests negotiation directly.
    pub data_channel: Option<String>,

    /// `User-Agent` header for the WebSocket relay.
    pub user_agent: String,

    /// How many notices a slow subscriber may fall behind before it
    /// starts missing them.
    pub notice_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: random_hex::<8>(),
            mode: FrameMode::Direct,
            role: NegotiationRole::Offerer,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_owned()],
            data_channel: Some(DEFAULT_DATA_CHANNEL.to_owned()),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            notice_capacity: 64,
        }
    }
}

impl SessionConfig {
    /// Parses a config from JSON, filling missing fields with defaults.
    ///
    /// # Errors
    /// Returns [`ParleyError::Config`] if the text is not valid JSON or a
    /// field has the wrong type.
    pub fn from_json(text: &str) -> Result<Self, ParleyError> {
        serde_json::from_str(text).map_err(ParleyError::Config)
    }
}

/// `N` random bytes as lowercase hex.
pub(crate) fn random_hex<const N: usize>() -> String {
    let bytes: [u8; N] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
