//! Unified error type for Parley.

use parley_negotiation::NegotiationError;
use parley_protocol::{ConnectionKey, ProtocolError};
use parley_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `parley` crate you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attribute
/// on each variant lets `?` convert layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// A relay transport error (connect, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A framing or payload error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A negotiation error (closed record, invalid state, adapter failure).
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// The relay connection ended. Every connection record was closed.
    #[error("relay disconnected")]
    RelayDisconnected,

    /// No connection record exists for this key.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionKey),

    /// A connection record already exists for this key.
    #[error("connection {0} already exists")]
    DuplicateConnection(ConnectionKey),

    /// The connection has no open data channel with the requested label.
    #[error("connection {0} has no matching data channel")]
    NoDataChannel(ConnectionKey),

    /// Channels can only be opened on a multiplexed relay.
    #[error("the session's frame mode is not multiplexed")]
    NotMultiplexed,

    /// The session driver has stopped (shut down or dropped).
    #[error("session stopped")]
    SessionStopped,

    /// The configuration could not be parsed.
    #[error("invalid config: {0}")]
    Config(#[source] serde_json::Error),
}
