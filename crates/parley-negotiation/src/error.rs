//! Error types for the negotiation layer.

use parley_protocol::ConnectionKey;

use crate::{NegotiationRole, NegotiationState, PeerOp};

/// Errors that can occur while negotiating one connection.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The record was closed, either explicitly or after an adapter
    /// failure. Closed records accept no further operations.
    #[error("connection {0} is closed")]
    Closed(ConnectionKey),

    /// The operation is not valid in the record's current state or role,
    /// e.g. creating an answer before a remote offer has been applied.
    #[error("cannot {op} as {role} in state {state}")]
    InvalidState {
        op: PeerOp,
        state: NegotiationState,
        role: NegotiationRole,
    },

    /// The peer connection adapter reported a failure.
    #[error("{op} failed: {source}")]
    Adapter {
        op: PeerOp,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl NegotiationError {
    /// Wraps an engine error.
    pub fn adapter(op: PeerOp, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Adapter {
            op,
            source: Box::new(source),
        }
    }
}
