//! State types: where a connection record is in the offer/answer exchange.
//!
//! A record's [`NegotiationRole`] is fixed when it is created. Its
//! [`NegotiationState`] moves along one of two paths depending on that
//! role, and can drop to `Closed` from anywhere.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// NegotiationRole
// ---------------------------------------------------------------------------

/// Which side of the exchange a record plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationRole {
    /// Creates the offer and waits for an answer.
    #[default]
    Offerer,
    /// Waits for an offer and replies with an answer.
    Answerer,
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offerer => f.write_str("offerer"),
            Self::Answerer => f.write_str("answerer"),
        }
    }
}

// ---------------------------------------------------------------------------
// NegotiationState
// ---------------------------------------------------------------------------

/// The negotiation lifecycle of one record.
///
/// ```text
///  Offerer:   Idle ─→ LocalOfferPending ─→ LocalOfferSet ─→ Stable
///  Answerer:  Idle ─→ RemoteOfferReceived ─→ LocalAnswerPending ─→ Stable
///
///  any ──(close / adapter failure)──→ Closed
/// ```
///
/// `Stable` is also where renegotiation starts from: a new offer round
/// (offerer) or a new remote offer (answerer) re-enters the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NegotiationState {
    #[default]
    Idle,
    LocalOfferPending,
    LocalOfferSet,
    RemoteOfferReceived,
    LocalAnswerPending,
    Stable,
    Closed,
}

impl NegotiationState {
    /// `true` while a local description is being created and applied.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::LocalOfferPending | Self::LocalAnswerPending)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LocalOfferPending => "local-offer-pending",
            Self::LocalOfferSet => "local-offer-set",
            Self::RemoteOfferReceived => "remote-offer-received",
            Self::LocalAnswerPending => "local-answer-pending",
            Self::Stable => "stable",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// IceConnectionState
// ---------------------------------------------------------------------------

/// Connectivity of the underlying transport, as reported by the engine.
///
/// Informational only: the negotiator does not act on it, the session
/// forwards it to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_names() {
        let role: NegotiationRole = serde_json::from_str(r#""answerer""#).unwrap();
        assert_eq!(role, NegotiationRole::Answerer);
        assert_eq!(
            serde_json::to_string(&NegotiationRole::Offerer).unwrap(),
            r#""offerer""#
        );
    }

    #[test]
    fn test_pending_states() {
        assert!(NegotiationState::LocalOfferPending.is_pending());
        assert!(NegotiationState::LocalAnswerPending.is_pending());
        assert!(!NegotiationState::LocalOfferSet.is_pending());
        assert!(!NegotiationState::Stable.is_pending());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(NegotiationState::RemoteOfferReceived.to_string(), "remote-offer-received");
        assert_eq!(NegotiationState::default(), NegotiationState::Idle);
    }
}
