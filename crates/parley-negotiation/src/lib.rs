//! Peer negotiation for Parley.
//!
//! This crate handles the offer/answer exchange for one peer link:
//!
//! 1. **Adapter contract**: what a media/data engine must provide
//!    ([`PeerConnector`], [`PeerConnection`], [`DataChannel`]) and how it
//!    reports back ([`PeerEventSink`]).
//! 2. **State machine**: sequencing offer → answer → candidates → stable
//!    for one connection record ([`Negotiator`]).
//! 3. **Scripted engine**: an in-process adapter for tests and demos
//!    (`scripted` module, behind the `scripted` feature).
//!
//! # How it fits in the stack
//!
//! ```text
//! Session Layer (above)  ← owns one Negotiator per connection record
//!     ↕
//! Negotiation Layer (this crate)  ← roles, states, pending signals
//!     ↕
//! Protocol Layer (below)  ← SessionDescription, CandidateDescriptor, ConnectionKey
//! ```

mod error;
mod negotiator;
mod peer;
mod state;

#[cfg(any(test, feature = "scripted"))]
pub mod scripted;

pub use error::NegotiationError;
pub use negotiator::{IgnoreReason, Negotiator, Outbound, SignalOutcome};
pub use peer::{
    ChannelOf, DataChannel, PeerConnection, PeerConnector, PeerEvent, PeerEventSink,
    PeerNotification, PeerOp,
};
pub use state::{IceConnectionState, NegotiationRole, NegotiationState};
