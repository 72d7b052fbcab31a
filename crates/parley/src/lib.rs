//! # Parley
//!
//! Signaling for WebRTC-style peer connections over a text relay.
//!
//! Two peers that cannot reach each other yet exchange connection
//! descriptions and network candidates through a relay (a WebSocket
//! rendezvous service). Parley frames those messages, routes them to the
//! right connection record, and sequences each record through
//! offer → answer → candidates → ready. The media/data engine itself is
//! plugged in through the [`PeerConnector`] trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::prelude::*;
//!
//! // Implement PeerConnector for your engine, then:
//! // let mut session = SessionBuilder::new()
//! //     .mode(FrameMode::Direct)
//! //     .connect_websocket("ws://127.0.0.1:3000/", my_connector)
//! //     .await?;
//! // let handle = session.handle();
//! // session.run().await
//! ```
//!
//! ## Layers
//!
//! ```text
//! parley-transport    RelayChannel, WebSocketRelay, MemoryHub
//! parley-protocol     FrameMode, SignalingMessage, JSON payloads
//! parley-negotiation  PeerConnector, Negotiator
//! parley              SignalingSession, SessionHandle (this crate)
//! ```

mod config;
mod error;
mod handle;
mod handler;
mod record;
mod session;

pub use config::{SessionConfig, DEFAULT_DATA_CHANNEL, DEFAULT_ICE_SERVER, DEFAULT_USER_AGENT};
pub use error::ParleyError;
pub use handle::{SessionHandle, SessionNotice};
pub use session::{SessionBuilder, SignalingSession};

pub use parley_negotiation::{
    DataChannel, IceConnectionState, NegotiationRole, NegotiationState, PeerConnection,
    PeerConnector, PeerEventSink, SignalOutcome,
};
pub use parley_protocol::{ChannelId, ConnectionKey, Endpoint, FrameMode};
pub use parley_transport::{MemoryHub, RelayChannel, WebSocketRelay};

/// Everything needed to build and drive a session.
pub mod prelude {
    pub use crate::{
        ChannelId, ConnectionKey, Endpoint, FrameMode, NegotiationRole, ParleyError,
        PeerConnector, SessionBuilder, SessionConfig, SessionHandle, SessionNotice,
        SignalingSession,
    };
}
