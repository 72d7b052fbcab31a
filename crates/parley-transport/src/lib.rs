//! Relay channel abstraction for Parley.
//!
//! Provides the [`RelayChannel`] trait: an ordered, reliable, text-frame
//! duplex link to a rendezvous service. Peers never talk to each other
//! through it directly: every frame one member sends is fanned out by the
//! relay to the other members.
//!
//! # Implementations
//!
//! - [`WebSocketRelay`]: a client connection to a WebSocket relay
//!   (`websocket` feature, default).
//! - [`MemoryHub`] / [`MemoryRelay`]: an in-process relay that delivers
//!   every frame to every other member. Used by tests and demos.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket relay via `tokio-tungstenite`

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryHub, MemoryRelay};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketRelay;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique relay IDs.
static NEXT_RELAY_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_relay_id() -> RelayId {
    RelayId::new(NEXT_RELAY_ID.fetch_add(1, Ordering::Relaxed))
}

/// Opaque identifier for one relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayId(u64);

impl RelayId {
    /// Creates a new `RelayId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay-{}", self.0)
    }
}

/// A connected relay channel that carries UTF-8 text frames.
///
/// All methods take `&self`: a reader task may sit in [`recv`](Self::recv)
/// while the owner keeps sending.
pub trait RelayChannel: Send + Sync + 'static {
    /// The error type for relay operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one text frame to the relay.
    fn send(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next text frame.
    ///
    /// Returns `Ok(None)` when the relay connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Closes the relay connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this relay connection.
    fn id(&self) -> RelayId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_id_new_and_into_inner() {
        let id = RelayId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_relay_id_display() {
        assert_eq!(RelayId::new(7).to_string(), "relay-7");
    }

    #[test]
    fn test_relay_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(RelayId::new(1), "offerer");
        map.insert(RelayId::new(2), "answerer");
        assert_eq!(map[&RelayId::new(2)], "answerer");
    }
}
