//! In-process relay: a hub that fans every frame out to the other members.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};

use crate::{next_relay_id, RelayChannel, RelayId, TransportError};

type Members = Arc<StdMutex<HashMap<RelayId, mpsc::UnboundedSender<String>>>>;

/// An in-process relay service.
///
/// Every frame a member sends is delivered, in order, to every *other*
/// member that is joined at the time of sending.
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use parley_transport::{MemoryHub, RelayChannel};
///
/// let hub = MemoryHub::new();
/// let a = hub.join();
/// let b = hub.join();
///
/// a.send("OFFER!{}").await.unwrap();
/// assert_eq!(b.recv().await.unwrap().as_deref(), Some("OFFER!{}"));
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryHub {
    members: Members,
}

impl MemoryHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins a new member and returns its relay channel.
    pub fn join(&self) -> MemoryRelay {
        let id = next_relay_id();
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.members).insert(id, tx);
        tracing::debug!(%id, "joined memory relay");
        MemoryRelay {
            id,
            members: Arc::clone(&self.members),
            inbox: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a hub with exactly two members.
    pub fn pair() -> (MemoryRelay, MemoryRelay) {
        let hub = Self::new();
        (hub.join(), hub.join())
    }

    /// Drops every member, as if the relay service went away.
    ///
    /// Pending frames are still delivered; after that each member's
    /// `recv` returns `Ok(None)`.
    pub fn shutdown(&self) {
        let mut members = lock(&self.members);
        tracing::info!(members = members.len(), "memory relay shut down");
        members.clear();
    }

    /// Number of members currently joined.
    pub fn len(&self) -> usize {
        lock(&self.members).len()
    }

    /// Returns `true` if no member is joined.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One member's connection to a [`MemoryHub`].
pub struct MemoryRelay {
    id: RelayId,
    members: Members,
    inbox: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: AtomicBool,
}

impl RelayChannel for MemoryRelay {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), Self::Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(self.id.to_string()));
        }
        let members = lock(&self.members);
        if !members.contains_key(&self.id) {
            return Err(TransportError::Shutdown);
        }
        for (id, tx) in members.iter() {
            if *id != self.id {
                // A member that went away just misses the frame.
                let _ = tx.send(text.to_owned());
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<String>, Self::Error> {
        Ok(self.inbox.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            lock(&self.members).remove(&self.id);
            tracing::debug!(id = %self.id, "left memory relay");
        }
        Ok(())
    }

    fn id(&self) -> RelayId {
        self.id
    }
}

impl Drop for MemoryRelay {
    fn drop(&mut self) {
        lock(&self.members).remove(&self.id);
    }
}

/// Locks the member table, recovering from a poisoned lock.
fn lock(
    members: &Members,
) -> std::sync::MutexGuard<'_, HashMap<RelayId, mpsc::UnboundedSender<String>>> {
    members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
