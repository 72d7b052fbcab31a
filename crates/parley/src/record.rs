//! Connection records: one negotiator plus its data channels.

use parley_negotiation::{ChannelOf, DataChannel, Negotiator, PeerConnection};

/// Everything a session keeps for one peer link.
pub(crate) struct ConnectionRecord<P: PeerConnection> {
    pub(crate) negotiator: Negotiator<P>,
    pub(crate) channels: Vec<ChannelOf<P>>,
}

impl<P: PeerConnection> ConnectionRecord<P> {
    pub(crate) fn new(negotiator: Negotiator<P>) -> Self {
        Self {
            negotiator,
            channels: Vec::new(),
        }
    }

    /// The channel with `label`, or the first open channel.
    pub(crate) fn channel(&self, label: Option<&str>) -> Option<&ChannelOf<P>> {
        match label {
            Some(label) => self.channels.iter().find(|ch| ch.label() == label),
            None => self.channels.first(),
        }
    }

    /// Closes the data channels, then the negotiator and its connection.
    pub(crate) async fn close(&mut self) {
        for channel in self.channels.drain(..) {
            if let Err(e) = channel.close().await {
                tracing::warn!(
                    key = %self.negotiator.key(),
                    label = channel.label(),
                    error = %e,
                    "data channel close failed"
                );
            }
        }
        self.negotiator.close().await;
    }
}
