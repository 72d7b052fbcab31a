//! Error types for the protocol layer.
//!
//! Decoding a *frame* never fails (unknown text collapses to
//! [`SignalKind::Other`](crate::SignalKind::Other)), so these errors come
//! from building frames and from the JSON payloads carried inside them.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a payload to JSON failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A payload is not valid JSON for the expected type.
    ///
    /// Common causes: a truncated frame, a missing `Sdp` field, or a
    /// `SessionType` that is neither offer nor answer.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message cannot be framed in the selected wire family, e.g. a
    /// channel id containing the delimiter, or a `SENDER` kind in the
    /// direct family.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// In the tagged family, an untagged payload that starts with an
    /// endpoint tag would be read back as a tagged frame.
    #[error("payload would be read back as an endpoint tag: {0:?}")]
    AmbiguousPayload(String),
}
