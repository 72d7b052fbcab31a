//! Codec trait and implementations for frame payloads.
//!
//! A frame's last field is a payload. For descriptions and candidates that
//! payload is itself structured; the [`Codec`] trait turns those values
//! into the text that goes into the frame and back. [`JsonCodec`] is the
//! only implementation and matches what existing relay peers send.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Encodes payload values to frame text and decodes them back.
///
/// `Send + Sync + 'static` so a session can keep one inside a spawned
/// driver task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into payload text.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes payload text back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the text is malformed or does not
    /// match the expected shape.
    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ```rust
/// use parley_protocol::{Codec, JsonCodec, SessionDescription};
///
/// let codec = JsonCodec;
/// let text = codec.encode(&SessionDescription::offer("v=0")).unwrap();
/// assert_eq!(text, r#"{"SessionType":"offer","Sdp":"v=0"}"#);
///
/// let back: SessionDescription = codec.decode(&text).unwrap();
/// assert_eq!(back.sdp, "v=0");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CandidateDescriptor, SessionDescription};

    #[test]
    fn test_decode_truncated_payload_is_decode_error() {
        let result = JsonCodec.decode::<SessionDescription>(r#"{"SessionType":"of"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_candidate_from_wire_text() {
        let c: CandidateDescriptor = JsonCodec
            .decode(r#"{"SdpMid":"0","SdpMLineIndex":0,"Candidate":"candidate:1 1 UDP 2122 10.0.0.2 50000 typ host"}"#)
            .unwrap();
        assert_eq!(c.sdp_mid, "0");
        assert_eq!(c.candidate, "candidate:1 1 UDP 2122 10.0.0.2 50000 typ host");
    }

    #[test]
    fn test_sdp_line_breaks_survive_encoding() {
        let desc = SessionDescription::answer("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n");
        let text = JsonCodec.encode(&desc).unwrap();
        assert!(!text.contains('\n'));
        let back: SessionDescription = JsonCodec.decode(&text).unwrap();
        assert_eq!(back, desc);
    }
}
