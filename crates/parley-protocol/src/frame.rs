//! `!`-delimited frame encoding for the relay channel.
//!
//! Three wire families are in use by relay peers, and a session speaks
//! exactly one of them ([`FrameMode`]):
//!
//! ```text
//! Direct    OFFER!<payload>
//! Numbered  OFFER!<u32 channel>!<payload>
//! Tagged    OFFER!<channel>!<payload>
//!           OFFER!<channel>!SENDER!<payload>
//! ```
//!
//! The payload is always the last field. Decoding only splits the header
//! off the front, so a `!` inside a payload is carried through untouched;
//! header fields are validated on encode instead.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ChannelId, Endpoint, ProtocolError, SignalKind, SignalingMessage};

/// Field separator on the wire.
pub const DELIMITER: char = '!';

/// Which frame family a session reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// One peer link per relay connection: `TYPE!payload`.
    #[default]
    Direct,
    /// Links multiplexed by numeric channel: `TYPE!n!payload`.
    Numbered,
    /// Links multiplexed by text channel, optionally tagged with the
    /// sending endpoint: `TYPE!id[!ENDPOINT]!payload`.
    Tagged,
}

impl FrameMode {
    /// `true` if frames carry a channel id.
    pub fn is_multiplexed(self) -> bool {
        !matches!(self, Self::Direct)
    }

    /// `true` if `kind` is part of this family. `Other` always is: it is
    /// written and read as raw text.
    pub fn accepts(self, kind: SignalKind) -> bool {
        use SignalKind::*;
        match kind {
            Other | Offer | Answer | Candidate => true,
            Channel => self.is_multiplexed(),
            Sender | Receiver => matches!(self, Self::Tagged),
        }
    }

    /// Builds the wire text for `msg`.
    ///
    /// # Errors
    /// - [`ProtocolError::InvalidMessage`] if the kind is not part of this
    ///   family, a channel id is missing, unexpected or malformed, or an
    ///   endpoint tag is used outside the tagged family.
    /// - [`ProtocolError::InvalidMessage`] if `Other` text would be read
    ///   back as a signaling frame of this family.
    /// - [`ProtocolError::AmbiguousPayload`] if an untagged tagged-family
    ///   payload would be read back as an endpoint tag.
    pub fn encode(self, msg: &SignalingMessage) -> Result<String, ProtocolError> {
        if msg.kind == SignalKind::Other {
            if let Some(parsed) = self.try_decode(&msg.payload) {
                return Err(ProtocolError::InvalidMessage(format!(
                    "relay text would be read as a {} frame",
                    parsed.kind
                )));
            }
            return Ok(msg.payload.clone());
        }
        if !self.accepts(msg.kind) {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} frames are not part of the {self} family",
                msg.kind
            )));
        }

        let token = msg.kind.as_token();
        let payload = &msg.payload;

        match self {
            Self::Direct => {
                if msg.channel.is_some() || msg.endpoint.is_some() {
                    return Err(ProtocolError::InvalidMessage(
                        "direct frames carry no channel or endpoint".into(),
                    ));
                }
                Ok(format!("{token}{DELIMITER}{payload}"))
            }
            Self::Numbered => {
                let channel = header_channel(msg)?;
                let Some(number) = channel.as_number() else {
                    return Err(ProtocolError::InvalidMessage(format!(
                        "numbered channel id must be a decimal u32, got {channel:?}"
                    )));
                };
                if msg.endpoint.is_some() {
                    return Err(ProtocolError::InvalidMessage(
                        "numbered frames carry no endpoint".into(),
                    ));
                }
                Ok(format!("{token}{DELIMITER}{number}{DELIMITER}{payload}"))
            }
            Self::Tagged => {
                let channel = header_channel(msg)?;
                match msg.endpoint {
                    Some(endpoint) => Ok(format!(
                        "{token}{DELIMITER}{channel}{DELIMITER}{}{DELIMITER}{payload}",
                        endpoint.as_token()
                    )),
                    None => {
                        if leads_with_endpoint_tag(payload) {
                            return Err(ProtocolError::AmbiguousPayload(
                                payload.clone(),
                            ));
                        }
                        Ok(format!("{token}{DELIMITER}{channel}{DELIMITER}{payload}"))
                    }
                }
            }
        }
    }

    /// Parses one frame. Never fails: anything that is not a well-formed
    /// frame of this family comes back as [`SignalKind::Other`] carrying
    /// the whole raw text.
    pub fn decode(self, raw: &str) -> SignalingMessage {
        self.try_decode(raw)
            .unwrap_or_else(|| SignalingMessage::other(raw))
    }

    fn try_decode(self, raw: &str) -> Option<SignalingMessage> {
        let (token, rest) = raw.split_once(DELIMITER)?;
        let kind = SignalKind::from_token(token).filter(|k| self.accepts(*k))?;

        match self {
            Self::Direct => Some(SignalingMessage::new(kind, rest)),
            Self::Numbered => {
                let (channel, payload) = rest.split_once(DELIMITER)?;
                let number = channel.parse::<u32>().ok()?;
                Some(SignalingMessage::new(kind, payload).on_channel(number))
            }
            Self::Tagged => {
                let (channel, rest) = rest.split_once(DELIMITER)?;
                if channel.is_empty() {
                    return None;
                }
                let msg = match rest.split_once(DELIMITER) {
                    Some((tag, payload)) => match Endpoint::from_token(tag) {
                        Some(endpoint) => SignalingMessage::new(kind, payload)
                            .from_endpoint(endpoint),
                        None => SignalingMessage::new(kind, rest),
                    },
                    None => SignalingMessage::new(kind, rest),
                };
                Some(msg.on_channel(channel))
            }
        }
    }
}

impl fmt::Display for FrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Numbered => f.write_str("numbered"),
            Self::Tagged => f.write_str("tagged"),
        }
    }
}

/// Returns the message's channel id after checking it can sit in a header.
fn header_channel(msg: &SignalingMessage) -> Result<&ChannelId, ProtocolError> {
    let channel = msg.channel.as_ref().ok_or_else(|| {
        ProtocolError::InvalidMessage(format!("{} frame needs a channel id", msg.kind))
    })?;
    if channel.as_str().is_empty() || channel.as_str().contains(DELIMITER) {
        return Err(ProtocolError::InvalidMessage(format!(
            "channel id {channel:?} cannot be framed"
        )));
    }
    Ok(channel)
}

fn leads_with_endpoint_tag(payload: &str) -> bool {
    payload
        .split_once(DELIMITER)
        .is_some_and(|(head, _)| Endpoint::from_token(head).is_some())
}

#[cfg(test)]
mod tests {
    //! Frame tests, grouped by family.
    //!
    //! The property that matters most: `decode` is total. Every malformed
    //! input below must come back as `Other` with the raw text, not panic.

    use super::*;
    use crate::{CandidateDescriptor, Codec, JsonCodec, SessionDescription};

    fn other(raw: &str) -> SignalingMessage {
        SignalingMessage::other(raw)
    }

    // =====================================================================
    // Direct
    // =====================================================================

    #[test]
    fn test_direct_offer_round_trip() {
        let msg = SignalingMessage::new(
            SignalKind::Offer,
            r#"{"SessionType":"offer","Sdp":"v=0..."}"#,
        );
        let raw = FrameMode::Direct.encode(&msg).unwrap();
        assert_eq!(raw, r#"OFFER!{"SessionType":"offer","Sdp":"v=0..."}"#);
        assert_eq!(FrameMode::Direct.decode(&raw), msg);
    }

    #[test]
    fn test_direct_decode_end_to_end_offer_payload() {
        let msg = FrameMode::Direct.decode(r#"OFFER!{"SessionType":"offer","Sdp":"v=0..."}"#);
        assert_eq!(msg.kind, SignalKind::Offer);

        let desc: SessionDescription = JsonCodec.decode(&msg.payload).unwrap();
        assert_eq!(desc.sdp, "v=0...");
    }

    #[test]
    fn test_direct_decode_candidate_payload() {
        let msg = FrameMode::Direct.decode(
            r#"CANDIDATE!{"SdpMid":"0","SdpMLineIndex":0,"Candidate":"candidate:1 1 UDP ..."}"#,
        );
        assert_eq!(msg.kind, SignalKind::Candidate);
        let c: CandidateDescriptor = JsonCodec.decode(&msg.payload).unwrap();
        assert_eq!(c.candidate, "candidate:1 1 UDP ...");
    }

    #[test]
    fn test_direct_payload_keeps_delimiter() {
        let msg = SignalingMessage::new(SignalKind::Answer, "a=x!y!z");
        let raw = FrameMode::Direct.encode(&msg).unwrap();
        assert_eq!(FrameMode::Direct.decode(&raw), msg);
    }

    #[test]
    fn test_direct_empty_payload_is_valid() {
        let msg = FrameMode::Direct.decode("ANSWER!");
        assert_eq!(msg, SignalingMessage::new(SignalKind::Answer, ""));
    }

    #[test]
    fn test_direct_malformed_frames_become_other() {
        for raw in [
            "",
            "OFFER",
            "offer!{}",
            "OTHER!x",
            "TEST!WEBSOCKET TEST",
            "CHANNEL!1!x",
            "SENDER!cam!x",
            "!!!",
        ] {
            assert_eq!(FrameMode::Direct.decode(raw), other(raw), "input {raw:?}");
        }
    }

    #[test]
    fn test_direct_rejects_channel() {
        let msg = SignalingMessage::new(SignalKind::Offer, "{}").on_channel(1u32);
        assert!(matches!(
            FrameMode::Direct.encode(&msg),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_other_encodes_as_raw_text() {
        let msg = SignalingMessage::other("TEST!WEBSOCKET TEST");
        assert_eq!(
            FrameMode::Numbered.encode(&msg).unwrap(),
            "TEST!WEBSOCKET TEST"
        );
    }

    #[test]
    fn test_other_that_parses_as_signal_is_rejected() {
        let msg = SignalingMessage::other(r#"OFFER!{"SessionType":"offer","Sdp":"v=0"}"#);
        assert!(matches!(
            FrameMode::Direct.encode(&msg),
            Err(ProtocolError::InvalidMessage(_))
        ));

        // Not a frame in the numbered family, so it passes as text there.
        let msg = SignalingMessage::other("OFFER!{}");
        assert_eq!(FrameMode::Numbered.encode(&msg).unwrap(), "OFFER!{}");
    }

    // =====================================================================
    // Numbered
    // =====================================================================

    #[test]
    fn test_numbered_round_trip() {
        let msg = SignalingMessage::new(SignalKind::Channel, "client-a").on_channel(42u32);
        let raw = FrameMode::Numbered.encode(&msg).unwrap();
        assert_eq!(raw, "CHANNEL!42!client-a");
        assert_eq!(FrameMode::Numbered.decode(&raw), msg);
    }

    #[test]
    fn test_numbered_ids_are_normalised() {
        for raw in ["OFFER!7!{}", "OFFER!07!{}", "OFFER!+7!{}"] {
            let msg = FrameMode::Numbered.decode(raw);
            assert_eq!(msg.channel, Some(ChannelId::from(7u32)), "input {raw:?}");
        }

        let msg = SignalingMessage::new(SignalKind::Offer, "{}").on_channel("007");
        assert_eq!(FrameMode::Numbered.encode(&msg).unwrap(), "OFFER!7!{}");
    }

    #[test]
    fn test_numbered_non_numeric_id_is_other() {
        let raw = "OFFER!lobby!{}";
        assert_eq!(FrameMode::Numbered.decode(raw), other(raw));
    }

    #[test]
    fn test_numbered_under_length_is_other() {
        for raw in ["OFFER!{}", "OFFER!3", "CHANNEL!"] {
            assert_eq!(FrameMode::Numbered.decode(raw), other(raw), "input {raw:?}");
        }
    }

    #[test]
    fn test_numbered_rejects_text_channel_on_encode() {
        let msg = SignalingMessage::new(SignalKind::Offer, "{}").on_channel("lobby");
        assert!(FrameMode::Numbered.encode(&msg).is_err());
    }

    #[test]
    fn test_numbered_does_not_accept_endpoint_kinds() {
        let raw = "SENDER!1!x";
        assert_eq!(FrameMode::Numbered.decode(raw), other(raw));
    }

    // =====================================================================
    // Tagged
    // =====================================================================

    #[test]
    fn test_tagged_round_trip_with_endpoint() {
        let msg = SignalingMessage::new(SignalKind::Answer, r#"{"SessionType":"answer","Sdp":"v=0"}"#)
            .on_channel("cam-1")
            .from_endpoint(Endpoint::Receiver);
        let raw = FrameMode::Tagged.encode(&msg).unwrap();
        assert_eq!(
            raw,
            r#"ANSWER!cam-1!RECEIVER!{"SessionType":"answer","Sdp":"v=0"}"#
        );
        assert_eq!(FrameMode::Tagged.decode(&raw), msg);
    }

    #[test]
    fn test_tagged_round_trip_without_endpoint() {
        let msg = SignalingMessage::new(SignalKind::Sender, "client-b").on_channel("cam-1");
        let raw = FrameMode::Tagged.encode(&msg).unwrap();
        assert_eq!(raw, "SENDER!cam-1!client-b");
        assert_eq!(FrameMode::Tagged.decode(&raw), msg);
    }

    #[test]
    fn test_tagged_untagged_payload_with_delimiter_survives() {
        let msg = SignalingMessage::new(SignalKind::Offer, "x!y").on_channel("cam");
        let raw = FrameMode::Tagged.encode(&msg).unwrap();
        assert_eq!(FrameMode::Tagged.decode(&raw), msg);
    }

    #[test]
    fn test_tagged_rejects_ambiguous_payload() {
        let msg = SignalingMessage::new(SignalKind::Offer, "SENDER!oops").on_channel("cam");
        assert!(matches!(
            FrameMode::Tagged.encode(&msg),
            Err(ProtocolError::AmbiguousPayload(_))
        ));
    }

    #[test]
    fn test_tagged_rejects_delimiter_in_channel() {
        let msg = SignalingMessage::new(SignalKind::Offer, "{}").on_channel("a!b");
        assert!(matches!(
            FrameMode::Tagged.encode(&msg),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_tagged_malformed_frames_become_other() {
        for raw in ["OFFER!cam", "OFFER!!{}", "RECEIVER", "Sender!cam!x"] {
            assert_eq!(FrameMode::Tagged.decode(raw), other(raw), "input {raw:?}");
        }
    }

    #[test]
    fn test_frame_mode_serde_names() {
        let mode: FrameMode = serde_json::from_str(r#""tagged""#).unwrap();
        assert_eq!(mode, FrameMode::Tagged);
        assert_eq!(serde_json::to_string(&FrameMode::Numbered).unwrap(), r#""numbered""#);
    }
}
