//! Wire protocol for Parley.
//!
//! This crate defines the text that peers exchange through the relay:
//!
//! - **Types** ([`SignalingMessage`], [`SessionDescription`],
//!   [`CandidateDescriptor`], [`ConnectionKey`], etc.): the parsed form
//!   of a frame and of the JSON payloads it carries.
//! - **Frames** ([`FrameMode`]): how a message is laid out as
//!   `!`-delimited text in each of the three wire families.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how payload values are
//!   converted to and from text.
//! - **Errors** ([`ProtocolError`]): what can go wrong while encoding.
//!
//! # Architecture
//!
//! The protocol layer sits between the relay transport (raw text frames)
//! and negotiation (peer connection state). It knows nothing about
//! connections; it only parses and builds frames.
//!
//! ```text
//! Transport (text) → Protocol (SignalingMessage) → Negotiation (Negotiator)
//! ```

mod codec;
mod error;
mod frame;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use frame::{FrameMode, DELIMITER};
pub use types::{
    CandidateDescriptor, ChannelId, ConnectionKey, Endpoint, SdpKind,
    SessionDescription, SignalKind, SignalingMessage,
};
