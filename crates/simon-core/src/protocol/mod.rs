//! Protocol module containing wire constants, verdicts, and the text codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_pattern, decode_verdict, encode_length, encode_pattern, Codec, CodecMode, ProtocolError};
pub use messages::*;
