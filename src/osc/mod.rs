//! OSC wire format: typed values, time tags, and the binary codec.
//!
//! The codec is transport-agnostic; it turns [`OscPacket`] values into
//! byte buffers and back, with no knowledge of correlation or sockets.

pub mod codec;
pub mod time;
pub mod value;

pub use codec::{decode_bundle, decode_message, decode_packet, encode_bundle, encode_message,
                encode_packet};
pub use time::TimeTag;
pub use value::{OscBundle, OscMessage, OscPacket, OscValue};
