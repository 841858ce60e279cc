//! Protocol module containing the command types and the text codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_message, decode_str, encode_bounded, encode_message, DecodeError};
pub use messages::*;
