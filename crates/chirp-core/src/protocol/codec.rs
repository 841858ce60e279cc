//! Text codec for Chirp commands.
//!
//! Wire format (ASCII, no terminator, one command per radio send unit):
//! ```text
//! <senderId>:<kindTag>:<payload>
//! ```
//! Only the first two `:` are separators; the payload may contain more.
//!
//! Decoding fails closed: malformed or truncated radio data yields a
//! [`DecodeError`] and never panics.  Encoding never fragments; a frame that
//! does not fit a transport's send unit is truncated instead.

use thiserror::Error;

use crate::protocol::messages::{truncate_utf8, Message, MessageKind, FIELD_SEPARATOR};

/// Errors that can occur while decoding a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than two `:` separators were present.
    #[error("expected 2 field separators, found {found}")]
    MissingSeparator { found: usize },

    /// The sender field is not a non-negative decimal integer.
    #[error("invalid sender id: {0:?}")]
    InvalidSender(String),

    /// The kind tag is not one of `c`, `p`, `n`, `d`.
    #[error("unknown kind tag: {0:?}")]
    UnknownKind(String),

    /// The raw bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into its wire text.
///
/// # Examples
///
/// ```rust
/// use chirp_core::{decode_str, encode_message, Message};
///
/// let msg = Message::chat(1701, "hi");
/// let text = encode_message(&msg);
/// assert_eq!(text, "1701:c:hi");
/// assert_eq!(decode_str(&text).unwrap(), msg);
/// ```
pub fn encode_message(msg: &Message) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        msg.sender_id(),
        msg.kind().tag(),
        msg.payload(),
        sep = FIELD_SEPARATOR
    )
}

/// Encodes a [`Message`] and truncates the frame to `max_frame_len` bytes.
///
/// Truncation lands on a character boundary.  Multi-unit fragmentation is not
/// supported by any Chirp transport, so excess payload is simply dropped.
pub fn encode_bounded(msg: &Message, max_frame_len: usize) -> Vec<u8> {
    let text = encode_message(msg);
    truncate_utf8(&text, max_frame_len).as_bytes().to_vec()
}

/// Decodes one command from raw radio bytes.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidUtf8`] for non-UTF-8 input, or any error
/// from [`decode_str`].
pub fn decode_message(bytes: &[u8]) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    decode_str(text)
}

/// Decodes one command from wire text.
///
/// A payload longer than [`crate::MAX_PAYLOAD_LEN`] is truncated, matching
/// the encoder's policy.
///
/// # Errors
///
/// Returns [`DecodeError`] if the text has fewer than two separators, a
/// non-numeric sender, or an unknown kind tag.
pub fn decode_str(text: &str) -> Result<Message, DecodeError> {
    let mut fields = text.splitn(3, FIELD_SEPARATOR);
    let (sender, tag, payload) = match (fields.next(), fields.next(), fields.next()) {
        (Some(sender), Some(tag), Some(payload)) => (sender, tag, payload),
        _ => {
            return Err(DecodeError::MissingSeparator {
                found: text.matches(FIELD_SEPARATOR).count(),
            })
        }
    };

    let sender_id = parse_sender(sender)?;
    let kind =
        MessageKind::try_from(tag).map_err(|_| DecodeError::UnknownKind(tag.to_string()))?;

    Ok(Message::new(sender_id, kind, payload))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Accepts only plain ASCII digits; `u32::from_str` would also take a leading `+`.
fn parse_sender(field: &str) -> Result<u32, DecodeError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidSender(field.to_string()));
    }
    field
        .parse()
        .map_err(|_| DecodeError::InvalidSender(field.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
