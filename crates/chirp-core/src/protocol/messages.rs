//! Chirp command types.
//!
//! A command is one of four kinds, identified on the wire by a single-letter
//! tag.  The payload is free text bounded by [`MAX_PAYLOAD_LEN`] so that an
//! encoded command always fits in one radio send unit.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Largest payload, in bytes, carried by a single command.
pub const MAX_PAYLOAD_LEN: usize = 240;

/// Separator between the three wire fields.
pub const FIELD_SEPARATOR: char = ':';

// ── Command kinds ─────────────────────────────────────────────────────────────

/// The kind of a command, mapped to a one-letter wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// A typed chat line (`c`).
    Chat,
    /// Ask every peer to play a stored sample (`p`).
    PlaySound,
    /// Ask every peer to play one of the fixed notification tones (`n`).
    NotificationTone,
    /// Announce this device's display name (`d`).
    PingIdentity,
}

impl MessageKind {
    /// Every kind, in wire-tag order.
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Chat,
        MessageKind::PlaySound,
        MessageKind::NotificationTone,
        MessageKind::PingIdentity,
    ];

    /// Returns the wire tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Chat => "c",
            MessageKind::PlaySound => "p",
            MessageKind::NotificationTone => "n",
            MessageKind::PingIdentity => "d",
        }
    }
}

impl TryFrom<&str> for MessageKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "c" => Ok(MessageKind::Chat),
            "p" => Ok(MessageKind::PlaySound),
            "n" => Ok(MessageKind::NotificationTone),
            "d" => Ok(MessageKind::PingIdentity),
            _ => Err(()),
        }
    }
}

// ── Command ───────────────────────────────────────────────────────────────────

/// One command exchanged between peers.
///
/// Commands are immutable once built.  The constructor truncates the payload
/// to [`MAX_PAYLOAD_LEN`] bytes on a character boundary, so every `Message`
/// value can be encoded without fragmentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    sender_id: u32,
    kind: MessageKind,
    payload: String,
}

impl Message {
    /// Builds a command, truncating an oversized payload.
    pub fn new(sender_id: u32, kind: MessageKind, payload: impl Into<String>) -> Self {
        let mut payload = payload.into();
        let keep = truncate_utf8(&payload, MAX_PAYLOAD_LEN).len();
        payload.truncate(keep);
        Self {
            sender_id,
            kind,
            payload,
        }
    }

    pub fn chat(sender_id: u32, text: impl Into<String>) -> Self {
        Self::new(sender_id, MessageKind::Chat, text)
    }

    pub fn play_sound(sender_id: u32, sample: impl Into<String>) -> Self {
        Self::new(sender_id, MessageKind::PlaySound, sample)
    }

    pub fn notification_tone(sender_id: u32, tone_index: u8) -> Self {
        Self::new(sender_id, MessageKind::NotificationTone, tone_index.to_string())
    }

    pub fn ping_identity(sender_id: u32, display_name: impl Into<String>) -> Self {
        Self::new(sender_id, MessageKind::PingIdentity, display_name)
    }

    pub fn sender_id(&self) -> u32 {
        self.sender_id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Returns the longest prefix of `s` that is at most `max` bytes and ends on a
/// character boundary.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
