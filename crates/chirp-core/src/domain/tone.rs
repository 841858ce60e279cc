//! Notification tones and the stored sample catalogue.
//!
//! The handheld speaker plays four short fixed tones.  Their wire index (the
//! payload of a `NotificationTone` command) is the position in the table.

use serde::{Deserialize, Serialize};

/// Frequency and length of one notification tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSpec {
    pub frequency_hz: f32,
    pub duration_ms: u32,
}

/// The fixed notification tones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NotificationKind {
    /// Printable key pressed; also used for an incoming chat line.
    KeyClick = 0,
    /// Enter pressed; also used when a peer drops.
    Enter = 1,
    /// Modifier-only key pressed; also used when a peer joins.
    Modifier = 2,
    /// Something failed (send error, missing sample).
    Error = 3,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 4] = [
        NotificationKind::KeyClick,
        NotificationKind::Enter,
        NotificationKind::Modifier,
        NotificationKind::Error,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Looks up a tone by its wire index.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    pub fn tone(self) -> ToneSpec {
        match self {
            NotificationKind::KeyClick => ToneSpec {
                frequency_hz: 2000.0,
                duration_ms: 5,
            },
            NotificationKind::Enter => ToneSpec {
                frequency_hz: 1500.0,
                duration_ms: 5,
            },
            NotificationKind::Modifier => ToneSpec {
                frequency_hz: 2500.0,
                duration_ms: 5,
            },
            NotificationKind::Error => ToneSpec {
                frequency_hz: 2000.0,
                duration_ms: 100,
            },
        }
    }
}

/// Samples shipped on every device's asset partition.
pub const SAMPLE_CATALOGUE: [&str; 5] = ["cat.wav", "dog.wav", "cow.wav", "sheep.wav", "rooster.wav"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trips_through_from_index() {
        for kind in NotificationKind::ALL {
            assert_eq!(NotificationKind::from_index(kind.index()), Some(kind));
        }
    }

    #[test]
    fn test_out_of_table_index_is_rejected() {
        assert_eq!(NotificationKind::from_index(4), None);
    }

    #[test]
    fn test_error_tone_is_the_long_one() {
        assert_eq!(NotificationKind::Error.tone().duration_ms, 100);
        assert_eq!(NotificationKind::KeyClick.tone().duration_ms, 5);
    }
}
