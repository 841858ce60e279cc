//! Audio trigger facade.
//!
//! The mesh layer asks for sounds through this trait and moves on.  Both calls
//! are fire-and-forget: they return promptly, never block the radio path, and
//! never report failure to the caller.  A missing or unreadable sample is the
//! implementation's problem; it plays [`NotificationKind::Error`] instead.

use chirp_core::NotificationKind;

/// Sound output as seen by the application layer.
pub trait AudioTrigger: Send + Sync {
    /// Plays one of the fixed notification tones.
    fn play_tone(&self, kind: NotificationKind);

    /// Plays a stored sample by file name (e.g. `"dog.wav"`).
    fn play_sample(&self, name: &str);
}
