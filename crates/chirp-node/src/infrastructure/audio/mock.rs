//! Mock audio output for unit and integration testing.
//!
//! `MockAudio` records every tone and sample request in a `Mutex<Vec<...>>`
//! so tests can assert on exactly what the node asked the speaker to do.
//!
//! By default every sample is considered present.  After
//! [`MockAudio::with_assets`] only the listed names are; a request for any
//! other name is recorded and answered with the error tone, like the real
//! library's fallback.

use std::collections::HashSet;
use std::sync::Mutex;

use chirp_core::NotificationKind;

use crate::application::audio::AudioTrigger;

#[derive(Default)]
pub struct MockAudio {
    /// Tones in the order they were requested (fallback error tones included).
    pub tones: Mutex<Vec<NotificationKind>>,
    /// Sample names in the order they were requested.
    pub samples: Mutex<Vec<String>>,
    assets: Option<HashSet<String>>,
}

impl MockAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the available samples to `names`.
    pub fn with_assets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            assets: Some(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn tones(&self) -> Vec<NotificationKind> {
        self.tones.lock().unwrap().clone()
    }

    pub fn samples(&self) -> Vec<String> {
        self.samples.lock().unwrap().clone()
    }
}

impl AudioTrigger for MockAudio {
    fn play_tone(&self, kind: NotificationKind) {
        self.tones.lock().unwrap().push(kind);
    }

    fn play_sample(&self, name: &str) {
        self.samples.lock().unwrap().push(name.to_string());
        let present = self.assets.as_ref().map_or(true, |a| a.contains(name));
        if !present {
            self.tones.lock().unwrap().push(NotificationKind::Error);
        }
    }
}
