//! Audio output implementations of [`AudioTrigger`](crate::application::audio::AudioTrigger).
//!
//! - **`library`** – `SampleLibrary`, backed by a directory of `.wav` files and
//!   a playback worker thread.
//! - **`wav`** – RIFF/WAVE header inspection used to validate samples.
//! - **`mock`** – `MockAudio`, which records calls for tests.

pub mod library;
pub mod mock;
pub mod wav;

pub use library::{AudioInitError, PlaybackRecord, SampleLibrary};
pub use mock::MockAudio;
