//! SampleLibrary: plays tones and stored samples off the caller's thread.
//!
//! # Threading
//!
//! `play_tone` and `play_sample` only push a request onto a channel and
//! return.  A dedicated worker thread (`chirp-audio`) resolves the sample in
//! the asset directory, checks its WAVE header, and plays it.  Any problem
//! (unknown name, missing file, bad header) is logged and answered with the
//! [`NotificationKind::Error`] tone; nothing is ever reported to the caller.
//!
//! # Playback history
//!
//! The worker keeps the last [`HISTORY_LEN`] things it played so the
//! simulator and the tests can see what the speaker did.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chirp_core::NotificationKind;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::audio::AudioTrigger;
use crate::infrastructure::audio::wav;

/// Number of playback records kept.
pub const HISTORY_LEN: usize = 32;

/// The asset storage could not be brought up.
#[derive(Debug, Error)]
pub enum AudioInitError {
    #[error("asset directory {path} is not accessible: {source}")]
    AssetDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("asset path {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to start audio worker: {0}")]
    Worker(#[source] std::io::Error),
}

/// One thing the speaker did.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackRecord {
    Tone(NotificationKind),
    Sample { name: String, duration: Duration },
    /// A sample could not be played; the error tone went out instead.
    Fallback { name: String, reason: String },
}

enum Request {
    Tone(NotificationKind),
    Sample(String),
}

/// Audio trigger backed by a directory of `.wav` samples.
pub struct SampleLibrary {
    asset_dir: PathBuf,
    tx: Mutex<Option<mpsc::Sender<Request>>>,
    history: Arc<Mutex<VecDeque<PlaybackRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SampleLibrary {
    /// Opens the asset directory and starts the playback worker.
    ///
    /// # Errors
    ///
    /// Returns [`AudioInitError`] if `asset_dir` is missing or not a directory,
    /// or the worker thread cannot be spawned.
    pub fn open(asset_dir: impl Into<PathBuf>, volume: f32) -> Result<Self, AudioInitError> {
        let asset_dir = asset_dir.into();
        let meta = std::fs::metadata(&asset_dir).map_err(|source| AudioInitError::AssetDir {
            path: asset_dir.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(AudioInitError::NotADirectory(asset_dir));
        }

        let (tx, rx) = mpsc::channel();
        let history = Arc::new(Mutex::new(VecDeque::with_capacity(HISTORY_LEN)));
        let worker = {
            let dir = asset_dir.clone();
            let history = Arc::clone(&history);
            let volume = volume.clamp(0.0, 1.0);
            std::thread::Builder::new()
                .name("chirp-audio".to_string())
                .spawn(move || playback_loop(rx, &dir, volume, &history))
                .map_err(AudioInitError::Worker)?
        };

        info!("audio ready, samples from {}", asset_dir.display());
        Ok(Self {
            asset_dir,
            tx: Mutex::new(Some(tx)),
            history,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    /// The most recent playback records, oldest first.
    pub fn recent(&self) -> Vec<PlaybackRecord> {
        match self.history.lock() {
            Ok(h) => h.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Stops accepting requests and waits for queued playback to finish.
    pub fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("audio worker panicked");
            }
        }
    }

    fn submit(&self, request: Request) {
        let sent = match self.tx.lock() {
            Ok(tx) => tx.as_ref().map(|tx| tx.send(request).is_ok()),
            Err(_) => None,
        };
        if sent != Some(true) {
            debug!("audio worker not running, request dropped");
        }
    }
}

impl Drop for SampleLibrary {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl AudioTrigger for SampleLibrary {
    fn play_tone(&self, kind: NotificationKind) {
        self.submit(Request::Tone(kind));
    }

    fn play_sample(&self, name: &str) {
        self.submit(Request::Sample(name.to_string()));
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

fn playback_loop(
    rx: mpsc::Receiver<Request>,
    dir: &Path,
    volume: f32,
    history: &Mutex<VecDeque<PlaybackRecord>>,
) {
    while let Ok(request) = rx.recv() {
        let records = match request {
            Request::Tone(kind) => vec![play_tone(kind)],
            Request::Sample(name) => match resolve_sample(dir, &name) {
                Ok(info) => {
                    info!(
                        "playing {name} ({:?}, {} Hz, volume {volume:.2})",
                        info.duration, info.sample_rate
                    );
                    vec![PlaybackRecord::Sample {
                        name,
                        duration: info.duration,
                    }]
                }
                Err(reason) => {
                    warn!("cannot play {name:?}: {reason}; playing error tone");
                    vec![
                        PlaybackRecord::Fallback { name, reason },
                        play_tone(NotificationKind::Error),
                    ]
                }
            },
        };
        if let Ok(mut h) = history.lock() {
            for record in records {
                if h.len() == HISTORY_LEN {
                    h.pop_front();
                }
                h.push_back(record);
            }
        }
    }
    debug!("audio worker stopped");
}

fn play_tone(kind: NotificationKind) -> PlaybackRecord {
    let spec = kind.tone();
    debug!(
        "tone {kind:?}: {} Hz for {} ms",
        spec.frequency_hz, spec.duration_ms
    );
    PlaybackRecord::Tone(kind)
}

/// Finds `name` inside `dir` and checks it is a playable WAVE file.
fn resolve_sample(dir: &Path, name: &str) -> Result<wav::WavInfo, String> {
    let candidate = Path::new(name);
    let is_plain_name = candidate.file_name().map(|f| f == candidate.as_os_str()) == Some(true);
    if name.is_empty() || !is_plain_name {
        return Err("not a plain file name".to_string());
    }
    let path = dir.join(candidate);
    let bytes = std::fs::read(&path).map_err(|e| format!("{}: {e}", path.display()))?;
    wav::inspect(&bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_assets() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chirp_assets_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Drains the worker by shutting down, then returns what it played.
    fn played(lib: &SampleLibrary) -> Vec<PlaybackRecord> {
        lib.shutdown();
        lib.recent()
    }

    #[test]
    fn test_open_rejects_missing_directory() {
        let missing = std::env::temp_dir().join(format!("chirp_none_{}", Uuid::new_v4()));
        assert!(matches!(
            SampleLibrary::open(&missing, 1.0),
            Err(AudioInitError::AssetDir { .. })
        ));
    }

    #[test]
    fn test_open_rejects_plain_file() {
        let dir = temp_assets();
        let file = dir.join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        assert!(matches!(
            SampleLibrary::open(&file, 1.0),
            Err(AudioInitError::NotADirectory(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_existing_sample_plays_with_its_duration() {
        // Arrange
        let dir = temp_assets();
        std::fs::write(dir.join("dog.wav"), wav::silent_pcm(8000, 1, 8, 4000)).unwrap();
        let lib = SampleLibrary::open(&dir, 0.5).unwrap();

        // Act
        lib.play_sample("dog.wav");

        // Assert
        assert_eq!(
            played(&lib),
            vec![PlaybackRecord::Sample {
                name: "dog.wav".into(),
                duration: Duration::from_millis(500),
            }]
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_sample_falls_back_and_worker_keeps_going() {
        // Arrange
        let dir = temp_assets();
        let lib = SampleLibrary::open(&dir, 1.0).unwrap();

        // Act
        lib.play_sample("dog.wav");
        lib.play_tone(NotificationKind::KeyClick);

        // Assert
        let records = played(&lib);
        assert_eq!(records.len(), 3);
        assert!(matches!(&records[0], PlaybackRecord::Fallback { name, .. } if name == "dog.wav"));
        assert_eq!(records[1], PlaybackRecord::Tone(NotificationKind::Error));
        assert_eq!(records[2], PlaybackRecord::Tone(NotificationKind::KeyClick));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_path_traversal_and_non_wave_files_fall_back() {
        // Arrange
        let dir = temp_assets();
        std::fs::write(dir.join("notes.wav"), b"just text").unwrap();
        let lib = SampleLibrary::open(&dir, 1.0).unwrap();

        // Act
        lib.play_sample("../etc/passwd");
        lib.play_sample("notes.wav");
        lib.play_sample("");

        // Assert
        let records = played(&lib);
        assert_eq!(records.len(), 6);
        for pair in records.chunks(2) {
            assert!(matches!(pair[0], PlaybackRecord::Fallback { .. }));
            assert_eq!(pair[1], PlaybackRecord::Tone(NotificationKind::Error));
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_history_is_bounded() {
        let dir = temp_assets();
        let lib = SampleLibrary::open(&dir, 1.0).unwrap();

        for _ in 0..HISTORY_LEN + 5 {
            lib.play_tone(NotificationKind::Enter);
        }

        assert_eq!(played(&lib).len(), HISTORY_LEN);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_requests_after_shutdown_are_dropped() {
        let dir = temp_assets();
        let lib = SampleLibrary::open(&dir, 1.0).unwrap();
        lib.shutdown();

        lib.play_tone(NotificationKind::Error);

        assert!(lib.recent().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
