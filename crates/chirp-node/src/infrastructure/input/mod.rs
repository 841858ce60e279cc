//! Keyboard input from stdin.
//!
//! On the host there is no key matrix, so each line typed on stdin is replayed
//! as the key presses that would have produced it: one `Char` per character
//! followed by `Enter`.  The session clicks for each of them exactly as it
//! would for a physical keyboard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::chat::KeyEvent;

/// Expands one typed line into key presses.
pub fn keys_for_line(line: &str) -> Vec<KeyEvent> {
    line.chars()
        .filter(|c| !c.is_control())
        .map(KeyEvent::Char)
        .chain(std::iter::once(KeyEvent::Enter))
        .collect()
}

/// Spawns a task that reads stdin line by line and forwards key presses.
///
/// The task ends at EOF, when the receiver is dropped, or once `running` clears.
pub fn spawn_stdin_reader(tx: mpsc::Sender<KeyEvent>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while running.load(Ordering::SeqCst) {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    debug!("stdin read failed: {e}");
                    break;
                }
            };
            for key in keys_for_line(&line) {
                if tx.send(key).await.is_err() {
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_for_line_ends_with_enter() {
        assert_eq!(
            keys_for_line("hi"),
            vec![KeyEvent::Char('h'), KeyEvent::Char('i'), KeyEvent::Enter]
        );
    }

    #[test]
    fn test_keys_for_empty_line_is_just_enter() {
        assert_eq!(keys_for_line(""), vec![KeyEvent::Enter]);
    }

    #[test]
    fn test_control_characters_are_dropped() {
        assert_eq!(
            keys_for_line("a\r"),
            vec![KeyEvent::Char('a'), KeyEvent::Enter]
        );
    }
}
