//! ChatSession: the handheld's foreground loop.
//!
//! The session owns the local line buffer.  Key presses click, Enter flushes
//! the buffer either as a chat line or as a local command, and the result is
//! fanned out through the [`BroadcastDispatcher`].  Events coming back from
//! the connection manager are turned into display lines and sounds.
//!
//! # Local commands
//!
//! | Typed line      | Effect                                                  |
//! |-----------------|---------------------------------------------------------|
//! | `/play dog.wav` | plays the sample here and on every peer                 |
//! | `/play`         | quick play: the first catalogue sample, `cat.wav`       |
//! | `/tone 2`       | plays notification tone 2 here and on every peer        |
//! | `/whois`        | announces our name, shows the connected peers           |
//! | anything else   | sent as a chat line                                     |

use std::collections::HashMap;
use std::sync::Arc;

use chirp_core::{
    DeviceIdentity, Message, MessageKind, NotificationKind, PeerAddress, MAX_PAYLOAD_LEN,
    SAMPLE_CATALOGUE,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::audio::AudioTrigger;
use crate::application::connection_manager::NodeEvent;
use crate::application::dispatcher::{BroadcastDispatcher, BroadcastReport};
use crate::application::registry::PeerRegistry;
use crate::application::transport::SendFailure;

/// Tone played when a chat line arrives.
pub const INCOMING_CHAT_TONE: NotificationKind = NotificationKind::KeyClick;

/// Tone played when something the user asked for did not work.
pub const FAILURE_TONE: NotificationKind = NotificationKind::Error;

/// Sample sent by the quick-play button and by a bare `/play`.
pub const QUICK_PLAY_SAMPLE: &str = SAMPLE_CATALOGUE[0];

// ── Input ─────────────────────────────────────────────────────────────────────

/// A key press as delivered by the input collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Char(char),
    Backspace,
    Enter,
    /// A modifier pressed on its own (Shift, Fn, ...).
    Modifier,
    /// The quick-play button; leaves the line buffer alone.
    QuickPlay,
}

impl KeyEvent {
    /// The click played for this key.
    pub fn click_tone(self) -> NotificationKind {
        match self {
            KeyEvent::Enter => NotificationKind::Enter,
            KeyEvent::Modifier => NotificationKind::Modifier,
            KeyEvent::Char(_) | KeyEvent::Backspace | KeyEvent::QuickPlay => {
                NotificationKind::KeyClick
            }
        }
    }
}

/// Characters typed since the last Enter.
///
/// Holds at most [`MAX_PAYLOAD_LEN`] bytes; further characters are refused.
/// Control characters (including newlines) are never stored.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    text: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `c`.  Returns `false` if it was refused.
    pub fn push(&mut self, c: char) -> bool {
        if c.is_control() || self.text.len() + c.len_utf8() > MAX_PAYLOAD_LEN {
            return false;
        }
        self.text.push(c);
        true
    }

    /// Removes the last character.  Returns `false` if the buffer was empty.
    pub fn backspace(&mut self) -> bool {
        self.text.pop().is_some()
    }

    /// Takes the buffered line and clears the buffer.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

// ── Local commands ────────────────────────────────────────────────────────────

/// What a flushed line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    Chat(String),
    PlaySound(String),
    Tone(NotificationKind),
    Whois,
}

/// A line starting with `/` that could not be understood.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("no tone numbered {0:?} (use 0-3)")]
    UnknownTone(String),
    #[error("unknown command /{0}")]
    UnknownCommand(String),
}

/// Parses a flushed line.  Returns `Ok(None)` for a blank line.
pub fn parse_line(line: &str) -> Result<Option<LocalCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(LocalCommand::Chat(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "play" if arg.is_empty() => Ok(Some(LocalCommand::PlaySound(QUICK_PLAY_SAMPLE.to_string()))),
        "play" => Ok(Some(LocalCommand::PlaySound(arg.to_string()))),
        "tone" if arg.is_empty() => Err(CommandError::MissingArgument("tone")),
        "tone" => arg
            .parse::<u8>()
            .ok()
            .and_then(NotificationKind::from_index)
            .map(|kind| Some(LocalCommand::Tone(kind)))
            .ok_or_else(|| CommandError::UnknownTone(arg.to_string())),
        "whois" => Ok(Some(LocalCommand::Whois)),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

// ── Display ───────────────────────────────────────────────────────────────────

/// Text output as seen by the application layer.
pub trait DisplaySink: Send + Sync {
    /// Appends a line to the scrolling chat area.
    fn show_line(&self, line: &str);

    /// Replaces the one-line status area.
    fn show_status(&self, status: &str);
}

// ── Session ───────────────────────────────────────────────────────────────────

/// The foreground chat session of one node.
pub struct ChatSession {
    identity: DeviceIdentity,
    dispatcher: BroadcastDispatcher,
    registry: PeerRegistry,
    audio: Arc<dyn AudioTrigger>,
    display: Arc<dyn DisplaySink>,
    buffer: LineBuffer,
    names: HashMap<u32, String>,
}

impl ChatSession {
    pub fn new(
        identity: DeviceIdentity,
        dispatcher: BroadcastDispatcher,
        registry: PeerRegistry,
        audio: Arc<dyn AudioTrigger>,
        display: Arc<dyn DisplaySink>,
    ) -> Self {
        Self {
            identity,
            dispatcher,
            registry,
            audio,
            display,
            buffer: LineBuffer::new(),
            names: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    /// Display name learned for `sender_id`, if any peer announced one.
    pub fn known_name(&self, sender_id: u32) -> Option<&str> {
        self.names.get(&sender_id).map(String::as_str)
    }

    /// Handles one key press.
    pub async fn handle_key(&mut self, key: KeyEvent) {
        self.audio.play_tone(key.click_tone());
        match key {
            KeyEvent::Char(c) => {
                if !self.buffer.push(c) {
                    debug!("line buffer refused {c:?}");
                }
            }
            KeyEvent::Backspace => {
                self.buffer.backspace();
            }
            KeyEvent::Modifier => {}
            KeyEvent::QuickPlay => {
                self.run_command(LocalCommand::PlaySound(QUICK_PLAY_SAMPLE.to_string()))
                    .await;
            }
            KeyEvent::Enter => {
                let line = self.buffer.take();
                self.submit_line(&line).await;
            }
        }
    }

    /// Interprets a flushed line and sends whatever it asks for.
    ///
    /// Returns the dispatch report when something was sent.
    pub async fn submit_line(&mut self, line: &str) -> Option<BroadcastReport> {
        let command = match parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(e) => {
                self.audio.play_tone(FAILURE_TONE);
                self.display.show_status(&e.to_string());
                return None;
            }
        };
        self.run_command(command).await
    }

    async fn run_command(&mut self, command: LocalCommand) -> Option<BroadcastReport> {
        let own_id = self.identity.numeric_id();
        let message = match command {
            LocalCommand::Chat(text) => {
                let message = Message::chat(own_id, text);
                self.display
                    .show_line(&format!("{}: {}", self.identity.display_name(), message.payload()));
                message
            }
            LocalCommand::PlaySound(sample) => {
                self.audio.play_sample(&sample);
                Message::play_sound(own_id, sample)
            }
            LocalCommand::Tone(kind) => {
                self.audio.play_tone(kind);
                Message::notification_tone(own_id, kind.index())
            }
            LocalCommand::Whois => {
                self.show_peers().await;
                Message::ping_identity(own_id, self.identity.display_name())
            }
        };

        self.send(&message).await
    }

    async fn send(&self, message: &Message) -> Option<BroadcastReport> {
        match self.dispatcher.broadcast(message).await {
            Ok(report) => {
                if !report.all_delivered() {
                    self.display.show_status(&format!(
                        "delivered to {}/{} peers",
                        report.delivered, report.attempted
                    ));
                }
                Some(report)
            }
            Err(e) => {
                self.report_send_failure(&e);
                None
            }
        }
    }

    fn report_send_failure(&self, e: &SendFailure) {
        warn!("send failed: {e}");
        self.audio.play_tone(FAILURE_TONE);
        self.display.show_status(&format!("send failed: {e}"));
    }

    async fn show_peers(&self) {
        let peers = self.registry.addresses().await;
        if peers.is_empty() {
            self.display.show_status("no peers connected");
        } else {
            let list: Vec<&str> = peers.iter().map(PeerAddress::as_str).collect();
            self.display
                .show_status(&format!("{} peer(s): {}", peers.len(), list.join(", ")));
        }
    }

    /// Reacts to an event from the connection manager.
    pub async fn handle_node_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::PeerConnected { address, role } => {
                self.display
                    .show_status(&format!("{address} joined ({role:?})"));
                let ping = Message::ping_identity(
                    self.identity.numeric_id(),
                    self.identity.display_name(),
                );
                self.send(&ping).await;
            }
            NodeEvent::PeerDisconnected { address } => {
                self.display.show_status(&format!("{address} left"));
            }
            NodeEvent::ConnectFailed { address, reason } => {
                debug!("connect to {address} failed: {reason}");
                self.display
                    .show_status(&format!("could not reach {address}"));
            }
            NodeEvent::MessageReceived { from, message } => {
                self.handle_message(&from, &message);
            }
        }
    }

    /// Acts on a decoded command from a peer.
    pub fn handle_message(&mut self, from: &PeerAddress, message: &Message) {
        let sender = message.sender_id();
        match message.kind() {
            MessageKind::Chat => {
                let label = self
                    .names
                    .get(&sender)
                    .cloned()
                    .unwrap_or_else(|| format!("#{sender}"));
                self.display
                    .show_line(&format!("{label}: {}", message.payload()));
                self.audio.play_tone(INCOMING_CHAT_TONE);
            }
            MessageKind::PlaySound => {
                info!("#{sender} asked to play {}", message.payload());
                self.audio.play_sample(message.payload());
            }
            MessageKind::NotificationTone => {
                match message
                    .payload()
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .and_then(NotificationKind::from_index)
                {
                    Some(kind) => self.audio.play_tone(kind),
                    None => debug!("ignoring tone {:?} from {from}", message.payload()),
                }
            }
            MessageKind::PingIdentity => {
                let name = message.payload().to_string();
                if self.names.insert(sender, name.clone()).as_ref() != Some(&name) {
                    self.display
                        .show_status(&format!("{name} (#{sender}) is here"));
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
