//! Transport binding: the one contract every Chirp radio satisfies.
//!
//! Two deployment modes exist:
//!
//! - **Mesh** – connection-oriented.  The node advertises the Chirp service,
//!   accepts inbound links, scans for other nodes, and opens outbound links.
//!   Each link carries commands in both directions.
//! - **Broadcast** – connectionless.  There are no links; every command is a
//!   single datagram to the transport's broadcast address.  `connect` always
//!   fails and `scan` always returns nothing.
//!
//! Radio-stack callbacks are turned into [`TransportEvent`]s on an `mpsc`
//! channel handed to [`Transport::start`], so the connection manager never
//! runs on a transport-owned task.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chirp_core::{Advertisement, PeerAddress};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Which radio deployment a node runs, chosen once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Mesh,
    Broadcast,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Mesh => f.write_str("mesh"),
            TransportMode::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// Process-unique identity of one link.
///
/// Two links can share a [`PeerAddress`] (both nodes connecting to each other
/// at once); the id lets a disconnect remove exactly the link that closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

impl LinkId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// An outbound connection attempt did not produce a usable link.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The transport has no notion of connections.
    #[error("transport does not support connections")]
    Unsupported,
    /// The remote did not accept the connection.
    #[error("peer {address} unreachable: {reason}")]
    Unreachable { address: PeerAddress, reason: String },
    /// The remote connected but does not expose the Chirp characteristic.
    #[error("peer {address} does not expose the chirp service")]
    ServiceMissing { address: PeerAddress },
    /// The attempt exceeded the configured connect timeout.
    #[error("connect to {address} timed out after {timeout:?}")]
    TimedOut {
        address: PeerAddress,
        timeout: Duration,
    },
}

/// A single send did not complete.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// The link has been closed by either side.
    #[error("link to {address} is closed")]
    LinkClosed { address: PeerAddress },
    /// The radio reported an error while sending.
    #[error("send to {address} failed: {reason}")]
    Io { address: PeerAddress, reason: String },
    /// The connectionless broadcast did not go out.
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    /// The frame does not fit a single send unit of this transport.
    #[error("frame of {len} bytes exceeds the {max}-byte send unit")]
    FrameTooLarge { len: usize, max: usize },
    /// The transport does not offer this delivery path.
    #[error("operation not supported by the {0} transport")]
    Unsupported(TransportMode),
}

/// Transport lifecycle errors (start, scan, re-advertise).
#[derive(Debug, Error)]
pub enum TransportError {
    /// A socket or radio resource could not be bound.
    #[error("failed to bind {what}: {source}")]
    Bind {
        what: String,
        #[source]
        source: std::io::Error,
    },
    /// `start` was called twice.
    #[error("transport already started")]
    AlreadyStarted,
    /// An operation needed `start` first.
    #[error("transport not started")]
    NotStarted,
    /// The radio is powered off or otherwise unavailable.
    #[error("radio unavailable: {0}")]
    Unavailable(String),
    /// An I/O error from the radio stack.
    #[error("radio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Callbacks from the radio, delivered as messages.
pub enum TransportEvent {
    /// A remote peer connected to our listener.
    Accepted { link: Arc<dyn PeerLink> },
    /// A link closed (either side).
    Disconnected { address: PeerAddress, link_id: LinkId },
    /// Raw bytes arrived from a peer (or from the broadcast address).
    Received { from: PeerAddress, bytes: Vec<u8> },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Accepted { link } => f
                .debug_struct("Accepted")
                .field("address", link.address())
                .field("link_id", &link.id())
                .finish(),
            TransportEvent::Disconnected { address, link_id } => f
                .debug_struct("Disconnected")
                .field("address", address)
                .field("link_id", link_id)
                .finish(),
            TransportEvent::Received { from, bytes } => f
                .debug_struct("Received")
                .field("from", from)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// Capability to deliver frames to one connected peer.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn id(&self) -> LinkId;

    fn address(&self) -> &PeerAddress;

    /// Sends one frame.  Returns once the radio accepted (or refused) it.
    async fn send(&self, frame: &[u8]) -> Result<(), SendFailure>;
}

/// The contract every radio transport satisfies.
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// This node's own address on the transport.
    fn local_address(&self) -> PeerAddress;

    /// Largest frame that fits one send unit.
    fn max_frame_len(&self) -> usize;

    /// Begins advertising and listening.  Events are delivered on `events`
    /// until the transport is dropped.
    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError>;

    /// Re-announces this node so future peers can still discover it.
    async fn readvertise(&self) -> Result<(), TransportError>;

    /// Runs one scan bounded by `window`.  Best-effort; may return nothing.
    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError>;

    /// Opens a link to `address` and verifies it exposes the Chirp characteristic.
    async fn connect(&self, address: &PeerAddress) -> Result<Arc<dyn PeerLink>, ConnectFailure>;

    /// Sends one datagram to the broadcast address (connectionless mode only).
    async fn broadcast(&self, frame: &[u8]) -> Result<(), SendFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_ids_are_unique() {
        let a = LinkId::next();
        let b = LinkId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_transport_mode_serializes_lowercase() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            mode: TransportMode,
        }
        let text = toml::to_string(&Wrapper {
            mode: TransportMode::Broadcast,
        })
        .unwrap();
        assert_eq!(text.trim(), "mode = \"broadcast\"");
    }

    #[test]
    fn test_received_event_debug_hides_bytes() {
        let ev = TransportEvent::Received {
            from: PeerAddress::new("node-b"),
            bytes: b"1701:c:secret".to_vec(),
        };
        let dbg = format!("{ev:?}");
        assert!(dbg.contains("len: 13"));
        assert!(!dbg.contains("secret"));
    }
}
