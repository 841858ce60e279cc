//! PeerRegistry: the set of currently connected peers.
//!
//! The registry maps each [`PeerAddress`] to a [`PeerConnection`] holding the
//! per-peer send handle.  Only the connection manager mutates it (accept,
//! connect success, disconnect); the dispatcher and the discovery scheduler
//! only read.
//!
//! Every entry is [`PeerState::Connected`]: `register` refuses anything else,
//! and a removed entry comes back marked [`PeerState::Disconnected`].  Peers
//! that are only discovered or being connected to are tracked by the
//! discovery slot and the connection manager, never here.
//!
//! # Concurrency
//!
//! Disconnect callbacks can fire while a broadcast is iterating.  Iteration
//! therefore works on a snapshot cloned under the read lock:
//!
//! - a removal that lands before the snapshot excludes the peer;
//! - a removal that lands after it leaves the peer in this round, and the
//!   cloned `Arc` keeps its send handle alive, so the send fails cleanly with
//!   [`SendFailure::LinkClosed`](crate::application::transport::SendFailure)
//!   instead of touching freed state.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chirp_core::{PeerAddress, PeerRole, PeerState};
use tokio::sync::RwLock;
use tracing::debug;

use crate::application::transport::{LinkId, PeerLink};

/// One connected peer and its send handle.
#[derive(Clone)]
pub struct PeerConnection {
    pub address: PeerAddress,
    pub role: PeerRole,
    pub state: PeerState,
    pub link: Arc<dyn PeerLink>,
    pub connected_at: Instant,
}

impl PeerConnection {
    /// Wraps a freshly opened link as a `Connected` peer.
    pub fn connected(link: Arc<dyn PeerLink>, role: PeerRole) -> Self {
        Self {
            address: link.address().clone(),
            role,
            state: PeerState::Connected,
            link,
            connected_at: Instant::now(),
        }
    }

    pub fn link_id(&self) -> LinkId {
        self.link.id()
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("address", &self.address)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("link_id", &self.link.id())
            .finish()
    }
}

/// Shared, synchronized registry of connected peers.
///
/// Cloning the registry clones the handle, not the contents.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<PeerAddress, PeerConnection>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer.
    ///
    /// Returns `false` and keeps the existing entry if the address is already
    /// registered; there is never more than one entry per address.  A peer
    /// that is not `Connected` is refused.
    pub async fn register(&self, peer: PeerConnection) -> bool {
        if peer.state != PeerState::Connected {
            debug!("refusing to register {} in state {:?}", peer.address, peer.state);
            return false;
        }
        let mut peers = self.peers.write().await;
        if peers.contains_key(&peer.address) {
            return false;
        }
        peers.insert(peer.address.clone(), peer);
        true
    }

    /// Removes the entry for `address`, whatever link it holds.
    pub async fn unregister(&self, address: &PeerAddress) -> Option<PeerConnection> {
        self.peers.write().await.remove(address).map(disconnected)
    }

    /// Removes the entry for `address` only if it holds `link_id`.
    ///
    /// A duplicate link that was refused at registration can close later
    /// without evicting the link that is actually in use.
    pub async fn unregister_link(
        &self,
        address: &PeerAddress,
        link_id: LinkId,
    ) -> Option<PeerConnection> {
        let mut peers = self.peers.write().await;
        match peers.get(address) {
            Some(existing) if existing.link_id() == link_id => peers.remove(address).map(disconnected),
            _ => None,
        }
    }

    pub async fn contains(&self, address: &PeerAddress) -> bool {
        self.peers.read().await.contains_key(address)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Returns the connected peers as of this instant, sorted by address.
    pub async fn snapshot(&self) -> Vec<PeerConnection> {
        let peers = self.peers.read().await;
        let mut out: Vec<PeerConnection> = peers.values().cloned().collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }

    /// Runs `f` for every connected peer in a snapshot.
    ///
    /// The lock is released before `f` runs, so `f` may await sends and a
    /// concurrent disconnect never blocks on (or invalidates) the iteration.
    pub async fn for_each_connected<F, Fut>(&self, mut f: F)
    where
        F: FnMut(PeerConnection) -> Fut,
        Fut: Future<Output = ()>,
    {
        for peer in self.snapshot().await {
            f(peer).await;
        }
    }

    /// Returns the registered addresses, sorted.
    pub async fn addresses(&self) -> Vec<PeerAddress> {
        let mut out: Vec<PeerAddress> = self.peers.read().await.keys().cloned().collect();
        out.sort();
        out
    }
}

fn disconnected(mut peer: PeerConnection) -> PeerConnection {
    peer.state = PeerState::Disconnected;
    peer
}

// ── Tests ─────────────────────────────────────────────────────────────────────
