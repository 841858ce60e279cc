//! MemoryRadio: an in-process air medium.
//!
//! Any number of nodes [`attach`](MemoryRadio::attach) to one `MemoryRadio`
//! and get a [`MemoryTransport`] each.  Mesh nodes advertise, scan, and open
//! links to each other; broadcast nodes hear every datagram sent by the other
//! broadcast nodes.  Delivery goes straight onto the receiving node's
//! [`TransportEvent`] channel, so ordering per link is preserved.
//!
//! A mesh node that accepts a link stops advertising until it calls
//! `readvertise`, the way a radio peripheral goes quiet once a central holds it.
//!
//! # Fault injection
//!
//! | Call                         | Effect                                              |
//! |------------------------------|-----------------------------------------------------|
//! | `set_send_failure(a, true)`  | sends to `a`, and broadcasts from `a`, fail         |
//! | `set_exposes_characteristic` | connects to the node fail the service check         |
//! | `disconnect(a, b)`           | closes every link between `a` and `b`               |
//! | `power_off(a)`               | `a` leaves the air; its links close                 |

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chirp_core::{Advertisement, PeerAddress, ServiceIds};
use tokio::sync::mpsc;
use tracing::debug;

use crate::application::transport::{
    ConnectFailure, LinkId, PeerLink, SendFailure, Transport, TransportError, TransportEvent,
    TransportMode,
};

/// Largest frame the simulated radio carries in one unit.
pub const MEMORY_FRAME_LEN: usize = 250;

struct NodeEntry {
    mode: TransportMode,
    ids: ServiceIds,
    events: Option<mpsc::Sender<TransportEvent>>,
    advertising: bool,
    exposes_characteristic: bool,
}

/// Both ends of one mesh link.
struct Connection {
    client: (PeerAddress, LinkId),
    server: (PeerAddress, LinkId),
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct Air {
    nodes: HashMap<PeerAddress, NodeEntry>,
    connections: Vec<Connection>,
    failing: HashSet<PeerAddress>,
}

impl Air {
    fn events_of(&self, address: &PeerAddress) -> Option<mpsc::Sender<TransportEvent>> {
        self.nodes.get(address).and_then(|n| n.events.clone())
    }

    /// Marks every connection matched by `pred` closed and removes it.
    ///
    /// Returns the disconnect notifications to deliver.
    fn close_where<F>(&mut self, pred: F) -> Vec<(mpsc::Sender<TransportEvent>, TransportEvent)>
    where
        F: Fn(&Connection) -> bool,
    {
        let mut notices = Vec::new();
        let mut kept = Vec::with_capacity(self.connections.len());
        for conn in std::mem::take(&mut self.connections) {
            if !pred(&conn) {
                kept.push(conn);
                continue;
            }
            conn.closed.store(true, Ordering::SeqCst);
            let (client, client_link) = &conn.client;
            let (server, server_link) = &conn.server;
            if let Some(tx) = self.events_of(client) {
                notices.push((
                    tx,
                    TransportEvent::Disconnected {
                        address: server.clone(),
                        link_id: *client_link,
                    },
                ));
            }
            if let Some(tx) = self.events_of(server) {
                notices.push((
                    tx,
                    TransportEvent::Disconnected {
                        address: client.clone(),
                        link_id: *server_link,
                    },
                ));
            }
        }
        self.connections = kept;
        notices
    }
}

/// The shared simulated medium.  Cloning shares the same air.
#[derive(Clone, Default)]
pub struct MemoryRadio {
    air: Arc<Mutex<Air>>,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn air(&self) -> MutexGuard<'_, Air> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.air.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Puts a node named `name` on the air.  It is silent until started.
    ///
    /// Attaching a name that is already present replaces it, which is how a
    /// restarted node rejoins.
    pub fn attach(&self, name: impl Into<PeerAddress>, mode: TransportMode, ids: ServiceIds) -> MemoryTransport {
        let local = name.into();
        self.air().nodes.insert(
            local.clone(),
            NodeEntry {
                mode,
                ids,
                events: None,
                advertising: false,
                exposes_characteristic: true,
            },
        );
        MemoryTransport {
            radio: self.clone(),
            local,
            mode,
            ids,
        }
    }

    /// Makes sends to `address` (and broadcasts from it) fail.
    pub fn set_send_failure(&self, address: impl Into<PeerAddress>, failing: bool) {
        let address = address.into();
        let mut air = self.air();
        if failing {
            air.failing.insert(address);
        } else {
            air.failing.remove(&address);
        }
    }

    /// Controls whether a node passes the characteristic check on connect.
    pub fn set_exposes_characteristic(&self, address: impl Into<PeerAddress>, exposes: bool) {
        if let Some(node) = self.air().nodes.get_mut(&address.into()) {
            node.exposes_characteristic = exposes;
        }
    }

    /// Closes every link between `a` and `b` and notifies both sides.
    pub async fn disconnect(&self, a: impl Into<PeerAddress>, b: impl Into<PeerAddress>) {
        let (a, b) = (a.into(), b.into());
        let notices = self.air().close_where(|c| {
            (c.client.0 == a && c.server.0 == b) || (c.client.0 == b && c.server.0 == a)
        });
        deliver(notices).await;
    }

    /// Takes a node off the air.  Its links close and its peers are notified.
    pub async fn power_off(&self, address: impl Into<PeerAddress>) {
        let address = address.into();
        let notices = {
            let mut air = self.air();
            let notices = air.close_where(|c| c.client.0 == address || c.server.0 == address);
            air.nodes.remove(&address);
            notices
        };
        deliver(notices).await;
    }

    /// Number of open links on the air.
    pub fn link_count(&self) -> usize {
        self.air().connections.len()
    }

    pub fn is_advertising(&self, address: &PeerAddress) -> bool {
        self.air()
            .nodes
            .get(address)
            .map_or(false, |n| n.advertising)
    }
}

async fn deliver(notices: Vec<(mpsc::Sender<TransportEvent>, TransportEvent)>) {
    for (tx, event) in notices {
        let _ = tx.send(event).await;
    }
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// One end of a simulated mesh link.
pub struct MemoryLink {
    id: LinkId,
    owner: PeerAddress,
    remote: PeerAddress,
    closed: Arc<AtomicBool>,
    radio: MemoryRadio,
}

#[async_trait]
impl PeerLink for MemoryLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn address(&self) -> &PeerAddress {
        &self.remote
    }

    async fn send(&self, frame: &[u8]) -> Result<(), SendFailure> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendFailure::LinkClosed {
                address: self.remote.clone(),
            });
        }
        if frame.len() > MEMORY_FRAME_LEN {
            return Err(SendFailure::FrameTooLarge {
                len: frame.len(),
                max: MEMORY_FRAME_LEN,
            });
        }
        let tx = {
            let air = self.radio.air();
            if air.failing.contains(&self.remote) {
                return Err(SendFailure::Io {
                    address: self.remote.clone(),
                    reason: "simulated radio error".into(),
                });
            }
            air.events_of(&self.remote)
        };
        let tx = tx.ok_or_else(|| SendFailure::LinkClosed {
            address: self.remote.clone(),
        })?;
        tx.send(TransportEvent::Received {
            from: self.owner.clone(),
            bytes: frame.to_vec(),
        })
        .await
        .map_err(|_| SendFailure::LinkClosed {
            address: self.remote.clone(),
        })
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// One node's view of a [`MemoryRadio`].
pub struct MemoryTransport {
    radio: MemoryRadio,
    local: PeerAddress,
    mode: TransportMode,
    ids: ServiceIds,
}

impl MemoryTransport {
    pub fn radio(&self) -> &MemoryRadio {
        &self.radio
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn mode(&self) -> TransportMode {
        self.mode
    }

    fn local_address(&self) -> PeerAddress {
        self.local.clone()
    }

    fn max_frame_len(&self) -> usize {
        MEMORY_FRAME_LEN
    }

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        let mut air = self.radio.air();
        let node = air
            .nodes
            .get_mut(&self.local)
            .ok_or_else(|| TransportError::Unavailable(format!("{} is powered off", self.local)))?;
        if node.events.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        node.events = Some(events);
        node.advertising = self.mode == TransportMode::Mesh;
        debug!("{} on the air ({})", self.local, self.mode);
        Ok(())
    }

    async fn readvertise(&self) -> Result<(), TransportError> {
        let mut air = self.radio.air();
        let node = air
            .nodes
            .get_mut(&self.local)
            .ok_or_else(|| TransportError::Unavailable(format!("{} is powered off", self.local)))?;
        if node.events.is_none() {
            return Err(TransportError::NotStarted);
        }
        node.advertising = self.mode == TransportMode::Mesh;
        Ok(())
    }

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        if self.mode == TransportMode::Broadcast {
            return Ok(Vec::new());
        }
        tokio::time::sleep(window).await;

        let air = self.radio.air();
        let mut ads: Vec<Advertisement> = air
            .nodes
            .iter()
            .filter(|(addr, node)| **addr != self.local && node.advertising && node.events.is_some())
            .map(|(addr, node)| Advertisement {
                address: addr.clone(),
                services: vec![node.ids.service],
                name: Some(addr.to_string()),
            })
            .collect();
        ads.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(ads)
    }

    async fn connect(&self, address: &PeerAddress) -> Result<Arc<dyn PeerLink>, ConnectFailure> {
        if self.mode == TransportMode::Broadcast {
            return Err(ConnectFailure::Unsupported);
        }

        let (client_link, server_link, server_tx) = {
            let mut air = self.radio.air();
            let remote = air.nodes.get_mut(address).ok_or_else(|| ConnectFailure::Unreachable {
                address: address.clone(),
                reason: "no such node on the air".into(),
            })?;
            let server_tx = match (&remote.events, remote.mode) {
                (Some(tx), TransportMode::Mesh) => tx.clone(),
                _ => {
                    return Err(ConnectFailure::Unreachable {
                        address: address.clone(),
                        reason: "node is not listening".into(),
                    })
                }
            };
            if !remote.exposes_characteristic || remote.ids.characteristic != self.ids.characteristic {
                return Err(ConnectFailure::ServiceMissing {
                    address: address.clone(),
                });
            }
            // A server goes quiet once it has a client, until it re-advertises.
            remote.advertising = false;

            let closed = Arc::new(AtomicBool::new(false));
            let client_link = Arc::new(MemoryLink {
                id: LinkId::next(),
                owner: self.local.clone(),
                remote: address.clone(),
                closed: Arc::clone(&closed),
                radio: self.radio.clone(),
            });
            let server_link = Arc::new(MemoryLink {
                id: LinkId::next(),
                owner: address.clone(),
                remote: self.local.clone(),
                closed: Arc::clone(&closed),
                radio: self.radio.clone(),
            });
            air.connections.push(Connection {
                client: (self.local.clone(), client_link.id),
                server: (address.clone(), server_link.id),
                closed,
            });
            (client_link, server_link, server_tx)
        };

        server_tx
            .send(TransportEvent::Accepted { link: server_link })
            .await
            .map_err(|_| ConnectFailure::Unreachable {
                address: address.clone(),
                reason: "node stopped listening".into(),
            })?;
        Ok(client_link)
    }

    async fn broadcast(&self, frame: &[u8]) -> Result<(), SendFailure> {
        if self.mode != TransportMode::Broadcast {
            return Err(SendFailure::Unsupported(self.mode));
        }
        if frame.len() > MEMORY_FRAME_LEN {
            return Err(SendFailure::FrameTooLarge {
                len: frame.len(),
                max: MEMORY_FRAME_LEN,
            });
        }

        let receivers: Vec<mpsc::Sender<TransportEvent>> = {
            let air = self.radio.air();
            if air.failing.contains(&self.local) {
                return Err(SendFailure::Broadcast("simulated radio error".into()));
            }
            if !air.nodes.contains_key(&self.local) {
                return Err(SendFailure::Broadcast(format!("{} is powered off", self.local)));
            }
            air.nodes
                .iter()
                .filter(|(addr, node)| **addr != self.local && node.mode == TransportMode::Broadcast)
                .filter_map(|(_, node)| node.events.clone())
                .collect()
        };

        for tx in receivers {
            let _ = tx
                .send(TransportEvent::Received {
                    from: self.local.clone(),
                    bytes: frame.to_vec(),
                })
                .await;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
