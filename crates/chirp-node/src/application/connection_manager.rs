//! ConnectionManager: the dual-role (server + client) peer state machine.
//!
//! # What does it do?
//!
//! Every node is both a server (it accepts inbound links) and a client (it
//! connects to peers the discovery scheduler found).  The manager owns all
//! mutation of the [`PeerRegistry`] and is driven by one event loop that
//! selects over:
//!
//! 1. [`TransportEvent`]s from the radio (accept, disconnect, inbound bytes);
//! 2. the single-slot pending-target `watch` channel fed by discovery;
//! 3. the outcome of the one outbound attempt currently in flight.
//!
//! # Outbound attempt state machine
//!
//! ```text
//!   Idle ──(pending target)──► Connecting ──► Connected
//!                                   │
//!                                   └──────► Failed   (logged, no retry)
//! ```
//!
//! Only one attempt runs at a time.  The attempt runs on its own task, bounded
//! by `connect_timeout`, so accepts and inbound messages keep flowing while it
//! is in progress.  Targets published meanwhile overwrite each other in the
//! watch slot; when the attempt finishes, the newest one is consumed.
//!
//! # Duplicate links
//!
//! When two nodes connect to each other at the same moment there are two
//! links for one address.  The first one registered is used for sends; the
//! other is held on standby and promoted if the first one closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chirp_core::{decode_message, Message, NotificationKind, PeerAddress, PeerRole, PendingTarget};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::application::audio::AudioTrigger;
use crate::application::registry::{PeerConnection, PeerRegistry};
use crate::application::transport::{
    ConnectFailure, LinkId, PeerLink, Transport, TransportEvent,
};

/// Default bound on one outbound connect, handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the event loop re-checks the shutdown flag when idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Capacity of the manager → application event channel.
const NODE_EVENT_CAPACITY: usize = 64;

/// Tone played when a peer joins.
pub const CONNECT_TONE: NotificationKind = NotificationKind::Modifier;

/// Tone played when a peer drops.
pub const DISCONNECT_TONE: NotificationKind = NotificationKind::Enter;

/// State of the outbound attempt slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    Connecting(PeerAddress),
    Connected(PeerAddress),
    Failed(PeerAddress),
}

impl ConnectState {
    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectState::Connecting(_))
    }
}

/// Events emitted by the connection manager to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    PeerConnected {
        address: PeerAddress,
        role: PeerRole,
    },
    PeerDisconnected {
        address: PeerAddress,
    },
    ConnectFailed {
        address: PeerAddress,
        reason: ConnectFailure,
    },
    MessageReceived {
        from: PeerAddress,
        message: Message,
    },
}

type AttemptOutcome = (PeerAddress, Result<Arc<dyn PeerLink>, ConnectFailure>);

/// The connection manager.
pub struct ConnectionManager {
    own_id: u32,
    transport: Arc<dyn Transport>,
    registry: PeerRegistry,
    audio: Arc<dyn AudioTrigger>,
    pending: watch::Receiver<Option<PendingTarget>>,
    app_tx: mpsc::Sender<NodeEvent>,
    connect_timeout: Duration,
    state_tx: watch::Sender<ConnectState>,
    standby: HashMap<PeerAddress, Vec<(Arc<dyn PeerLink>, PeerRole)>>,
    attempt_tx: mpsc::Sender<AttemptOutcome>,
    attempt_rx: mpsc::Receiver<AttemptOutcome>,
}

impl ConnectionManager {
    /// Creates a manager and returns it together with the application event receiver.
    pub fn new(
        own_id: u32,
        transport: Arc<dyn Transport>,
        registry: PeerRegistry,
        audio: Arc<dyn AudioTrigger>,
        pending: watch::Receiver<Option<PendingTarget>>,
    ) -> (Self, mpsc::Receiver<NodeEvent>) {
        let (app_tx, app_rx) = mpsc::channel(NODE_EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectState::Idle);
        let (attempt_tx, attempt_rx) = mpsc::channel(1);
        let mgr = Self {
            own_id,
            transport,
            registry,
            audio,
            pending,
            app_tx,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            state_tx,
            standby: HashMap::new(),
            attempt_tx,
            attempt_rx,
        };
        (mgr, app_rx)
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Subscribes to the outbound attempt state.
    pub fn state_watch(&self) -> watch::Receiver<ConnectState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectState {
        self.state_tx.borrow().clone()
    }

    /// Runs the event loop until `running` clears or the transport event
    /// channel closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        running: Arc<AtomicBool>,
    ) {
        info!("connection manager started (own id {})", self.own_id);
        let mut pending_open = true;

        while running.load(Ordering::SeqCst) {
            let can_attempt = pending_open && !self.state().is_connecting();

            tokio::select! {
                ev = events.recv() => match ev {
                    Some(ev) => self.handle_transport_event(ev).await,
                    None => {
                        info!("transport event channel closed");
                        break;
                    }
                },
                changed = self.pending.changed(), if can_attempt => {
                    if changed.is_err() {
                        debug!("pending-target publisher gone");
                        pending_open = false;
                        continue;
                    }
                    let target = self.pending.borrow_and_update().clone();
                    if let Some(target) = target {
                        self.on_pending_target(target).await;
                    }
                },
                Some((address, outcome)) = self.attempt_rx.recv() => {
                    self.on_attempt_finished(address, outcome).await;
                },
                _ = tokio::time::sleep(SHUTDOWN_POLL) => {}
            }
        }

        info!("connection manager stopped");
    }

    /// Dispatches one radio callback.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Accepted { link } => self.on_accept(link).await,
            TransportEvent::Disconnected { address, link_id } => {
                self.on_disconnect(address, link_id).await
            }
            TransportEvent::Received { from, bytes } => self.on_received(from, &bytes).await,
        }
    }

    // ── Accept path ───────────────────────────────────────────────────────────

    async fn on_accept(&mut self, link: Arc<dyn PeerLink>) {
        let address = link.address().clone();
        if self.admit(link, PeerRole::Inbound).await {
            info!("peer {address} connected (inbound)");
        }
    }

    /// Registers a fresh link, or parks it on standby if the address is taken.
    ///
    /// Returns `true` if the link became the registered one.
    async fn admit(&mut self, link: Arc<dyn PeerLink>, role: PeerRole) -> bool {
        let address = link.address().clone();
        let conn = PeerConnection::connected(link.clone(), role);
        if !self.registry.register(conn).await {
            debug!("duplicate {role:?} link {} for {address}, kept on standby", link.id());
            self.standby.entry(address).or_default().push((link, role));
            return false;
        }
        self.audio.play_tone(CONNECT_TONE);
        self.emit(NodeEvent::PeerConnected { address, role }).await;
        true
    }

    // ── Connect path ──────────────────────────────────────────────────────────

    async fn on_pending_target(&mut self, target: PendingTarget) {
        let address = target.candidate;
        if !target.service_match {
            debug!("ignoring {address}: does not advertise the chirp service");
            return;
        }
        if address == self.transport.local_address() {
            return;
        }
        if self.registry.contains(&address).await {
            debug!("ignoring {address}: already connected");
            return;
        }

        info!("connecting to {address}");
        self.set_state(ConnectState::Connecting(address.clone()));

        let transport = self.transport.clone();
        let timeout = self.connect_timeout;
        let done = self.attempt_tx.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, transport.connect(&address)).await {
                Ok(result) => result,
                Err(_) => Err(ConnectFailure::TimedOut {
                    address: address.clone(),
                    timeout,
                }),
            };
            let _ = done.send((address, outcome)).await;
        });
    }

    async fn on_attempt_finished(
        &mut self,
        address: PeerAddress,
        outcome: Result<Arc<dyn PeerLink>, ConnectFailure>,
    ) {
        match outcome {
            Ok(link) => {
                if self.admit(link, PeerRole::Outbound).await {
                    info!("peer {address} connected (outbound)");
                }
                self.set_state(ConnectState::Connected(address));
            }
            Err(reason) => {
                warn!("connect to {address} failed: {reason}");
                self.set_state(ConnectState::Failed(address.clone()));
                self.emit(NodeEvent::ConnectFailed { address, reason }).await;
            }
        }
    }

    // ── Disconnect path ───────────────────────────────────────────────────────

    async fn on_disconnect(&mut self, address: PeerAddress, link_id: LinkId) {
        if self.registry.unregister_link(&address, link_id).await.is_none() {
            self.drop_standby(&address, link_id);
            debug!("{link_id} to {address} closed (not registered)");
            return;
        }

        if let Some((spare, role)) = self.take_standby(&address) {
            info!("{link_id} to {address} closed; promoting standby {}", spare.id());
            self.registry
                .register(PeerConnection::connected(spare, role))
                .await;
            return;
        }

        info!("peer {address} disconnected");
        self.audio.play_tone(DISCONNECT_TONE);
        if let Err(e) = self.transport.readvertise().await {
            warn!("re-advertise after disconnect failed: {e}");
        }
        self.emit(NodeEvent::PeerDisconnected { address }).await;
    }

    fn take_standby(&mut self, address: &PeerAddress) -> Option<(Arc<dyn PeerLink>, PeerRole)> {
        let spares = self.standby.get_mut(address)?;
        let spare = spares.pop();
        if spares.is_empty() {
            self.standby.remove(address);
        }
        spare
    }

    fn drop_standby(&mut self, address: &PeerAddress, link_id: LinkId) {
        if let Some(spares) = self.standby.get_mut(address) {
            spares.retain(|(l, _)| l.id() != link_id);
            if spares.is_empty() {
                self.standby.remove(address);
            }
        }
    }

    // ── Inbound bytes ─────────────────────────────────────────────────────────

    async fn on_received(&mut self, from: PeerAddress, bytes: &[u8]) {
        let message = match decode_message(bytes) {
            Ok(m) => m,
            Err(e) => {
                debug!("dropping frame from {from}: {e}");
                return;
            }
        };
        if message.sender_id() == self.own_id {
            debug!("dropping own echo from {from}");
            return;
        }
        debug!("{:?} from {} via {from}", message.kind(), message.sender_id());
        self.emit(NodeEvent::MessageReceived { from, message }).await;
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn set_state(&self, state: ConnectState) {
        self.state_tx.send_replace(state);
    }

    async fn emit(&self, event: NodeEvent) {
        if self.app_tx.send(event).await.is_err() {
            debug!("application event receiver dropped");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
