//! Recording transport doubles for unit testing.
//!
//! `MockLink` stands in for one peer's send handle and `MockTransport` for a
//! whole radio.  Neither touches a socket: every call is recorded in a
//! `Mutex<Vec<...>>` so assertions can inspect exactly what went out and in
//! what order.
//!
//! # Failure toggles
//!
//! - [`MockLink::set_failing`] makes every `send` return [`SendFailure::Io`].
//! - [`MockLink::close`] makes every `send` return [`SendFailure::LinkClosed`].
//! - [`MockTransport::set_broadcast_failing`] makes `broadcast` fail.
//! - [`MockTransport::fail_connect`] makes `connect` fail for one address.
//!
//! # Usage in tests
//!
//! ```ignore
//! let transport = Arc::new(MockTransport::new(TransportMode::Mesh));
//! let (tx, rx) = mpsc::channel(16);
//! transport.start(tx).await.unwrap();
//!
//! transport.inject(TransportEvent::Received { from, bytes }).await;
//! assert_eq!(transport.connects(), vec![PeerAddress::new("node-b")]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chirp_core::{Advertisement, PeerAddress};
use tokio::sync::mpsc;

use crate::application::transport::{
    ConnectFailure, LinkId, PeerLink, SendFailure, Transport, TransportError, TransportEvent,
    TransportMode,
};

/// Broadcast-mode send unit, also used as the mock default.
pub const DEFAULT_MOCK_FRAME_LEN: usize = 250;

// ── MockLink ──────────────────────────────────────────────────────────────────

/// A peer send handle that records every frame it accepts.
pub struct MockLink {
    id: LinkId,
    address: PeerAddress,
    sent: Mutex<Vec<Vec<u8>>>,
    attempts: AtomicUsize,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl MockLink {
    pub fn new(address: impl Into<PeerAddress>) -> Self {
        Self {
            id: LinkId::next(),
            address: address.into(),
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            failing: AtomicBool::new(false),
        }
    }

    /// Simulates the remote side dropping the link.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// When `true`, every send fails with an I/O error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Frames accepted so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of `send` calls, successful or not.
    pub fn send_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for MockLink {
    fn id(&self) -> LinkId {
        self.id
    }

    fn address(&self) -> &PeerAddress {
        &self.address
    }

    async fn send(&self, frame: &[u8]) -> Result<(), SendFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(SendFailure::LinkClosed {
                address: self.address.clone(),
            });
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SendFailure::Io {
                address: self.address.clone(),
                reason: "mock failure".into(),
            });
        }
        self.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

// ── MockTransport ─────────────────────────────────────────────────────────────

/// A transport that records calls and lets tests inject radio events.
pub struct MockTransport {
    mode: TransportMode,
    local: PeerAddress,
    max_frame_len: usize,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    scan_results: Mutex<Vec<Advertisement>>,
    scan_delay: Mutex<Duration>,
    scans: AtomicUsize,
    readvertises: AtomicUsize,
    connects: Mutex<Vec<PeerAddress>>,
    connect_failures: Mutex<HashMap<PeerAddress, ConnectFailure>>,
    connect_delay: Mutex<Duration>,
    opened: Mutex<Vec<Arc<MockLink>>>,
    broadcast_frames: Mutex<Vec<Vec<u8>>>,
    broadcast_failing: AtomicBool,
}

impl MockTransport {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            local: PeerAddress::new("mock-local"),
            max_frame_len: DEFAULT_MOCK_FRAME_LEN,
            events: Mutex::new(None),
            scan_results: Mutex::new(Vec::new()),
            scan_delay: Mutex::new(Duration::ZERO),
            scans: AtomicUsize::new(0),
            readvertises: AtomicUsize::new(0),
            connects: Mutex::new(Vec::new()),
            connect_failures: Mutex::new(HashMap::new()),
            connect_delay: Mutex::new(Duration::ZERO),
            opened: Mutex::new(Vec::new()),
            broadcast_frames: Mutex::new(Vec::new()),
            broadcast_failing: AtomicBool::new(false),
        }
    }

    pub fn with_local_address(mut self, address: impl Into<PeerAddress>) -> Self {
        self.local = address.into();
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Advertisements every subsequent scan returns.
    pub fn set_scan_results(&self, ads: Vec<Advertisement>) {
        *self.scan_results.lock().unwrap() = ads;
    }

    /// How long each scan takes before returning.
    pub fn set_scan_delay(&self, delay: Duration) {
        *self.scan_delay.lock().unwrap() = delay;
    }

    /// How long each connect takes before resolving.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// Makes every connect to `address` fail with `failure`.
    pub fn fail_connect(&self, address: impl Into<PeerAddress>, failure: ConnectFailure) {
        self.connect_failures
            .lock()
            .unwrap()
            .insert(address.into(), failure);
    }

    pub fn set_broadcast_failing(&self, failing: bool) {
        self.broadcast_failing.store(failing, Ordering::SeqCst);
    }

    /// Pushes an event as if the radio stack had raised it.
    ///
    /// Returns `false` if the transport was never started or the receiver is gone.
    pub async fn inject(&self, event: TransportEvent) -> bool {
        let tx = self.events.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn readvertise_count(&self) -> usize {
        self.readvertises.load(Ordering::SeqCst)
    }

    /// Every address `connect` was called with, in order.
    pub fn connects(&self) -> Vec<PeerAddress> {
        self.connects.lock().unwrap().clone()
    }

    /// Links handed out by successful connects.
    pub fn opened_links(&self) -> Vec<Arc<MockLink>> {
        self.opened.lock().unwrap().clone()
    }

    pub fn broadcast_frames(&self) -> Vec<Vec<u8>> {
        self.broadcast_frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn mode(&self) -> TransportMode {
        self.mode
    }

    fn local_address(&self) -> PeerAddress {
        self.local.clone()
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        let mut slot = self.events.lock().unwrap();
        if slot.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        *slot = Some(events);
        Ok(())
    }

    async fn readvertise(&self) -> Result<(), TransportError> {
        self.readvertises.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let delay = (*self.scan_delay.lock().unwrap()).min(window);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.scan_results.lock().unwrap().clone())
    }

    async fn connect(&self, address: &PeerAddress) -> Result<Arc<dyn PeerLink>, ConnectFailure> {
        if self.mode == TransportMode::Broadcast {
            return Err(ConnectFailure::Unsupported);
        }
        self.connects.lock().unwrap().push(address.clone());

        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = self.connect_failures.lock().unwrap().get(address) {
            return Err(failure.clone());
        }
        let link = Arc::new(MockLink::new(address.clone()));
        self.opened.lock().unwrap().push(link.clone());
        Ok(link)
    }

    async fn broadcast(&self, frame: &[u8]) -> Result<(), SendFailure> {
        if self.mode == TransportMode::Mesh {
            return Err(SendFailure::Unsupported(TransportMode::Mesh));
        }
        if self.broadcast_failing.load(Ordering::SeqCst) {
            return Err(SendFailure::Broadcast("mock failure".into()));
        }
        self.broadcast_frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}
