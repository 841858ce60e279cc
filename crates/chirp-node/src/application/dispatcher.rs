//! BroadcastDispatcher: fans one outgoing command out to every reachable peer.
//!
//! # Mesh mode
//!
//! Every `Connected` peer in the [`PeerRegistry`] receives the frame through
//! its own send handle.  For a peer that connected to us the handle is the
//! server-side notify to that subscriber; for a peer we connected to it is a
//! write to the remote characteristic.  Delivery is best-effort per peer: one
//! failed send is logged and counted, the remaining peers are still tried, and
//! nobody is evicted.  Only an explicit disconnect removes a peer.
//!
//! # Broadcast mode
//!
//! A single datagram goes to the transport's broadcast address.  Its outcome
//! is returned to the caller, which plays the error tone on failure.

use std::sync::Arc;
use std::time::Duration;

use chirp_core::{encode_bounded, Message, PeerAddress};
use tracing::{debug, warn};

use crate::application::registry::PeerRegistry;
use crate::application::transport::{SendFailure, Transport, TransportMode};

/// Default upper bound for a single per-peer send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers (or broadcast datagrams) a delivery was attempted to.
    pub attempted: usize,
    /// Attempts that completed.
    pub delivered: usize,
    /// Peers whose send failed.  They stay registered.
    pub failed: Vec<PeerAddress>,
}

impl BroadcastReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delivers commands to every reachable peer over the configured transport.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    transport: Arc<dyn Transport>,
    registry: PeerRegistry,
    send_timeout: Duration,
}

impl BroadcastDispatcher {
    pub fn new(transport: Arc<dyn Transport>, registry: PeerRegistry) -> Self {
        Self {
            transport,
            registry,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Overrides the per-peer send timeout.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Sends `msg` to every reachable peer.
    ///
    /// # Errors
    ///
    /// Only in broadcast mode: returns the [`SendFailure`] of the single
    /// datagram.  Mesh-mode failures are reported per peer in the
    /// [`BroadcastReport`] instead.
    pub async fn broadcast(&self, msg: &Message) -> Result<BroadcastReport, SendFailure> {
        let frame = encode_bounded(msg, self.transport.max_frame_len());
        match self.transport.mode() {
            TransportMode::Mesh => Ok(self.fan_out(&frame).await),
            TransportMode::Broadcast => {
                self.transport.broadcast(&frame).await?;
                debug!("broadcast {} bytes", frame.len());
                Ok(BroadcastReport {
                    attempted: 1,
                    delivered: 1,
                    failed: Vec::new(),
                })
            }
        }
    }

    async fn fan_out(&self, frame: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let send_timeout = self.send_timeout;

        for peer in self.registry.snapshot().await {
            report.attempted += 1;
            let outcome = tokio::time::timeout(send_timeout, peer.link.send(frame)).await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!("send to {} failed: {e}", peer.address);
                    report.failed.push(peer.address);
                }
                Err(_) => {
                    warn!("send to {} timed out after {send_timeout:?}", peer.address);
                    report.failed.push(peer.address);
                }
            }
        }

        debug!(
            "fan-out: {}/{} peers reached",
            report.delivered, report.attempted
        );
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
