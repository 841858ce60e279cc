//! DiscoveryScheduler: the periodic scan that feeds the connection manager.
//!
//! # How it works
//!
//! A single repeating task fires every `scan_interval`.  Each tick starts one
//! scan bounded by `scan_window`.  If the previous scan is still running, the
//! tick is skipped, never queued.  Every advertisement seen is filtered:
//!
//! - it must list the Chirp service identifier;
//! - it must not be this node;
//! - it must not already be in the [`PeerRegistry`].
//!
//! Survivors are written to the single-slot pending-target channel in the order
//! they were seen.  The slot keeps only the latest value, so a target the
//! connection manager has not consumed yet is overwritten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chirp_core::{PeerAddress, PendingTarget, DEFAULT_SERVICE_UUID};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::registry::PeerRegistry;
use crate::application::transport::Transport;

/// Scheduler timing and the service predicate.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub scan_interval: Duration,
    pub scan_window: Duration,
    pub service: Uuid,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(5000),
            scan_window: Duration::from_millis(1000),
            service: DEFAULT_SERVICE_UUID,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A scan was already in progress.
    Skipped,
    /// The scan ran; `published` lists the targets handed to the manager.
    Completed {
        seen: usize,
        published: Vec<PeerAddress>,
    },
    /// The transport could not scan.
    Failed(String),
}

struct Inner {
    config: DiscoveryConfig,
    transport: Arc<dyn Transport>,
    registry: PeerRegistry,
    pending_tx: watch::Sender<Option<PendingTarget>>,
    scanning: AtomicBool,
}

/// Periodic scanner.  Cloning shares the same in-progress guard.
#[derive(Clone)]
pub struct DiscoveryScheduler {
    inner: Arc<Inner>,
}

impl DiscoveryScheduler {
    /// Creates a scheduler and the receiving end of the pending-target slot.
    pub fn new(
        config: DiscoveryConfig,
        transport: Arc<dyn Transport>,
        registry: PeerRegistry,
    ) -> (Self, watch::Receiver<Option<PendingTarget>>) {
        let (pending_tx, pending_rx) = watch::channel(None);
        let scheduler = Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry,
                pending_tx,
                scanning: AtomicBool::new(false),
            }),
        };
        (scheduler, pending_rx)
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Spawns the repeating task.  It stops once `running` clears.
    pub fn spawn(&self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.config.scan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "discovery scheduler started (interval {:?}, window {:?})",
                this.inner.config.scan_interval, this.inner.config.scan_window
            );

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let scan = this.clone();
                tokio::spawn(async move {
                    if scan.tick().await == ScanOutcome::Skipped {
                        debug!("scan still in progress, tick skipped");
                    }
                });
            }

            info!("discovery scheduler stopped");
        })
    }

    /// Runs one scan unless one is already in progress.
    pub async fn tick(&self) -> ScanOutcome {
        if self.inner.scanning.swap(true, Ordering::SeqCst) {
            return ScanOutcome::Skipped;
        }
        let outcome = self.run_scan().await;
        self.inner.scanning.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_scan(&self) -> ScanOutcome {
        let inner = &self.inner;
        let ads = match inner.transport.scan(inner.config.scan_window).await {
            Ok(ads) => ads,
            Err(e) => {
                warn!("scan failed: {e}");
                return ScanOutcome::Failed(e.to_string());
            }
        };

        let local = inner.transport.local_address();
        let mut published = Vec::new();
        for ad in &ads {
            if !ad.advertises(&inner.config.service) || ad.address == local {
                continue;
            }
            if inner.registry.contains(&ad.address).await {
                continue;
            }
            let target = PendingTarget::from_advertisement(ad, &inner.config.service);
            debug!("discovered {}", target.candidate);
            published.push(target.candidate.clone());
            inner.pending_tx.send_replace(Some(target));
        }

        ScanOutcome::Completed {
            seen: ads.len(),
            published,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
