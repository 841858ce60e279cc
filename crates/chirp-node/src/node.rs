//! Node bring-up: wires one transport, the registry, the scheduler, the
//! connection manager, the dispatcher and the chat session into running tasks.
//!
//! ```text
//! Node::start()
//!  ├─ Transport::start()          -- radio events → mpsc
//!  ├─ DiscoveryScheduler::spawn() -- mesh mode only
//!  ├─ ConnectionManager::run()    -- accept / connect / disconnect
//!  └─ session task                -- keys, typed lines, NodeEvents → ChatSession
//! ```
//!
//! Anything that fails while bringing the node up is an [`InitFailure`]; the
//! binary answers it by starting the node again after a back-off.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chirp_core::DeviceIdentity;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::audio::AudioTrigger;
use crate::application::chat::{ChatSession, DisplaySink, KeyEvent};
use crate::application::connection_manager::{
    ConnectState, ConnectionManager, NodeEvent, DEFAULT_CONNECT_TIMEOUT,
};
use crate::application::discovery::{DiscoveryConfig, DiscoveryScheduler};
use crate::application::dispatcher::{BroadcastDispatcher, DEFAULT_SEND_TIMEOUT};
use crate::application::registry::PeerRegistry;
use crate::application::transport::{Transport, TransportError, TransportEvent, TransportMode};
use crate::infrastructure::audio::{AudioInitError, SampleLibrary};
use crate::infrastructure::storage::config::{AppConfig, AudioConfig};
use crate::infrastructure::transport::{LanBroadcastTransport, LanMeshConfig, LanMeshTransport};

/// Capacity of the transport event channel.
const TRANSPORT_EVENT_CAPACITY: usize = 128;

/// Capacity of the key and line input channels.
const INPUT_CAPACITY: usize = 64;

/// How often the session task re-checks the running flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// The node could not be brought up.
#[derive(Debug, Error)]
pub enum InitFailure {
    #[error("asset storage at {path} failed: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: AudioInitError,
    },
    #[error("radio failed to start: {0}")]
    Radio(#[from] TransportError),
}

/// Everything a node needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub identity: DeviceIdentity,
    pub discovery: DiscoveryConfig,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
}

impl NodeSettings {
    /// Default timing with the given identity.
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            discovery: DiscoveryConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Settings from the loaded config; a fresh identity is drawn every call.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            identity: DeviceIdentity::generate(config.node.display_name.as_deref()),
            discovery: config.radio.discovery(),
            connect_timeout: config.radio.connect_timeout(),
            send_timeout: config.radio.send_timeout(),
        }
    }
}

/// Opens the sample directory named in the `[audio]` section.
pub fn open_audio(config: &AudioConfig) -> Result<SampleLibrary, InitFailure> {
    SampleLibrary::open(&config.asset_dir, config.volume).map_err(|source| InitFailure::Storage {
        path: config.asset_dir.clone(),
        source,
    })
}

/// Binds the LAN transport for the configured mode.
pub async fn bind_transport(config: &AppConfig) -> Result<Arc<dyn Transport>, InitFailure> {
    let transport: Arc<dyn Transport> = match config.node.mode {
        TransportMode::Mesh => {
            let lan = LanMeshConfig::from_radio(&config.radio)?;
            Arc::new(LanMeshTransport::bind(lan).await?)
        }
        TransportMode::Broadcast => Arc::new(LanBroadcastTransport::from_radio(&config.radio).await?),
    };
    Ok(transport)
}

/// A running node.
pub struct Node;

impl Node {
    /// Starts the transport and every node task.
    ///
    /// # Errors
    ///
    /// Returns [`InitFailure::Radio`] if the transport refuses to start.
    pub async fn start(
        settings: NodeSettings,
        transport: Arc<dyn Transport>,
        audio: Arc<dyn AudioTrigger>,
        display: Arc<dyn DisplaySink>,
    ) -> Result<NodeHandle, InitFailure> {
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(TRANSPORT_EVENT_CAPACITY);
        transport.start(event_tx).await?;

        let running = Arc::new(AtomicBool::new(true));
        let registry = PeerRegistry::new();
        let identity = settings.identity.clone();
        let mut tasks = Vec::new();

        // Broadcast mode never connects, so nothing feeds the pending slot.
        let pending = match transport.mode() {
            TransportMode::Mesh => {
                let (scheduler, pending) = DiscoveryScheduler::new(
                    settings.discovery.clone(),
                    transport.clone(),
                    registry.clone(),
                );
                tasks.push(scheduler.spawn(running.clone()));
                pending
            }
            TransportMode::Broadcast => watch::channel(None).1,
        };

        let (manager, node_events) = ConnectionManager::new(
            identity.numeric_id(),
            transport.clone(),
            registry.clone(),
            audio.clone(),
            pending,
        );
        let manager = manager.with_connect_timeout(settings.connect_timeout);
        let connect_state = manager.state_watch();
        tasks.push(tokio::spawn(manager.run(event_rx, running.clone())));

        let dispatcher = BroadcastDispatcher::new(transport.clone(), registry.clone())
            .with_send_timeout(settings.send_timeout);
        let session = ChatSession::new(identity.clone(), dispatcher, registry.clone(), audio, display);
        let (key_tx, key_rx) = mpsc::channel(INPUT_CAPACITY);
        let (line_tx, line_rx) = mpsc::channel(INPUT_CAPACITY);
        tasks.push(tokio::spawn(run_session(
            session,
            key_rx,
            line_rx,
            node_events,
            running.clone(),
        )));

        info!(
            "node #{} ({}) up on {} in {} mode",
            identity.numeric_id(),
            identity.display_name(),
            transport.local_address(),
            transport.mode()
        );

        Ok(NodeHandle {
            identity,
            transport,
            registry,
            connect_state,
            keys: key_tx,
            lines: line_tx,
            running,
            tasks,
        })
    }
}

async fn run_session(
    mut session: ChatSession,
    mut keys: mpsc::Receiver<KeyEvent>,
    mut lines: mpsc::Receiver<String>,
    mut node_events: mpsc::Receiver<NodeEvent>,
    running: Arc<AtomicBool>,
) {
    let mut events_open = true;
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            Some(key) = keys.recv() => session.handle_key(key).await,
            Some(line) = lines.recv() => {
                session.submit_line(&line).await;
            }
            ev = node_events.recv(), if events_open => match ev {
                Some(ev) => session.handle_node_event(ev).await,
                None => {
                    debug!("node event channel closed");
                    events_open = false;
                }
            },
            _ = tokio::time::sleep(SHUTDOWN_POLL) => {}
        }
    }
    debug!("session task stopped");
}

/// Handle to a started node.  Dropping it without [`NodeHandle::shutdown`]
/// clears the running flag and aborts every task.
pub struct NodeHandle {
    identity: DeviceIdentity,
    transport: Arc<dyn Transport>,
    registry: PeerRegistry,
    connect_state: watch::Receiver<ConnectState>,
    keys: mpsc::Sender<KeyEvent>,
    lines: mpsc::Sender<String>,
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn connect_state(&self) -> ConnectState {
        self.connect_state.borrow().clone()
    }

    /// Sender for raw key presses, e.g. for the stdin reader.
    pub fn key_sender(&self) -> mpsc::Sender<KeyEvent> {
        self.keys.clone()
    }

    /// The running flag shared by every node task.
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub async fn press(&self, key: KeyEvent) {
        if self.keys.send(key).await.is_err() {
            debug!("session gone, key dropped");
        }
    }

    /// Submits a whole line as if it had been typed and flushed with Enter.
    pub async fn submit_line(&self, line: impl Into<String>) {
        if self.lines.send(line.into()).await.is_err() {
            debug!("session gone, line dropped");
        }
    }

    /// Stops every task and waits for them.
    pub async fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        for task in std::mem::take(&mut self.tasks) {
            let abort = task.abort_handle();
            // The scheduler may be parked on a long interval tick.
            if tokio::time::timeout(SHUTDOWN_POLL * 3, task).await.is_err() {
                debug!("node task did not stop in time, aborting");
                abort.abort();
            }
        }
        info!("node #{} stopped", self.identity.numeric_id());
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
