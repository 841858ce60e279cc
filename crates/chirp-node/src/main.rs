//! Chirp node entry point.
//!
//! Loads the config, brings the node up, and feeds stdin to it as key presses.
//!
//! ```text
//! main()
//!  └─ load_config()              -- --config or the platform config dir
//!  └─ loop
//!       ├─ bring_up()            -- assets, transport, Node::start
//!       │    └─ Err(InitFailure) -- log, back off, try again
//!       └─ wait for Ctrl-C, then shut the node down
//! ```
//!
//! With `--simulate <n>` the node runs on an in-process radio together with
//! `n` simulated peers whose output is tagged `[sim-N]`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chirp_core::DeviceIdentity;
use chirp_node::application::audio::AudioTrigger;
use chirp_node::application::transport::{Transport, TransportMode};
use chirp_node::infrastructure::audio::MockAudio;
use chirp_node::infrastructure::display::ConsoleDisplay;
use chirp_node::infrastructure::input::spawn_stdin_reader;
use chirp_node::infrastructure::storage::config::{load_config, AppConfig};
use chirp_node::infrastructure::transport::MemoryRadio;
use chirp_node::node::{bind_transport, open_audio, InitFailure, Node, NodeHandle, NodeSettings};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Mesh,
    Broadcast,
}

impl From<ModeArg> for TransportMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Mesh => TransportMode::Mesh,
            ModeArg::Broadcast => TransportMode::Broadcast,
        }
    }
}

/// Command-line arguments.  Each one overrides the matching config value.
#[derive(Debug, Parser)]
#[command(
    name = "chirp-node",
    about = "Handheld peer-mesh messenger node",
    version
)]
struct Cli {
    /// Path to the TOML config file.  Defaults to the platform config dir.
    #[arg(long, env = "CHIRP_CONFIG")]
    config: Option<PathBuf>,

    /// Radio deployment.
    #[arg(long, value_enum, env = "CHIRP_MODE")]
    mode: Option<ModeArg>,

    /// Name announced to peers.
    #[arg(long, env = "CHIRP_NAME")]
    name: Option<String>,

    /// Directory holding the `.wav` samples.
    #[arg(long, env = "CHIRP_ASSETS")]
    assets: Option<PathBuf>,

    /// Run on an in-process radio with this many simulated peers.
    #[arg(long, value_name = "N", env = "CHIRP_SIMULATE")]
    simulate: Option<usize>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(mode) = self.mode {
            config.node.mode = mode.into();
        }
        if let Some(name) = &self.name {
            config.node.display_name = Some(name.clone());
        }
        if let Some(assets) = &self.assets {
            config.audio.asset_dir = assets.clone();
        }
    }
}

/// A node that came up, plus whatever runs alongside it.
struct Running {
    node: NodeHandle,
    peers: Vec<NodeHandle>,
    stdin: JoinHandle<()>,
}

impl Running {
    async fn shutdown(self) {
        self.stdin.abort();
        shutdown_all(self.peers).await;
        self.node.shutdown().await;
    }
}

async fn shutdown_all(nodes: Vec<NodeHandle>) {
    for node in nodes {
        node.shutdown().await;
    }
}

async fn bring_up(
    config: &AppConfig,
    simulate: Option<usize>,
    running: &Arc<AtomicBool>,
) -> Result<Running, InitFailure> {
    let audio: Arc<dyn AudioTrigger> = Arc::new(open_audio(&config.audio)?);
    let settings = NodeSettings::from_config(config);

    let (transport, peers) = match simulate {
        Some(count) => {
            let radio = MemoryRadio::new();
            let ids = config.radio.service_ids();
            let mut peers = Vec::with_capacity(count);
            for i in 1..=count {
                let name = format!("sim-{i}");
                let transport: Arc<dyn Transport> =
                    Arc::new(radio.attach(name.as_str(), config.node.mode, ids));
                let mut peer_settings = settings.clone();
                peer_settings.identity = DeviceIdentity::generate(Some(&name));
                let started = Node::start(
                    peer_settings,
                    transport,
                    Arc::new(MockAudio::new()),
                    Arc::new(ConsoleDisplay::with_prefix(name.as_str())),
                )
                .await;
                match started {
                    Ok(peer) => peers.push(peer),
                    Err(e) => {
                        shutdown_all(peers).await;
                        return Err(e);
                    }
                }
            }
            let transport: Arc<dyn Transport> =
                Arc::new(radio.attach("local", config.node.mode, ids));
            (transport, peers)
        }
        None => (bind_transport(config).await?, Vec::new()),
    };

    let node = match Node::start(settings, transport, audio, Arc::new(ConsoleDisplay::new())).await {
        Ok(node) => node,
        Err(e) => {
            shutdown_all(peers).await;
            return Err(e);
        }
    };
    let stdin = spawn_stdin_reader(node.key_sender(), Arc::clone(running));
    Ok(Running { node, peers, stdin })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("failed to load config")?;
    cli.apply(&mut config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    info!("Chirp node starting ({} mode)", config.node.mode);

    let running = Arc::new(AtomicBool::new(true));

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::SeqCst);
        }
    });

    while running.load(Ordering::SeqCst) {
        let active = match bring_up(&config, cli.simulate, &running).await {
            Ok(active) => active,
            Err(e) => {
                error!("node failed to start: {e}; retrying in {:?}", config.node.restart_backoff());
                tokio::time::sleep(config.node.restart_backoff()).await;
                continue;
            }
        };

        info!(
            "Chirp ready as {} (#{}).  Type a line and press Enter; Ctrl-C to exit.",
            active.node.identity().display_name(),
            active.node.identity().numeric_id()
        );
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        active.shutdown().await;
    }

    info!("Chirp node stopped");
    Ok(())
}
