//! LanMeshTransport: mesh mode over an IP network.
//!
//! # Advertising and scanning
//!
//! Every node sends a UDP beacon to the beacon target (normally the subnet
//! broadcast address) once per `beacon_interval`, and immediately on
//! `readvertise`:
//!
//! ```text
//! CHIRP-ADV <service-uuid> <tcp-port> <instance-uuid>
//! ```
//!
//! A background task records every beacon heard.  `scan(window)` waits for
//! the window and returns the beacons heard during it.  The instance UUID is
//! fresh per process and lets a node ignore its own looped-back beacon.
//!
//! # Links
//!
//! A link is a TCP connection.  The connecting side opens with a hello line
//! naming the characteristic it wants and the port it listens on itself; the
//! acceptor answers with the same characteristic or refuses:
//!
//! ```text
//! → CHIRP-HELLO <characteristic-uuid> <listen-port>
//! ← CHIRP-OK <characteristic-uuid>        (or CHIRP-NOSVC)
//! ```
//!
//! Both sides then name the peer `ip:listen-port`, so an inbound and an
//! outbound link to the same node share one [`PeerAddress`].  After the
//! handshake every line is one frame.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chirp_core::{Advertisement, PeerAddress, ServiceIds};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::transport::{
    ConnectFailure, LinkId, PeerLink, SendFailure, Transport, TransportError, TransportEvent,
    TransportMode,
};
use crate::infrastructure::storage::config::RadioConfig;

/// Largest frame carried in one line, newline excluded.
pub const LAN_FRAME_LEN: usize = 250;

/// Pause before listening again after a socket error.
pub(crate) const RECV_RETRY_DELAY: Duration = Duration::from_millis(50);

const BEACON_TAG: &str = "CHIRP-ADV";
const HELLO_TAG: &str = "CHIRP-HELLO";
const OK_TAG: &str = "CHIRP-OK";
const REFUSE_TAG: &str = "CHIRP-NOSVC";

/// Bound on reading the handshake line on either side.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Sockets and identifiers for one mesh node.
#[derive(Debug, Clone)]
pub struct LanMeshConfig {
    pub bind_address: IpAddr,
    /// TCP port for links; `0` picks a free one.
    pub link_port: u16,
    /// UDP port beacons are received on; `0` picks a free one.
    pub beacon_port: u16,
    /// Where beacons are sent.
    pub beacon_target: SocketAddr,
    pub beacon_interval: Duration,
    pub ids: ServiceIds,
}

impl LanMeshConfig {
    /// Builds the socket settings from the `[radio]` config section.
    pub fn from_radio(radio: &RadioConfig) -> Result<Self, TransportError> {
        let bind_address = parse_ip(&radio.bind_address)?;
        let target_ip = parse_ip(&radio.broadcast_address)?;
        Ok(Self {
            bind_address,
            link_port: radio.link_port,
            beacon_port: radio.beacon_port,
            beacon_target: SocketAddr::new(target_ip, radio.beacon_port),
            beacon_interval: Duration::from_secs(1),
            ids: radio.service_ids(),
        })
    }
}

pub(crate) fn parse_ip(text: &str) -> Result<IpAddr, TransportError> {
    text.parse()
        .map_err(|_| TransportError::Unavailable(format!("invalid IP address {text:?}")))
}

// ── Wire lines ────────────────────────────────────────────────────────────────

/// A decoded advertisement beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub service: Uuid,
    pub link_port: u16,
    pub instance: Option<Uuid>,
}

pub fn format_beacon(service: &Uuid, link_port: u16, instance: &Uuid) -> String {
    format!("{BEACON_TAG} {service} {link_port} {instance}")
}

/// Parses a beacon datagram.  Returns `None` for anything else.
pub fn parse_beacon(text: &str) -> Option<Beacon> {
    let mut parts = text.split_whitespace();
    if parts.next()? != BEACON_TAG {
        return None;
    }
    let service = parts.next()?.parse().ok()?;
    let link_port = parts.next()?.parse().ok()?;
    let instance = match parts.next() {
        Some(s) => Some(s.parse().ok()?),
        None => None,
    };
    Some(Beacon {
        service,
        link_port,
        instance,
    })
}

/// Parses a hello line into the requested characteristic and listen port.
pub fn parse_hello(line: &str) -> Option<(Uuid, u16)> {
    let mut parts = line.split_whitespace();
    if parts.next()? != HELLO_TAG {
        return None;
    }
    let characteristic = parts.next()?.parse().ok()?;
    let port = parts.next()?.parse().ok()?;
    Some((characteristic, port))
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// One TCP link.  The reader task keeps a clone, so dropping every other
/// handle does not close the connection.
pub struct LanLink {
    id: LinkId,
    remote: PeerAddress,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerLink for LanLink {
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
        if frame.len() > LAN_FRAME_LEN {
            return Err(SendFailure::FrameTooLarge {
                len: frame.len(),
                max: LAN_FRAME_LEN,
            });
        }
        if frame.contains(&b'\n') {
            return Err(SendFailure::Io {
                address: self.remote.clone(),
                reason: "frame contains a line break".into(),
            });
        }

        let mut line = Vec::with_capacity(frame.len() + 1);
        line.extend_from_slice(frame);
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await.map_err(|e| {
            self.closed.store(true, Ordering::SeqCst);
            SendFailure::Io {
                address: self.remote.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Longest handshake line accepted, newline excluded.
const HANDSHAKE_LINE_LEN: usize = 128;

/// Outcome of one bounded line read.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// A line, with its terminator stripped, is in the buffer.
    Line,
    /// The stream ended before any byte of a new line.
    Eof,
    /// More than the limit arrived without a newline.
    TooLong,
}

/// Reads one newline-terminated line into `line`, refusing lines longer than
/// `limit` bytes.  At most one buffer fill past the limit is ever held.
async fn read_line_bounded<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    loop {
        let (done, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(if line.is_empty() { LineRead::Eof } else { LineRead::Line });
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    line.extend_from_slice(&available[..i]);
                    (true, i + 1)
                }
                None => {
                    line.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);
        if line.last() == Some(&b'\r') && done {
            line.pop();
        }
        if line.len() > limit {
            return Ok(LineRead::TooLong);
        }
        if done {
            return Ok(LineRead::Line);
        }
    }
}

/// Spawns the line reader for `link`; reports frames and the final close.
/// A line longer than [`LAN_FRAME_LEN`] closes the link.
fn spawn_reader(
    link: Arc<LanLink>,
    reader: BufReader<OwnedReadHalf>,
    events: mpsc::Sender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = reader;
        let mut line = Vec::with_capacity(LAN_FRAME_LEN + 2);
        loop {
            match read_line_bounded(&mut reader, &mut line, LAN_FRAME_LEN).await {
                Ok(LineRead::Eof) => break,
                Ok(LineRead::Line) => {
                    // Bytes are passed on as-is; the codec rejects bad UTF-8.
                    let event = TransportEvent::Received {
                        from: link.remote.clone(),
                        bytes: line.clone(),
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(LineRead::TooLong) => {
                    warn!("{} sent a line over {LAN_FRAME_LEN} bytes, closing", link.remote);
                    break;
                }
                Err(e) => {
                    debug!("{} read failed: {e}", link.remote);
                    break;
                }
            }
        }
        link.closed.store(true, Ordering::SeqCst);
        let _ = link.writer.lock().await.shutdown().await;
        let _ = events
            .send(TransportEvent::Disconnected {
                address: link.remote.clone(),
                link_id: link.id,
            })
            .await;
    })
}

/// Reads one handshake line within [`HANDSHAKE_TIMEOUT`].
async fn read_handshake_line(reader: &mut BufReader<OwnedReadHalf>) -> Result<String, String> {
    let mut line = Vec::new();
    let read = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        read_line_bounded(reader, &mut line, HANDSHAKE_LINE_LEN),
    )
    .await
    .map_err(|_| "handshake timed out".to_string())?
    .map_err(|e| e.to_string())?;
    match read {
        LineRead::Line => String::from_utf8(line).map_err(|_| "handshake is not text".to_string()),
        LineRead::Eof => Err("closed during handshake".into()),
        LineRead::TooLong => Err("handshake line too long".into()),
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

struct Heard {
    ad: Advertisement,
    at: Instant,
}

/// Mesh-mode transport over UDP beacons and TCP links.
pub struct LanMeshTransport {
    config: LanMeshConfig,
    instance: Uuid,
    link_port: u16,
    listener: Mutex<Option<TcpListener>>,
    beacon: Arc<UdpSocket>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    heard: Arc<Mutex<HashMap<PeerAddress, Heard>>>,
    tasks: Tasks,
}

/// Every task a transport spawned, aborted when it is dropped.
#[derive(Clone, Default)]
pub(crate) struct Tasks(Arc<Mutex<Vec<JoinHandle<()>>>>);

impl Tasks {
    pub(crate) fn push(&self, task: JoinHandle<()>) {
        let mut tasks = locked(&self.0);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    pub(crate) fn abort_all(&self) {
        for task in locked(&self.0).drain(..) {
            task.abort();
        }
    }
}

pub(crate) fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LanMeshTransport {
    /// Binds the link listener and the beacon socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if either socket cannot be bound.
    pub async fn bind(config: LanMeshConfig) -> Result<Self, TransportError> {
        let link_addr = SocketAddr::new(config.bind_address, config.link_port);
        let listener = TcpListener::bind(link_addr)
            .await
            .map_err(|source| TransportError::Bind {
                what: format!("mesh link listener {link_addr}"),
                source,
            })?;
        let link_port = listener.local_addr()?.port();

        let beacon_addr = SocketAddr::new(config.bind_address, config.beacon_port);
        let beacon = UdpSocket::bind(beacon_addr)
            .await
            .map_err(|source| TransportError::Bind {
                what: format!("beacon socket {beacon_addr}"),
                source,
            })?;
        beacon.set_broadcast(true)?;

        info!("mesh links on TCP {link_port}, beacons on UDP {}", beacon.local_addr()?);
        Ok(Self {
            config,
            instance: Uuid::new_v4(),
            link_port,
            listener: Mutex::new(Some(listener)),
            beacon: Arc::new(beacon),
            events: Mutex::new(None),
            heard: Arc::new(Mutex::new(HashMap::new())),
            tasks: Tasks::default(),
        })
    }

    /// Port the link listener is bound to.
    pub fn link_port(&self) -> u16 {
        self.link_port
    }

    /// Address the beacon socket is bound to.
    pub fn beacon_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.beacon.local_addr()?)
    }

    fn events(&self) -> Option<mpsc::Sender<TransportEvent>> {
        locked(&self.events).clone()
    }

    async fn send_beacon(&self) -> Result<(), TransportError> {
        let text = format_beacon(&self.config.ids.service, self.link_port, &self.instance);
        self.beacon
            .send_to(text.as_bytes(), self.config.beacon_target)
            .await?;
        Ok(())
    }

    fn spawn_beacon_sender(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.beacon);
        let target = self.config.beacon_target;
        let text = format_beacon(&self.config.ids.service, self.link_port, &self.instance);
        let period = self.config.beacon_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(text.as_bytes(), target).await {
                    debug!("beacon to {target} failed: {e}");
                }
            }
        })
    }

    fn spawn_beacon_listener(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.beacon);
        let heard = Arc::clone(&self.heard);
        let own = self.instance;
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (len, src) = match socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        debug!("beacon receive failed: {e}");
                        tokio::time::sleep(RECV_RETRY_DELAY).await;
                        continue;
                    }
                };
                let Some(beacon) = std::str::from_utf8(&buf[..len]).ok().and_then(parse_beacon)
                else {
                    continue;
                };
                if beacon.instance == Some(own) {
                    continue;
                }
                let address = PeerAddress::from(SocketAddr::new(src.ip(), beacon.link_port));
                let ad = Advertisement {
                    address: address.clone(),
                    services: vec![beacon.service],
                    name: None,
                };
                locked(&heard).insert(
                    address,
                    Heard {
                        ad,
                        at: Instant::now(),
                    },
                );
            }
        })
    }

    fn spawn_acceptor(
        &self,
        listener: TcpListener,
        events: mpsc::Sender<TransportEvent>,
    ) -> JoinHandle<()> {
        let characteristic = self.config.ids.characteristic;
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            loop {
                let (stream, src) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        tokio::time::sleep(RECV_RETRY_DELAY).await;
                        continue;
                    }
                };
                let events = events.clone();
                let tasks = tasks.clone();
                tokio::spawn(async move {
                    if let Err(reason) = accept_link(stream, src, characteristic, events, &tasks).await {
                        debug!("refused link from {src}: {reason}");
                    }
                });
            }
        })
    }
}

/// Server side of the handshake.  On success the link is announced as
/// `Accepted` and its reader is running.
async fn accept_link(
    stream: TcpStream,
    src: SocketAddr,
    characteristic: Uuid,
    events: mpsc::Sender<TransportEvent>,
    tasks: &Tasks,
) -> Result<(), String> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let hello = read_handshake_line(&mut reader).await?;

    let (wanted, listen_port) = parse_hello(&hello).ok_or("malformed hello")?;
    if wanted != characteristic {
        let _ = write_half.write_all(format!("{REFUSE_TAG}\n").as_bytes()).await;
        return Err(format!("asked for characteristic {wanted}"));
    }
    write_half
        .write_all(format!("{OK_TAG} {characteristic}\n").as_bytes())
        .await
        .map_err(|e| e.to_string())?;

    let link = Arc::new(LanLink {
        id: LinkId::next(),
        remote: PeerAddress::from(SocketAddr::new(src.ip(), listen_port)),
        writer: tokio::sync::Mutex::new(write_half),
        closed: AtomicBool::new(false),
    });
    events
        .send(TransportEvent::Accepted { link: link.clone() })
        .await
        .map_err(|_| "node stopped".to_string())?;
    tasks.push(spawn_reader(link, reader, events));
    Ok(())
}

impl Drop for LanMeshTransport {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}

#[async_trait]
impl Transport for LanMeshTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Mesh
    }

    fn local_address(&self) -> PeerAddress {
        PeerAddress::from(SocketAddr::new(self.config.bind_address, self.link_port))
    }

    fn max_frame_len(&self) -> usize {
        LAN_FRAME_LEN
    }

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        let listener = locked(&self.listener)
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        *locked(&self.events) = Some(events.clone());

        self.tasks.push(self.spawn_acceptor(listener, events));
        self.tasks.push(self.spawn_beacon_listener());
        self.tasks.push(self.spawn_beacon_sender());
        Ok(())
    }

    async fn readvertise(&self) -> Result<(), TransportError> {
        if self.events().is_none() {
            return Err(TransportError::NotStarted);
        }
        self.send_beacon().await
    }

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        if self.events().is_none() {
            return Err(TransportError::NotStarted);
        }
        let started = Instant::now();
        tokio::time::sleep(window).await;

        let mut heard = locked(&self.heard);
        // Forget beacons that went quiet before this scan began.
        heard.retain(|_, h| h.at >= started);
        let mut ads: Vec<Advertisement> = heard.values().map(|h| h.ad.clone()).collect();
        ads.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(ads)
    }

    async fn connect(&self, address: &PeerAddress) -> Result<Arc<dyn PeerLink>, ConnectFailure> {
        let unreachable = |reason: String| ConnectFailure::Unreachable {
            address: address.clone(),
            reason,
        };
        let events = self
            .events()
            .ok_or_else(|| unreachable("transport not started".into()))?;
        let target: SocketAddr = address
            .as_str()
            .parse()
            .map_err(|_| unreachable("not an ip:port address".into()))?;

        let stream = TcpStream::connect(target)
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let (read_half, mut write_half) = stream.into_split();
        let hello = format!(
            "{HELLO_TAG} {} {}\n",
            self.config.ids.characteristic, self.link_port
        );
        write_half
            .write_all(hello.as_bytes())
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let mut reader = BufReader::new(read_half);
        let mut reply = Vec::new();
        let read = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            read_line_bounded(&mut reader, &mut reply, HANDSHAKE_LINE_LEN),
        )
        .await
        .map_err(|_| ConnectFailure::TimedOut {
            address: address.clone(),
            timeout: HANDSHAKE_TIMEOUT,
        })?
        .map_err(|e| unreachable(e.to_string()))?;
        match read {
            LineRead::Line => {}
            LineRead::Eof => return Err(unreachable("closed during handshake".into())),
            LineRead::TooLong => return Err(unreachable("handshake line too long".into())),
        }
        let reply = String::from_utf8_lossy(&reply);

        let mut parts = reply.split_whitespace();
        let confirmed = parts.next() == Some(OK_TAG)
            && parts.next().and_then(|c| c.parse::<Uuid>().ok())
                == Some(self.config.ids.characteristic);
        if !confirmed {
            return Err(ConnectFailure::ServiceMissing {
                address: address.clone(),
            });
        }

        let link = Arc::new(LanLink {
            id: LinkId::next(),
            remote: address.clone(),
            writer: tokio::sync::Mutex::new(write_half),
            closed: AtomicBool::new(false),
        });
        self.tasks.push(spawn_reader(link.clone(), reader, events));
        Ok(link)
    }

    async fn broadcast(&self, _frame: &[u8]) -> Result<(), SendFailure> {
        Err(SendFailure::Unsupported(TransportMode::Mesh))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn loopback_config(beacon_target: SocketAddr, ids: ServiceIds) -> LanMeshConfig {
        LanMeshConfig {
            bind_address: LOOPBACK,
            link_port: 0,
            beacon_port: 0,
            beacon_target,
            beacon_interval: Duration::from_millis(50),
            ids,
        }
    }

    async fn node(ids: ServiceIds) -> (LanMeshTransport, mpsc::Receiver<TransportEvent>) {
        let sink = SocketAddr::new(LOOPBACK, 9);
        let t = LanMeshTransport::bind(loopback_config(sink, ids)).await.unwrap();
        let (tx, rx) = mpsc::channel(16);
        t.start(tx).await.unwrap();
        (t, rx)
    }

    #[test]
    fn test_beacon_round_trip() {
        let ids = ServiceIds::default();
        let instance = Uuid::new_v4();

        let text = format_beacon(&ids.service, 47801, &instance);

        assert_eq!(
            parse_beacon(&text),
            Some(Beacon {
                service: ids.service,
                link_port: 47801,
                instance: Some(instance),
            })
        );
    }

    #[test]
    fn test_beacon_without_instance_is_accepted() {
        let text = format!("CHIRP-ADV {} 47801", ServiceIds::default().service);
        assert_eq!(parse_beacon(&text).map(|b| b.instance), Some(None));
    }

    #[test]
    fn test_foreign_datagrams_are_not_beacons() {
        assert_eq!(parse_beacon("HELLO 1 2"), None);
        assert_eq!(parse_beacon("CHIRP-ADV not-a-uuid 1"), None);
        assert_eq!(parse_beacon(""), None);
    }

    #[test]
    fn test_parse_hello() {
        let ch = ServiceIds::default().characteristic;
        assert_eq!(parse_hello(&format!("CHIRP-HELLO {ch} 4000\n")), Some((ch, 4000)));
        assert_eq!(parse_hello("CHIRP-HELLO"), None);
    }

    #[tokio::test]
    async fn test_connect_handshake_and_frames_over_loopback() {
        // Arrange
        let (a, mut rx_a) = node(ServiceIds::default()).await;
        let (b, mut rx_b) = node(ServiceIds::default()).await;

        // Act
        let a_to_b = a.connect(&b.local_address()).await.unwrap();
        let b_to_a = match rx_b.recv().await.unwrap() {
            TransportEvent::Accepted { link } => link,
            other => panic!("expected accept, got {other:?}"),
        };
        a_to_b.send(b"1701:c:hi").await.unwrap();
        b_to_a.send(b"1892:c:yo").await.unwrap();

        // Assert – the acceptor names the peer by its listen port
        assert_eq!(b_to_a.address(), &a.local_address());
        match rx_b.recv().await.unwrap() {
            TransportEvent::Received { bytes, .. } => assert_eq!(bytes, b"1701:c:hi"),
            other => panic!("unexpected {other:?}"),
        }
        match rx_a.recv().await.unwrap() {
            TransportEvent::Received { from, bytes } => {
                assert_eq!(from, b.local_address());
                assert_eq!(bytes, b"1892:c:yo");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bounded_line_read() {
        let mut input: &[u8] = b"1701:c:hi\r\nshort\n0123456789abc\n";
        let mut line = Vec::new();

        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"1701:c:hi");
        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"short");
        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::TooLong);
        assert_eq!(read_line_bounded(&mut input, &mut line, 10).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn test_oversized_line_closes_link_without_delivering_it() {
        // Arrange – a raw client completes the handshake by hand
        let (a, mut rx_a) = node(ServiceIds::default()).await;
        let target: SocketAddr = a.local_address().as_str().parse().unwrap();
        let mut client = TcpStream::connect(target).await.unwrap();
        let hello = format!("{HELLO_TAG} {} 4000\n", ServiceIds::default().characteristic);
        client.write_all(hello.as_bytes()).await.unwrap();
        let accepted = match rx_a.recv().await.unwrap() {
            TransportEvent::Accepted { link } => link,
            other => panic!("expected accept, got {other:?}"),
        };

        // Act – one line far past the frame limit, with no newline for a while
        let flood = vec![b'7'; 64 * 1024];
        let _ = client.write_all(&flood).await;
        let _ = client.write_all(b"\n").await;

        // Assert
        let event = tokio::time::timeout(Duration::from_secs(2), rx_a.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TransportEvent::Disconnected { link_id, .. } => assert_eq!(link_id, accepted.id()),
            TransportEvent::Received { bytes, .. } => {
                panic!("delivered a {}-byte frame", bytes.len())
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            accepted.send(b"1701:c:hi").await,
            Err(SendFailure::LinkClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_to_foreign_characteristic_is_refused() {
        let (a, _rx_a) = node(ServiceIds::default()).await;
        let other = ServiceIds {
            characteristic: Uuid::new_v4(),
            ..ServiceIds::default()
        };
        let (b, _rx_b) = node(other).await;

        let result = a.connect(&b.local_address()).await;

        assert!(matches!(result, Err(ConnectFailure::ServiceMissing { .. })));
    }

    #[tokio::test]
    async fn test_remote_close_is_reported() {
        // Arrange
        let (a, mut rx_a) = node(ServiceIds::default()).await;
        let (b, mut rx_b) = node(ServiceIds::default()).await;
        let link = a.connect(&b.local_address()).await.unwrap();
        rx_b.recv().await.unwrap();

        // Act – b goes away entirely
        drop(rx_b);
        drop(b);

        // Assert
        let event = tokio::time::timeout(Duration::from_secs(2), rx_a.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TransportEvent::Disconnected { link_id, .. } => assert_eq!(link_id, link.id()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scan_hears_beacons() {
        // Arrange – b beacons straight at a's beacon socket
        let (a, _rx_a) = node(ServiceIds::default()).await;
        let b = LanMeshTransport::bind(loopback_config(a.beacon_addr().unwrap(), ServiceIds::default()))
            .await
            .unwrap();
        let (tx, _rx_b) = mpsc::channel(16);
        b.start(tx).await.unwrap();

        // Act
        let ads = a.scan(Duration::from_millis(300)).await.unwrap();

        // Assert
        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0].address, b.local_address());
        assert!(ads[0].advertises(&ServiceIds::default().service));
    }

    #[tokio::test]
    async fn test_scan_before_start_fails() {
        let t = LanMeshTransport::bind(loopback_config(
            SocketAddr::new(LOOPBACK, 9),
            ServiceIds::default(),
        ))
        .await
        .unwrap();

        assert!(matches!(
            t.scan(Duration::from_millis(1)).await,
            Err(TransportError::NotStarted)
        ));
    }
}
