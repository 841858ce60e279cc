//! LanBroadcastTransport: broadcast mode over UDP.
//!
//! Every frame is one datagram sent to the broadcast target.  There are no
//! links, so `connect` always fails and `scan` finds nothing.  A node hears
//! its own datagrams when the target loops back; the connection manager drops
//! those by sender id.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chirp_core::{Advertisement, PeerAddress};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::lan_mesh::{locked, parse_ip, Tasks, LAN_FRAME_LEN, RECV_RETRY_DELAY};
use crate::application::transport::{
    ConnectFailure, PeerLink, SendFailure, Transport, TransportError, TransportEvent,
    TransportMode,
};
use crate::infrastructure::storage::config::RadioConfig;

/// Connectionless transport: one UDP socket, one broadcast target.
pub struct LanBroadcastTransport {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    local: SocketAddr,
    started: Mutex<bool>,
    tasks: Tasks,
}

impl LanBroadcastTransport {
    /// Binds the datagram socket on `bind_ip:port` and enables broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the socket cannot be bound.
    pub async fn bind(bind_ip: IpAddr, port: u16, target: SocketAddr) -> Result<Self, TransportError> {
        let addr = SocketAddr::new(bind_ip, port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                what: format!("broadcast socket {addr}"),
                source,
            })?;
        socket.set_broadcast(true)?;
        let local = socket.local_addr()?;
        info!("broadcast mode on UDP {local}, sending to {target}");
        Ok(Self {
            socket: Arc::new(socket),
            target,
            local,
            started: Mutex::new(false),
            tasks: Tasks::default(),
        })
    }

    /// Binds using the `[radio]` config section.
    pub async fn from_radio(radio: &RadioConfig) -> Result<Self, TransportError> {
        let bind_ip = parse_ip(&radio.bind_address)?;
        let target_ip = parse_ip(&radio.broadcast_address)?;
        Self::bind(
            bind_ip,
            radio.broadcast_port,
            SocketAddr::new(target_ip, radio.broadcast_port),
        )
        .await
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

/// Forwards every datagram `recv` yields until the node stops listening.
async fn forward_datagrams<F, Fut>(mut recv: F, events: mpsc::Sender<TransportEvent>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(Vec<u8>, SocketAddr)>>,
{
    loop {
        match recv().await {
            Ok((bytes, src)) => {
                let event = TransportEvent::Received {
                    from: PeerAddress::from(src),
                    bytes,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                // ICMP errors surface here on some platforms; keep listening.
                debug!("broadcast receive failed: {e}");
                tokio::time::sleep(RECV_RETRY_DELAY).await;
            }
        }
    }
}

impl Drop for LanBroadcastTransport {
    fn drop(&mut self) {
        self.tasks.abort_all();
    }
}

#[async_trait]
impl Transport for LanBroadcastTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Broadcast
    }

    fn local_address(&self) -> PeerAddress {
        PeerAddress::from(self.local)
    }

    fn max_frame_len(&self) -> usize {
        LAN_FRAME_LEN
    }

    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
        {
            let mut started = locked(&self.started);
            if *started {
                return Err(TransportError::AlreadyStarted);
            }
            *started = true;
        }

        let socket = self.socket.clone();
        let recv = move || {
            let socket = socket.clone();
            async move {
                let mut buf = vec![0u8; LAN_FRAME_LEN * 2];
                let (len, src) = socket.recv_from(&mut buf).await?;
                buf.truncate(len);
                Ok((buf, src))
            }
        };
        self.tasks.push(tokio::spawn(forward_datagrams(recv, events)));
        Ok(())
    }

    async fn readvertise(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn scan(&self, _window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        Ok(Vec::new())
    }

    async fn connect(&self, _address: &PeerAddress) -> Result<Arc<dyn PeerLink>, ConnectFailure> {
        Err(ConnectFailure::Unsupported)
    }

    async fn broadcast(&self, frame: &[u8]) -> Result<(), SendFailure> {
        if frame.len() > LAN_FRAME_LEN {
            return Err(SendFailure::FrameTooLarge {
                len: frame.len(),
                max: LAN_FRAME_LEN,
            });
        }
        match self.socket.send_to(frame, self.target).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("broadcast to {} failed: {e}", self.target);
                Err(SendFailure::Broadcast(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Binds a receiver first, then a sender aimed at it.
    async fn pair() -> (LanBroadcastTransport, LanBroadcastTransport) {
        let placeholder = SocketAddr::new(LOOPBACK, 9);
        let receiver = LanBroadcastTransport::bind(LOOPBACK, 0, placeholder)
            .await
            .unwrap();
        let sender = LanBroadcastTransport::bind(LOOPBACK, 0, receiver.local_addr())
            .await
            .unwrap();
        (sender, receiver)
    }

    #[tokio::test]
    async fn test_frame_reaches_listener() {
        // Arrange
        let (sender, receiver) = pair().await;
        let (tx, mut rx) = mpsc::channel(8);
        receiver.start(tx).await.unwrap();

        // Act
        sender.broadcast(b"1701:c:hello").await.unwrap();

        // Assert
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TransportEvent::Received { from, bytes } => {
                assert_eq!(from, PeerAddress::from(sender.local_addr()));
                assert_eq!(bytes, b"1701:c:hello".to_vec());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_is_refused() {
        let (sender, _receiver) = pair().await;

        let result = sender.broadcast(&[b'x'; LAN_FRAME_LEN + 1]).await;

        assert_eq!(
            result,
            Err(SendFailure::FrameTooLarge {
                len: LAN_FRAME_LEN + 1,
                max: LAN_FRAME_LEN
            })
        );
    }

    #[tokio::test]
    async fn test_connect_and_scan_are_inert() {
        let (sender, _receiver) = pair().await;

        assert_eq!(
            sender.connect(&PeerAddress::from("10.0.0.1:1")).await.err(),
            Some(ConnectFailure::Unsupported)
        );
        assert!(sender.scan(Duration::from_millis(1)).await.unwrap().is_empty());
        assert!(sender.readvertise().await.is_ok());
    }

    #[tokio::test]
    async fn test_receive_error_backs_off_instead_of_spinning() {
        // Arrange – a socket that fails every receive at once
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let failing = move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            std::future::ready(Err::<(Vec<u8>, SocketAddr), _>(io::Error::from(
                io::ErrorKind::ConnectionReset,
            )))
        };
        let (tx, _rx) = mpsc::channel(1);
        let mut task = tokio_test::task::spawn(forward_datagrams(failing, tx));

        // Act
        let first = task.poll();

        // Assert – the loop parks on the back-off after one failure
        tokio_test::assert_pending!(first);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forwarded_datagram_names_its_sender() {
        let src = SocketAddr::new(LOOPBACK, 4000);
        let mut frames = vec![Ok((b"1701:c:hi".to_vec(), src))];
        let (tx, mut rx) = mpsc::channel(1);
        drop(tokio::spawn(forward_datagrams(
            move || std::future::ready(frames.pop().unwrap_or_else(|| Err(io::ErrorKind::Other.into()))),
            tx,
        )));

        match rx.recv().await.unwrap() {
            TransportEvent::Received { from, bytes } => {
                assert_eq!(from, PeerAddress::from(src));
                assert_eq!(bytes, b"1701:c:hi".to_vec());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_start_fails() {
        let (sender, _receiver) = pair().await;
        let (tx, _rx) = mpsc::channel(1);
        sender.start(tx.clone()).await.unwrap();

        assert!(matches!(
            sender.start(tx).await,
            Err(TransportError::AlreadyStarted)
        ));
    }
}
