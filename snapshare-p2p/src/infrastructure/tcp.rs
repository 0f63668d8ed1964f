//! TCP transport and discovery.
//!
//! Every frame on the socket is a 4-byte big-endian length followed by that
//! many bytes. The first frame in each direction is a JSON `Hello` naming the
//! service, the peer and what the connection is for; after that the socket
//! carries session frames untouched.

use crate::domain::{HostCandidate, ServiceType};
use crate::infrastructure::connection_trait::{
    Advertisement, DiscoveryBackend, FrameReader, FrameWriter, HostBrowser, PeerConnection,
    PeerOffer,
};
use crate::infrastructure::error::{P2PError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snapshare_core::{PeerId, PeerIdentity};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Port hosts listen on unless configured otherwise
pub const DEFAULT_PORT: u16 = 47_365;

/// Largest frame accepted in either direction
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_SIZE: usize = 4;
const MAX_HELLO_LEN: usize = 4 * 1024;
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, frame: &[u8], max_len: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if frame.len() > max_len {
        return Err(P2PError::FrameTooLarge {
            len: frame.len(),
            max: max_len,
        });
    }
    let len = frame.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame; `None` on a clean end of stream
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    // end of stream is only clean on a frame boundary
    let filled = reader.read(&mut len_buf).await?;
    if filled == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[filled..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(P2PError::FrameTooLarge { len, max: max_len });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum HelloIntent {
    /// Browser asking who is there; closed right after the reply
    Lookup,
    /// Joiner asking to become a session peer
    Join,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Hello {
    service: String,
    peer_id: PeerId,
    display_name: String,
    intent: HelloIntent,
}

impl Hello {
    fn new(service: &ServiceType, local: &PeerIdentity, intent: HelloIntent) -> Self {
        Self {
            service: service.to_string(),
            peer_id: local.id(),
            display_name: local.display_name().to_string(),
            intent,
        }
    }

    fn identity(&self) -> Result<PeerIdentity> {
        Ok(PeerIdentity::with_id(self.peer_id, &self.display_name)?)
    }
}

async fn send_hello(stream: &mut TcpStream, hello: &Hello) -> Result<()> {
    let bytes = serde_json::to_vec(hello)?;
    write_frame(stream, &bytes, MAX_HELLO_LEN).await
}

async fn receive_hello(stream: &mut TcpStream, service: &ServiceType) -> Result<Hello> {
    let bytes = read_frame(stream, MAX_HELLO_LEN)
        .await?
        .ok_or_else(|| P2PError::Handshake("connection closed during handshake".to_string()))?;
    let hello: Hello = serde_json::from_slice(&bytes)?;
    if hello.service != service.as_str() {
        return Err(P2PError::Handshake(format!(
            "expected service {}, peer speaks {}",
            service, hello.service
        )));
    }
    Ok(hello)
}

/// Session link over an already greeted TCP stream
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    max_frame_len: usize,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, max_frame_len: usize) -> Self {
        Self {
            stream,
            max_frame_len,
        }
    }
}

#[async_trait]
impl PeerConnection for TcpConnection {
    async fn establish(&mut self) -> Result<()> {
        self.stream.set_nodelay(true)?;
        // fails with NotConnected if the remote already hung up
        self.stream.peer_addr()?;
        Ok(())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>) {
        let (read, write) = self.stream.into_split();
        (
            Box::new(TcpFrameWriter {
                half: write,
                max_frame_len: self.max_frame_len,
            }),
            Box::new(TcpFrameReader {
                half: read,
                max_frame_len: self.max_frame_len,
            }),
        )
    }
}

struct TcpFrameWriter {
    half: OwnedWriteHalf,
    max_frame_len: usize,
}

#[async_trait]
impl FrameWriter for TcpFrameWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        write_frame(&mut self.half, frame, self.max_frame_len).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.half.shutdown().await {
            tracing::debug!("TCP shutdown failed: {}", e);
        }
    }
}

struct TcpFrameReader {
    half: OwnedReadHalf,
    max_frame_len: usize,
}

#[async_trait]
impl FrameReader for TcpFrameReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        read_frame(&mut self.half, self.max_frame_len).await
    }
}

/// Discovery over plain TCP.
///
/// Hosts listen on `listen`; browsers query a configured list of host
/// addresses and report the ones that answer for the same service.
#[derive(Debug, Clone)]
pub struct TcpDiscovery {
    listen: SocketAddr,
    hosts: Vec<SocketAddr>,
    max_frame_len: usize,
    handshake_timeout: Duration,
}

impl TcpDiscovery {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            hosts: Vec::new(),
            max_frame_len: MAX_FRAME_LEN,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Addresses queried while browsing
    pub fn with_hosts(mut self, hosts: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.hosts.extend(hosts);
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    async fn lookup(
        &self,
        addr: SocketAddr,
        service: &ServiceType,
        local: &PeerIdentity,
    ) -> Result<PeerIdentity> {
        let mut stream = TcpStream::connect(addr).await?;
        send_hello(&mut stream, &Hello::new(service, local, HelloIntent::Lookup)).await?;
        receive_hello(&mut stream, service).await?.identity()
    }

    async fn join(
        &self,
        addr: SocketAddr,
        service: &ServiceType,
        local: &PeerIdentity,
        host: &PeerIdentity,
    ) -> Result<PeerOffer> {
        let mut stream = TcpStream::connect(addr).await?;
        send_hello(&mut stream, &Hello::new(service, local, HelloIntent::Join)).await?;
        let identity = receive_hello(&mut stream, service).await?.identity()?;
        if identity.id() != host.id() {
            return Err(P2PError::Handshake(format!(
                "{} now answers as {}",
                addr, identity
            )));
        }

        Ok(PeerOffer {
            identity,
            connection: Box::new(TcpConnection::new(stream, self.max_frame_len)),
        })
    }
}

#[async_trait]
impl DiscoveryBackend for TcpDiscovery {
    async fn advertise(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
    ) -> Result<Box<dyn Advertisement>> {
        let listener = TcpListener::bind(self.listen).await?;
        let address = listener.local_addr()?;
        tracing::info!("📣 Advertising {} on {}", service, address);

        let (offers_tx, offers) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            service.clone(),
            local.clone(),
            self.max_frame_len,
            self.handshake_timeout,
            offers_tx,
        ));

        Ok(Box::new(TcpAdvertisement {
            address,
            offers,
            accept_task,
        }))
    }

    async fn browse(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
    ) -> Result<Box<dyn HostBrowser>> {
        Ok(Box::new(TcpBrowser {
            discovery: self.clone(),
            service: service.clone(),
            local: local.clone(),
            pending: self.hosts.iter().copied().collect(),
        }))
    }

    async fn connect(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
        host: &HostCandidate,
    ) -> Result<PeerOffer> {
        let addr: SocketAddr = host
            .address
            .parse()
            .map_err(|_| P2PError::ConnectionFailed(format!("bad address {}", host.address)))?;

        tokio::time::timeout(
            self.handshake_timeout,
            self.join(addr, service, local, &host.identity),
        )
        .await
        .map_err(|_| P2PError::ConnectionFailed(format!("{} did not answer in time", addr)))?
    }
}

async fn accept_loop(
    listener: TcpListener,
    service: ServiceType,
    local: PeerIdentity,
    max_frame_len: usize,
    handshake_timeout: Duration,
    offers: mpsc::UnboundedSender<PeerOffer>,
) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Stopped accepting connections: {}", e);
                break;
            }
        };

        let service = service.clone();
        let local = local.clone();
        let offers = offers.clone();
        tokio::spawn(async move {
            let greeting = tokio::time::timeout(
                handshake_timeout,
                greet(stream, &service, &local, max_frame_len),
            )
            .await;

            match greeting {
                Ok(Ok(Some(offer))) => {
                    tracing::debug!("{} asked to join from {}", offer.identity, remote_addr);
                    let _ = offers.send(offer);
                }
                Ok(Ok(None)) => tracing::trace!("Answered lookup from {}", remote_addr),
                Ok(Err(e)) => tracing::debug!("Handshake with {} failed: {}", remote_addr, e),
                Err(_) => tracing::debug!("Handshake with {} timed out", remote_addr),
            }
        });
    }
}

/// Answer the remote hello; joins become offers, lookups are closed
async fn greet(
    mut stream: TcpStream,
    service: &ServiceType,
    local: &PeerIdentity,
    max_frame_len: usize,
) -> Result<Option<PeerOffer>> {
    let hello = receive_hello(&mut stream, service).await?;
    let remote = hello.identity()?;
    send_hello(&mut stream, &Hello::new(service, local, hello.intent)).await?;

    match hello.intent {
        HelloIntent::Lookup => Ok(None),
        HelloIntent::Join => Ok(Some(PeerOffer {
            identity: remote,
            connection: Box::new(TcpConnection::new(stream, max_frame_len)),
        })),
    }
}

struct TcpAdvertisement {
    address: SocketAddr,
    offers: mpsc::UnboundedReceiver<PeerOffer>,
    accept_task: JoinHandle<()>,
}

#[async_trait]
impl Advertisement for TcpAdvertisement {
    async fn accept(&mut self) -> Option<PeerOffer> {
        self.offers.recv().await
    }

    fn address(&self) -> Option<String> {
        Some(self.address.to_string())
    }
}

impl Drop for TcpAdvertisement {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

struct TcpBrowser {
    discovery: TcpDiscovery,
    service: ServiceType,
    local: PeerIdentity,
    pending: VecDeque<SocketAddr>,
}

#[async_trait]
impl HostBrowser for TcpBrowser {
    async fn next_host(&mut self) -> Option<HostCandidate> {
        while let Some(addr) = self.pending.pop_front() {
            let lookup = tokio::time::timeout(
                self.discovery.handshake_timeout,
                self.discovery.lookup(addr, &self.service, &self.local),
            )
            .await;

            match lookup {
                Ok(Ok(identity)) if identity.id() == self.local.id() => {}
                Ok(Ok(identity)) => {
                    tracing::debug!("🔍 Found {} at {}", identity, addr);
                    return Some(HostCandidate {
                        identity,
                        address: addr.to_string(),
                    });
                }
                Ok(Err(e)) => tracing::debug!("No host at {}: {}", addr, e),
                Err(_) => tracing::debug!("Lookup of {} timed out", addr),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello", MAX_FRAME_LEN).await.unwrap();
        write_frame(&mut a, b"", MAX_FRAME_LEN).await.unwrap();
        drop(a);

        assert_eq!(
            read_frame(&mut b, MAX_FRAME_LEN).await.unwrap(),
            Some(b"hello".to_vec())
        );
        assert_eq!(
            read_frame(&mut b, MAX_FRAME_LEN).await.unwrap(),
            Some(Vec::new())
        );
        assert_eq!(read_frame(&mut b, MAX_FRAME_LEN).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"abc", MAX_FRAME_LEN).await.unwrap();

        let mut raw = [0u8; 7];
        b.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_oversized_frames_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        assert!(matches!(
            write_frame(&mut a, &[0u8; 9], 8).await,
            Err(P2PError::FrameTooLarge { len: 9, max: 8 })
        ));

        a.write_all(&100u32.to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, 8).await,
            Err(P2PError::FrameTooLarge { len: 100, max: 8 })
        ));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0]).await.unwrap();
        drop(a);
        assert!(matches!(
            read_frame(&mut b, MAX_FRAME_LEN).await,
            Err(P2PError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
        ));

        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0, 0, 5, b'h', b'i']).await.unwrap();
        drop(a);
        assert!(matches!(
            read_frame(&mut b, MAX_FRAME_LEN).await,
            Err(P2PError::Io(_))
        ));
    }

    fn loopback() -> TcpDiscovery {
        TcpDiscovery::new(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    #[tokio::test]
    async fn test_lookup_join_and_exchange() {
        let service = ServiceType::default();
        let host = PeerIdentity::new("Host").unwrap();
        let joiner = PeerIdentity::new("Joiner").unwrap();

        let mut advert = loopback().advertise(&service, &host).await.unwrap();
        let addr: SocketAddr = advert.address().unwrap().parse().unwrap();

        let discovery = loopback().with_hosts([addr]);
        let mut browser = discovery.browse(&service, &joiner).await.unwrap();
        let candidate = browser.next_host().await.unwrap();
        assert_eq!(candidate.identity, host);
        assert!(browser.next_host().await.is_none());

        let joined = discovery.connect(&service, &joiner, &candidate).await.unwrap();
        assert_eq!(joined.identity, host);
        let offer = advert.accept().await.unwrap();
        assert_eq!(offer.identity, joiner);

        let mut joiner_conn = joined.connection;
        joiner_conn.establish().await.unwrap();
        let (mut writer, _joiner_reader) = joiner_conn.split();
        let (_host_writer, mut reader) = offer.connection.split();

        writer.write_frame(b"textMessage;Joiner;hi").await.unwrap();
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Some(b"textMessage;Joiner;hi".to_vec())
        );

        writer.close().await;
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_browse_skips_other_services() {
        let host = PeerIdentity::new("Host").unwrap();
        let advert = loopback()
            .advertise(&ServiceType::parse("other").unwrap(), &host)
            .await
            .unwrap();
        let addr: SocketAddr = advert.address().unwrap().parse().unwrap();

        let joiner = PeerIdentity::new("Joiner").unwrap();
        let mut browser = loopback()
            .with_hosts([addr])
            .browse(&ServiceType::default(), &joiner)
            .await
            .unwrap();
        assert!(browser.next_host().await.is_none());
    }
}
