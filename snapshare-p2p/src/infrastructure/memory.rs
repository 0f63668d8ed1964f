//! In-process transport and discovery.
//!
//! `MemoryConnection` pairs behave like a reliable ordered socket and
//! `LocalNeighborhood` plays the part of the local network, so whole sessions
//! can run inside one process.

use crate::domain::{HostCandidate, ServiceType};
use crate::infrastructure::connection_trait::{
    Advertisement, DiscoveryBackend, FrameReader, FrameWriter, HostBrowser, PeerConnection,
    PeerOffer,
};
use crate::infrastructure::error::{P2PError, Result};
use async_trait::async_trait;
use snapshare_core::{PeerId, PeerIdentity};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

const ADDRESS_PREFIX: &str = "local:";

/// One end of an in-process duplex link
#[derive(Debug)]
pub struct MemoryConnection {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryConnection {
    /// Two connected ends; frames written to one are read from the other
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: a_tx,
                inbound: a_rx,
            },
            Self {
                outbound: b_tx,
                inbound: b_rx,
            },
        )
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    async fn establish(&mut self) -> Result<()> {
        // the other end is gone before it ever confirmed
        if self.outbound.is_closed() {
            return Err(P2PError::ConnectionClosed);
        }
        Ok(())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>) {
        let MemoryConnection { outbound, inbound } = *self;
        (
            Box::new(MemoryWriter {
                outbound: Some(outbound),
            }),
            Box::new(MemoryReader { inbound }),
        )
    }
}

struct MemoryWriter {
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(P2PError::ConnectionClosed)?;
        outbound
            .send(frame.to_vec())
            .map_err(|_| P2PError::ConnectionClosed)
    }

    async fn close(&mut self) {
        self.outbound = None;
    }
}

struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.inbound.recv().await)
    }
}

struct LocalAdvert {
    id: u64,
    service: ServiceType,
    host: PeerIdentity,
    joins: mpsc::UnboundedSender<PeerOffer>,
}

struct NeighborhoodInner {
    adverts: Mutex<Vec<LocalAdvert>>,
    changes: watch::Sender<u64>,
    next_id: AtomicU64,
}

impl NeighborhoodInner {
    fn adverts(&self) -> MutexGuard<'_, Vec<LocalAdvert>> {
        self.adverts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

/// Shared in-process "network" that hosts advertise on and browsers search.
///
/// Clone it into every session that should see the others.
#[derive(Clone)]
pub struct LocalNeighborhood {
    inner: Arc<NeighborhoodInner>,
}

impl std::fmt::Debug for LocalNeighborhood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNeighborhood")
            .field("advertised_hosts", &self.advertised_hosts())
            .finish()
    }
}

impl Default for LocalNeighborhood {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNeighborhood {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(NeighborhoodInner {
                adverts: Mutex::new(Vec::new()),
                changes,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of hosts currently advertising any service
    pub fn advertised_hosts(&self) -> usize {
        self.inner.adverts().len()
    }
}

#[async_trait]
impl DiscoveryBackend for LocalNeighborhood {
    async fn advertise(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
    ) -> Result<Box<dyn Advertisement>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (joins, offers) = mpsc::unbounded_channel();

        self.inner.adverts().push(LocalAdvert {
            id,
            service: service.clone(),
            host: local.clone(),
            joins,
        });
        self.inner.notify();

        tracing::debug!("📣 {} advertising {} locally", local, service);

        Ok(Box::new(LocalAdvertisement {
            id,
            neighborhood: self.inner.clone(),
            offers,
        }))
    }

    async fn browse(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
    ) -> Result<Box<dyn HostBrowser>> {
        Ok(Box::new(LocalBrowser {
            neighborhood: self.inner.clone(),
            service: service.clone(),
            local: local.id(),
            seen: HashSet::new(),
            changes: self.inner.changes.subscribe(),
        }))
    }

    async fn connect(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
        host: &HostCandidate,
    ) -> Result<PeerOffer> {
        let id = host
            .address
            .strip_prefix(ADDRESS_PREFIX)
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| P2PError::ConnectionFailed(format!("bad address {}", host.address)))?;

        let adverts = self.inner.adverts();
        let advert = adverts
            .iter()
            .find(|advert| advert.id == id && &advert.service == service)
            .ok_or_else(|| {
                P2PError::ConnectionFailed(format!("{} is no longer advertising", host.identity))
            })?;

        let (host_end, joiner_end) = MemoryConnection::pair();
        advert
            .joins
            .send(PeerOffer {
                identity: local.clone(),
                connection: Box::new(host_end),
            })
            .map_err(|_| {
                P2PError::ConnectionFailed(format!("{} stopped accepting", host.identity))
            })?;

        Ok(PeerOffer {
            identity: advert.host.clone(),
            connection: Box::new(joiner_end),
        })
    }
}

struct LocalAdvertisement {
    id: u64,
    neighborhood: Arc<NeighborhoodInner>,
    offers: mpsc::UnboundedReceiver<PeerOffer>,
}

#[async_trait]
impl Advertisement for LocalAdvertisement {
    async fn accept(&mut self) -> Option<PeerOffer> {
        self.offers.recv().await
    }
}

impl Drop for LocalAdvertisement {
    fn drop(&mut self) {
        self.neighborhood
            .adverts()
            .retain(|advert| advert.id != self.id);
        self.neighborhood.notify();
    }
}

struct LocalBrowser {
    neighborhood: Arc<NeighborhoodInner>,
    service: ServiceType,
    local: PeerId,
    seen: HashSet<u64>,
    changes: watch::Receiver<u64>,
}

impl LocalBrowser {
    fn unseen_host(&mut self) -> Option<HostCandidate> {
        let adverts = self.neighborhood.adverts();
        let advert = adverts.iter().find(|advert| {
            advert.service == self.service
                && advert.host.id() != self.local
                && !self.seen.contains(&advert.id)
        })?;

        self.seen.insert(advert.id);
        Some(HostCandidate {
            identity: advert.host.clone(),
            address: format!("{ADDRESS_PREFIX}{}", advert.id),
        })
    }
}

#[async_trait]
impl HostBrowser for LocalBrowser {
    async fn next_host(&mut self) -> Option<HostCandidate> {
        loop {
            self.changes.borrow_and_update();
            if let Some(candidate) = self.unseen_host() {
                return Some(candidate);
            }
            if self.changes.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer(name: &str) -> PeerIdentity {
        PeerIdentity::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = MemoryConnection::pair();
        let (mut writer, _a_reader) = Box::new(a).split();
        let (_b_writer, mut reader) = Box::new(b).split();

        writer.write_frame(b"one").await.unwrap();
        writer.write_frame(b"two").await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(reader.read_frame().await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_close_ends_remote_stream() {
        let (a, b) = MemoryConnection::pair();
        let (mut writer, _a_reader) = Box::new(a).split();
        let (_b_writer, mut reader) = Box::new(b).split();

        writer.write_frame(b"last").await.unwrap();
        writer.close().await;

        assert_eq!(reader.read_frame().await.unwrap(), Some(b"last".to_vec()));
        assert_eq!(reader.read_frame().await.unwrap(), None);
        assert!(writer.write_frame(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_establish_fails_when_remote_dropped() {
        let (mut a, b) = MemoryConnection::pair();
        drop(b);
        assert!(matches!(
            a.establish().await,
            Err(P2PError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_browse_finds_other_hosts_only() {
        let neighborhood = LocalNeighborhood::new();
        let service = ServiceType::default();
        let host = peer("Host");
        let joiner = peer("Joiner");

        let _own = neighborhood.advertise(&service, &joiner).await.unwrap();
        let _other_service = neighborhood
            .advertise(&ServiceType::parse("other").unwrap(), &peer("Elsewhere"))
            .await
            .unwrap();
        let _advert = neighborhood.advertise(&service, &host).await.unwrap();

        let mut browser = neighborhood.browse(&service, &joiner).await.unwrap();
        let found = browser.next_host().await.unwrap();
        assert_eq!(found.identity, host);

        // nothing else to find
        let more = tokio::time::timeout(Duration::from_millis(50), browser.next_host()).await;
        assert!(more.is_err());
    }

    #[tokio::test]
    async fn test_browser_sees_late_advert() {
        let neighborhood = LocalNeighborhood::new();
        let service = ServiceType::default();
        let mut browser = neighborhood.browse(&service, &peer("Joiner")).await.unwrap();

        let host = peer("Host");
        let advertiser = neighborhood.clone();
        let advertised = host.clone();
        let handle = tokio::spawn(async move {
            advertiser
                .advertise(&ServiceType::default(), &advertised)
                .await
                .unwrap()
        });

        let found = browser.next_host().await.unwrap();
        assert_eq!(found.identity, host);
        drop(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_hands_offer_to_host() {
        let neighborhood = LocalNeighborhood::new();
        let service = ServiceType::default();
        let host = peer("Host");
        let joiner = peer("Joiner");

        let mut advert = neighborhood.advertise(&service, &host).await.unwrap();
        let mut browser = neighborhood.browse(&service, &joiner).await.unwrap();
        let candidate = browser.next_host().await.unwrap();

        let joined = neighborhood
            .connect(&service, &joiner, &candidate)
            .await
            .unwrap();
        assert_eq!(joined.identity, host);

        let offer = advert.accept().await.unwrap();
        assert_eq!(offer.identity, joiner);

        let (mut writer, _) = joined.connection.split();
        let (_, mut reader) = offer.connection.split();
        writer.write_frame(b"hi").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), Some(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn test_dropped_advert_is_withdrawn() {
        let neighborhood = LocalNeighborhood::new();
        let service = ServiceType::default();
        let advert = neighborhood.advertise(&service, &peer("Host")).await.unwrap();
        let mut browser = neighborhood.browse(&service, &peer("Joiner")).await.unwrap();
        let candidate = browser.next_host().await.unwrap();

        drop(advert);
        assert_eq!(neighborhood.advertised_hosts(), 0);

        let result = neighborhood
            .connect(&service, &peer("Joiner"), &candidate)
            .await;
        assert!(matches!(result, Err(P2PError::ConnectionFailed(_))));
    }
}
