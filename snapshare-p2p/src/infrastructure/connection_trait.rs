use crate::domain::{HostCandidate, ServiceType};
use crate::infrastructure::error::Result;
use async_trait::async_trait;
use snapshare_core::PeerIdentity;

/// Reliable, ordered, message-oriented link to one remote peer.
///
/// Implemented by the TCP and in-memory transports; tests wrap it to inject
/// faults.
#[async_trait]
pub trait PeerConnection: Send + 'static {
    /// Resolves once the transport confirms the link is usable
    async fn establish(&mut self) -> Result<()>;

    /// Split into independently owned halves for the writer and reader tasks
    fn split(self: Box<Self>) -> (Box<dyn FrameWriter>, Box<dyn FrameReader>);
}

/// Sending half of a [`PeerConnection`]
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Flush and close; the remote reader sees end of stream
    async fn close(&mut self);
}

/// Receiving half of a [`PeerConnection`]
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Next whole frame, or `None` once the remote side closed cleanly
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// A remote peer together with the connection that reaches it
pub struct PeerOffer {
    pub identity: PeerIdentity,
    pub connection: Box<dyn PeerConnection>,
}

impl std::fmt::Debug for PeerOffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerOffer")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Running advertisement; dropping it stops advertising
#[async_trait]
pub trait Advertisement: Send {
    /// Next peer that asked to join, or `None` once advertising ended
    async fn accept(&mut self) -> Option<PeerOffer>;

    /// Where joiners can reach this host, when the backend has an address
    fn address(&self) -> Option<String> {
        None
    }
}

/// Running search for hosts; dropping it stops browsing
#[async_trait]
pub trait HostBrowser: Send {
    /// Next newly seen host, or `None` when no more can be found
    async fn next_host(&mut self) -> Option<HostCandidate>;
}

/// Nearby-peer discovery mechanism used by the discovery facade
#[async_trait]
pub trait DiscoveryBackend: Send + Sync + 'static {
    async fn advertise(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
    ) -> Result<Box<dyn Advertisement>>;

    async fn browse(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
    ) -> Result<Box<dyn HostBrowser>>;

    /// Ask `host` to let `local` join; yields the host's side of the link
    async fn connect(
        &self,
        service: &ServiceType,
        local: &PeerIdentity,
        host: &HostCandidate,
    ) -> Result<PeerOffer>;
}
