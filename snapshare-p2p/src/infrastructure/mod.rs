pub mod connection_trait;
pub mod error;
pub mod memory;
pub mod tcp;

pub use connection_trait::{
    Advertisement, DiscoveryBackend, FrameReader, FrameWriter, HostBrowser, PeerConnection,
    PeerOffer,
};
pub use memory::{LocalNeighborhood, MemoryConnection};
pub use tcp::{TcpConnection, TcpDiscovery};
