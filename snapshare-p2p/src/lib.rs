//! Peer sessions for SnapShare: connection lifecycle, fan-out messaging,
//! ordered event delivery and nearby-peer discovery.

// Domain layer
pub mod domain;

// Application layer (use cases)
pub mod application;

// Infrastructure layer (adapters)
pub mod infrastructure;

// Re-exports for convenience
pub use application::{
    Browser, DiscoveryFacade, EventDispatcher, EventHandler, EventSubscription, SessionConfig,
    SessionManager,
};
pub use domain::{HostCandidate, ServiceType, ServiceTypeError, SessionEvent, DEFAULT_SERVICE_TYPE};
pub use infrastructure::error::{P2PError, Result};
pub use infrastructure::{
    DiscoveryBackend, LocalNeighborhood, MemoryConnection, PeerConnection, PeerOffer,
    TcpDiscovery,
};
