use crate::domain::ServiceTypeError;
use snapshare_core::{CodecError, IdentityError, PeerId, RegistryError};

/// Errors returned by the session layer and its transports
#[derive(Debug, thiserror::Error)]
pub enum P2PError {
    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session not started")]
    NotStarted,

    #[error("Session has been left")]
    SessionClosed,

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Peer {0} is already connecting or connected")]
    DuplicatePeer(PeerId),

    #[error("Send to peer {peer} failed: {cause}")]
    TransportSendFailed { peer: PeerId, cause: String },

    #[error("Read from peer {peer} failed: {cause}")]
    TransportReadFailed { peer: PeerId, cause: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Frame of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Discovery is already {0}")]
    DiscoveryBusy(&'static str),

    #[error("Discovery cancelled")]
    DiscoveryCancelled,

    #[error(transparent)]
    InvalidServiceType(#[from] ServiceTypeError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, P2PError>;
