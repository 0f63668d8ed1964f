mod message;
mod peer;
mod peer_state;

pub use message::Message;
pub use peer::{IdentityError, PeerId, PeerIdentity, MAX_DISPLAY_NAME_LEN};
pub use peer_state::{PeerConnectionState, PeerEntry, PeerRegistry, RegistryError};
