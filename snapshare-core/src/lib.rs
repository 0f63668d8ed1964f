//! Session-independent building blocks for SnapShare: peer identities, the
//! peer registry and the wire codec. Nothing in this crate performs I/O.

pub mod codec;
pub mod domain;

pub use codec::{CodecError, DecodeFailure, ImageFormat, TextFraming, WireCodec, TEXT_MARKER};
pub use domain::{
    IdentityError, Message, PeerConnectionState, PeerEntry, PeerId, PeerIdentity, PeerRegistry,
    RegistryError,
};
