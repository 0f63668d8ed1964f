use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest display name, in bytes of UTF-8, that a peer may advertise.
pub const MAX_DISPLAY_NAME_LEN: usize = 63;

/// Domain entity: Unique identifier for a peer in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }

    /// Parse from the hyphenated UUID form
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| IdentityError::InvalidPeerId(s.to_string()))
    }

    /// First eight hex digits, used in log lines and file names
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PeerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Errors that can occur when building a peer identity
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IdentityError {
    #[error("Display name cannot be empty")]
    EmptyName,

    #[error("Display name must be at most {max} bytes, got {len}")]
    NameTooLong { len: usize, max: usize },

    #[error("Invalid peer ID: {0}")]
    InvalidPeerId(String),
}

/// Stable identity of a device taking part in a session.
///
/// Created once per device and never mutated; two identities are equal only
/// when both the id and the display name match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    id: PeerId,
    display_name: String,
}

impl PeerIdentity {
    /// Create an identity with a freshly generated id
    pub fn new(display_name: impl Into<String>) -> Result<Self, IdentityError> {
        Self::with_id(PeerId::new(), display_name)
    }

    /// Create an identity for a known id (e.g. learned from a handshake)
    pub fn with_id(id: PeerId, display_name: impl Into<String>) -> Result<Self, IdentityError> {
        let display_name = display_name.into();
        Self::validate_name(&display_name)?;
        Ok(Self { id, display_name })
    }

    fn validate_name(name: &str) -> Result<(), IdentityError> {
        if name.trim().is_empty() {
            return Err(IdentityError::EmptyName);
        }
        if name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(IdentityError::NameTooLong {
                len: name.len(),
                max: MAX_DISPLAY_NAME_LEN,
            });
        }
        Ok(())
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id.short())
    }
}
