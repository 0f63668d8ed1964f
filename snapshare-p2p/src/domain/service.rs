use snapshare_core::PeerIdentity;
use std::fmt;
use std::str::FromStr;

/// Service type used when none is configured
pub const DEFAULT_SERVICE_TYPE: &str = "ic-selfieshare";

const MAX_SERVICE_TYPE_LEN: usize = 15;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ServiceTypeError {
    #[error("Service type must be 1 to {max} characters, got {len}")]
    Length { len: usize, max: usize },

    #[error("Service type contains {0:?}; only lowercase ASCII letters, digits and '-' are allowed")]
    InvalidCharacter(char),

    #[error("Service type must not start or end with '-' or contain '--'")]
    MisplacedHyphen,
}

/// Name under which hosts advertise and browsers search.
///
/// Follows the DNS-SD service name rules: 1-15 characters of lowercase ASCII
/// letters, digits and hyphens, with no leading, trailing or doubled hyphen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceType(String);

impl ServiceType {
    pub fn parse(s: &str) -> Result<Self, ServiceTypeError> {
        if s.is_empty() || s.len() > MAX_SERVICE_TYPE_LEN {
            return Err(ServiceTypeError::Length {
                len: s.len(),
                max: MAX_SERVICE_TYPE_LEN,
            });
        }

        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(ServiceTypeError::InvalidCharacter(c));
        }

        if s.starts_with('-') || s.ends_with('-') || s.contains("--") {
            return Err(ServiceTypeError::MisplacedHyphen);
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServiceType {
    fn default() -> Self {
        Self(DEFAULT_SERVICE_TYPE.to_string())
    }
}

impl FromStr for ServiceType {
    type Err = ServiceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host seen while browsing for a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCandidate {
    pub identity: PeerIdentity,
    /// Backend-specific address used to connect to the host
    pub address: String,
}

impl fmt::Display for HostCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.identity, self.address)
    }
}
