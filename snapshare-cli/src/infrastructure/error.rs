use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session error: {0}")]
    Session(#[from] snapshare_p2p::P2PError),

    #[error("Invalid display name: {0}")]
    InvalidName(#[from] snapshare_core::IdentityError),

    #[error("Invalid service type: {0}")]
    InvalidService(#[from] snapshare_p2p::ServiceTypeError),

    #[error("Could not read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not save image to {path}: {source}")]
    SaveImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No host answered on {0}")]
    NoHostFound(String),

    #[error("Host #{pick} not found, only {found} host(s) answered")]
    NoSuchHost { pick: usize, found: usize },

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown command: {0} (try /help)")]
    UnknownCommand(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
