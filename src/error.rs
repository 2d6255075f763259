//! Error types for the station

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Station error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or wire serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed inbound datagram
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Datagram from a host other than the session peer
    #[error("Unexpected peer: got {got}, expected {expected}")]
    PeerMismatch {
        /// Observed source address
        got: std::net::SocketAddr,
        /// The one valid peer for this session
        expected: std::net::SocketAddr,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Deploy process could not be launched
    #[error("Deploy failed: {0}")]
    Deploy(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}
