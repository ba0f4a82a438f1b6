//! Client error type.

use thiserror::Error;

/// Errors surfaced by the client's own machinery.
///
/// Only [`ClientError::MissingCredentials`] and [`ClientError::InvalidUrl`]
/// end a connect attempt; everything else is reported as an event.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No CSRF token is configured.
    #[error("No csrftoken found, please ensure you are logged into MAAS.")]
    MissingCredentials,
    /// The connection URL or upgrade headers could not be built.
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),
    /// The socket reported an error.
    #[error("websocket transport error: {0}")]
    Transport(String),
    /// A frame was sent while the socket was not open.
    #[error("websocket is not connected")]
    NotConnected,
    /// An internal channel closed (client shut down).
    #[error("client channel closed")]
    ChannelClosed,
    /// A request frame could not be encoded.
    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
