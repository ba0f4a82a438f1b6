//! The socket seam.
//!
//! The client never touches a socket directly; it drives a [`Transport`],
//! which owns reconnection. [`ReconnectingSocket`] is the
//! `tokio-tungstenite` implementation; tests use
//! [`crate::testing::MemoryTransport`].

mod socket;

pub use socket::ReconnectingSocket;

use tokio::sync::{mpsc, watch};

use crate::error::Result;

/// Lifecycle state of the underlying socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// No connection has been attempted yet.
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// The socket is open.
    Open,
    /// A close was requested and is in progress.
    Closing,
    /// The socket is closed (and, unless reconnecting, will stay closed).
    Closed,
}

/// Something that happened on the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket (re)opened.
    Open,
    /// The socket closed.
    Close {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// A non-fatal socket error.
    Error {
        /// Error description.
        message: String,
    },
    /// A text frame.
    Message(String),
}

/// A persistent, self-reconnecting text socket.
///
/// All methods are synchronous: none of them may suspend, so callers can
/// use them while holding session locks.
pub trait Transport: Send + Sync + 'static {
    /// Watch the socket's ready state.
    fn ready_state(&self) -> watch::Receiver<ReadyState>;

    /// Check credentials and build the connection URL.
    ///
    /// Fails when the URL cannot be built (e.g. no CSRF token).
    fn build_url(&self) -> Result<String>;

    /// Begin connecting. A no-op while connecting or open.
    fn connect(&self);

    /// Route all subsequent events to a new channel.
    ///
    /// Any previous subscriber stops receiving events; its channel closes.
    fn watch_events(&self) -> mpsc::Receiver<TransportEvent>;

    /// Write a text frame.
    fn send_text(&self, text: String) -> Result<()>;

    /// Close the socket and stop reconnecting.
    fn close(&self);
}
