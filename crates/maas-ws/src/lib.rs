//! # maas-ws
//!
//! Websocket RPC client for the MAAS region API.
//!
//! - **Transport**: [`Transport`] seam with a reconnecting `tokio-tungstenite`
//!   implementation ([`ReconnectingSocket`]) and keepalive pings
//! - **Correlation**: per-epoch [`Session`] tables mapping request ids to
//!   actions, chained follow-ups, batch pages and file-context deliveries
//! - **Routing**: responses become `Start`/`Success`/`Error`/`Complete`
//!   events, notifications become `<model>/<action>Notify`
//! - **Supervisor**: [`ClientBuilder`] spawns the client; [`ClientHandle`]
//!   connects, disconnects, dispatches and observes
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = maas_settings::load_settings()?;
//! let client = maas_ws::client_from_settings(&settings);
//! let mut events = client.subscribe();
//! client.connect();
//! client.dispatch(maas_core::OutboundAction::new("machine/fetch", "machine", "list"));
//! while let Ok(item) = events.recv().await {
//!     println!("{}", item.action_type());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod batch;
pub mod chain;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod file_context;
pub mod handlers;
pub mod metrics;
mod router;
mod sender;
pub mod session;
pub mod supervisor;
pub mod testing;
pub mod transport;
pub mod url;

use std::sync::Arc;

use maas_settings::{ClientSettings, LoggingSettings};

pub use chain::NextAction;
pub use dispatcher::Dispatcher;
pub use error::{ClientError, Result};
pub use file_context::{FileContextStore, InMemoryFileContextStore};
pub use handlers::{HandlerContext, MessageHandler};
pub use session::Session;
pub use supervisor::{ClientBuilder, ClientHandle, SupervisorState};
pub use transport::{ReadyState, ReconnectingSocket, Transport, TransportEvent};
pub use url::{ConnectionTarget, build_target};

/// Build and spawn a client on a [`ReconnectingSocket`] configured from
/// `settings`. Must be called inside a tokio runtime.
pub fn client_from_settings(settings: &ClientSettings) -> ClientHandle {
    ClientBuilder::new(Arc::new(ReconnectingSocket::new(settings)))
        .event_capacity(settings.websocket.event_capacity)
        .spawn()
}

/// Install the global `tracing` subscriber described by `settings`.
///
/// `RUST_LOG` wins over `settings.level`. Later calls are no-ops.
pub fn init_logging(settings: &LoggingSettings) {
    if settings.json {
        maas_core::logging::init_json_subscriber(&settings.level);
    } else {
        maas_core::logging::init_subscriber(&settings.level);
    }
}
