//! # maas-core
//!
//! Shared vocabulary for the MAAS websocket RPC client.
//!
//! - **IDs**: [`RequestId`] for wire correlation, [`EpochId`] for connection epochs
//! - **Protocol**: request, response and notify frames as they appear on the socket
//! - **Actions**: [`OutboundAction`] with typed parameters and execution metadata
//! - **Events**: [`ClientEvent`] and the [`Dispatch`] envelope fed to observers
//! - **Errors**: [`ErrorPayload`], the best-effort parse of server error strings
//! - **Retry**: reconnect backoff math
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod action;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod retry;

pub use action::{ActionMeta, OutboundAction, ParamMap, Params};
pub use errors::ErrorPayload;
pub use events::{ClientEvent, CustomAction, Dispatch};
pub use ids::{EpochId, RequestId};
pub use protocol::{InboundFrame, MessageType, NotifyFrame, RequestFrame, RequestMessage, ResponseFrame};
