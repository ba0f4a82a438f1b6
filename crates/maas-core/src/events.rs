//! Events produced by the client and the envelope observers receive.
//!
//! Every event has a string type mirroring the store action the UI layer
//! reduces over, e.g. `status/websocketConnected`, `config/updateNotify`
//! or `machine/fetchSuccess`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::action::OutboundAction;
use crate::errors::ErrorPayload;
use crate::protocol::NotifyFrame;

/// Connect requested by the application.
pub const WEBSOCKET_CONNECT: &str = "status/websocketConnect";
/// Disconnect requested by the application.
pub const WEBSOCKET_DISCONNECT: &str = "status/websocketDisconnect";
/// The socket opened.
pub const WEBSOCKET_CONNECTED: &str = "status/websocketConnected";
/// The socket closed.
pub const WEBSOCKET_DISCONNECTED: &str = "status/websocketDisconnected";
/// A transport or setup error.
pub const WEBSOCKET_ERROR: &str = "status/websocketError";

/// Suffix of the event emitted before an action's requests are sent.
pub const START_SUFFIX: &str = "Start";
/// Suffix of the event carrying a successful result.
pub const SUCCESS_SUFFIX: &str = "Success";
/// Suffix of the event carrying an error.
pub const ERROR_SUFFIX: &str = "Error";
/// Suffix of the event emitted when a paginated fetch has no more pages.
pub const COMPLETE_SUFFIX: &str = "Complete";
/// Suffix of push notification events.
pub const NOTIFY_SUFFIX: &str = "Notify";

/// A state change produced by the client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// `status/websocketConnected`.
    Connected,
    /// `status/websocketDisconnected`.
    Disconnected,
    /// `status/websocketError`.
    WebsocketError {
        /// Error description.
        message: String,
    },
    /// `<name>/<action>Notify`.
    Notify(NotifyFrame),
    /// `<type>Start`.
    Start {
        /// Originating action type.
        action_type: String,
        /// Params or payload of the action.
        item: Value,
    },
    /// `<type>Success`.
    Success {
        /// Originating action type.
        action_type: String,
        /// Params or payload of the action.
        item: Value,
        /// Result; `Null` when delivered through the file context.
        payload: Value,
    },
    /// `<type>Error`.
    Error {
        /// Originating action type.
        action_type: String,
        /// Params or payload of the action.
        item: Value,
        /// Decoded or raw error.
        error: ErrorPayload,
    },
    /// `<type>Complete`.
    Complete {
        /// Originating action type.
        action_type: String,
    },
}

impl ClientEvent {
    /// The event's type string.
    pub fn event_type(&self) -> String {
        match self {
            Self::Connected => WEBSOCKET_CONNECTED.to_owned(),
            Self::Disconnected => WEBSOCKET_DISCONNECTED.to_owned(),
            Self::WebsocketError { .. } => WEBSOCKET_ERROR.to_owned(),
            Self::Notify(frame) => format!("{}/{}{NOTIFY_SUFFIX}", frame.name, frame.action),
            Self::Start { action_type, .. } => format!("{action_type}{START_SUFFIX}"),
            Self::Success { action_type, .. } => format!("{action_type}{SUCCESS_SUFFIX}"),
            Self::Error { action_type, .. } => format!("{action_type}{ERROR_SUFFIX}"),
            Self::Complete { action_type } => format!("{action_type}{COMPLETE_SUFFIX}"),
        }
    }

    /// Whether this event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::WebsocketError { .. } | Self::Error { .. })
    }

    /// Store-action JSON shape: `{type, payload?, error?, meta?: {item}}`.
    pub fn to_json(&self) -> Value {
        let kind = self.event_type();
        match self {
            Self::Connected | Self::Disconnected => json!({ "type": kind }),
            Self::Complete { .. } => json!({ "type": kind }),
            Self::WebsocketError { message } => {
                json!({ "type": kind, "error": true, "payload": message })
            }
            Self::Notify(frame) => json!({ "type": kind, "payload": frame.data }),
            Self::Start { item, .. } => json!({ "type": kind, "meta": { "item": item } }),
            Self::Success { item, payload, .. } => {
                json!({ "type": kind, "meta": { "item": item }, "payload": payload })
            }
            Self::Error { item, error, .. } => json!({
                "type": kind,
                "meta": { "item": item },
                "error": true,
                "payload": error.to_value(),
            }),
        }
    }
}

/// An application action with no RPC metadata, routed to message handlers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomAction {
    /// Action type.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Arbitrary payload.
    #[serde(default)]
    pub payload: Value,
}

impl CustomAction {
    /// Create a custom action.
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }
}

/// Everything dispatched through the client, in dispatch order.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    /// A client-produced event.
    Event(ClientEvent),
    /// An outbound RPC action (from the application, a batch continuation, or a chained action).
    Action(OutboundAction),
    /// An application action handled by a registered message handler.
    Custom(CustomAction),
}

impl Dispatch {
    /// The type string of the dispatched item.
    pub fn action_type(&self) -> String {
        match self {
            Self::Event(event) => event.event_type(),
            Self::Action(action) => action.action_type.clone(),
            Self::Custom(custom) => custom.action_type.clone(),
        }
    }

    /// The event, if this is one.
    pub fn as_event(&self) -> Option<&ClientEvent> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }
}

impl From<ClientEvent> for Dispatch {
    fn from(event: ClientEvent) -> Self {
        Self::Event(event)
    }
}

impl From<OutboundAction> for Dispatch {
    fn from(action: OutboundAction) -> Self {
        Self::Action(action)
    }
}

impl From<CustomAction> for Dispatch {
    fn from(action: CustomAction) -> Self {
        Self::Custom(action)
    }
}
