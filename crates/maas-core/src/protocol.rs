//! Wire frames exchanged with the MAAS websocket API.
//!
//! All frames are JSON text. The `type` field is an integer tag:
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | 0 | request (client → server) |
//! | 1 | response (server → client, keyed by `request_id`) |
//! | 2 | notify (server push, uncorrelated) |
//! | 3 | ping (client → server) |
//! | 4 | ping reply |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::ParamMap;
use crate::ids::RequestId;

/// Integer frame tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    /// Client request.
    Request,
    /// Server response to a request.
    Response,
    /// Server push notification.
    Notify,
    /// Client keepalive.
    Ping,
    /// Server keepalive reply.
    PingReply,
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Request => 0,
            MessageType::Response => 1,
            MessageType::Notify => 2,
            MessageType::Ping => 3,
            MessageType::PingReply => 4,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::Notify),
            3 => Ok(Self::Ping),
            4 => Ok(Self::PingReply),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

/// A request body before the transport stamps it with an identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// `<model>.<method>`.
    pub method: String,
    /// Single parameter object, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ParamMap>,
}

impl RequestMessage {
    /// Build a request for `model.method`.
    pub fn new(model: &str, method: &str, params: Option<ParamMap>) -> Self {
        Self {
            method: format!("{model}.{method}"),
            params,
        }
    }
}

/// A complete outbound frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation identifier.
    pub request_id: RequestId,
    /// Always [`MessageType::Request`] or [`MessageType::Ping`].
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// `<model>.<method>`; empty for pings.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Single parameter object, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ParamMap>,
}

impl RequestFrame {
    /// Stamp a request message with its identifier.
    pub fn request(request_id: RequestId, message: RequestMessage) -> Self {
        Self {
            request_id,
            message_type: MessageType::Request,
            method: message.method,
            params: message.params,
        }
    }

    /// Build a keepalive ping.
    pub fn ping(request_id: RequestId) -> Self {
        Self {
            request_id,
            message_type: MessageType::Ping,
            method: String::new(),
            params: None,
        }
    }
}

/// Reply to a request. `result` and `error` are mutually exclusive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Echoed request identifier.
    pub request_id: RequestId,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload. Usually a JSON-encoded string, sometimes plain text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseFrame {
    /// The error payload, if the server reported one.
    ///
    /// Empty strings count as "no error".
    pub fn error(&self) -> Option<&Value> {
        match &self.error {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(other) => Some(other),
        }
    }
}

/// Unsolicited server push.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotifyFrame {
    /// Model name (e.g. `config`).
    pub name: String,
    /// Verb (e.g. `create`, `update`, `delete`).
    pub action: String,
    /// Payload.
    #[serde(default)]
    pub data: Value,
}

/// A classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// Push notification.
    Notify(NotifyFrame),
    /// Response to a prior request.
    Response(ResponseFrame),
    /// Keepalive reply.
    PingReply(Option<RequestId>),
}

impl InboundFrame {
    /// Parse a text frame.
    ///
    /// Frames tagged `NOTIFY` are notifications, `PING_REPLY` frames are
    /// keepalive replies, and everything else is treated as a response.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .and_then(|t| u8::try_from(t).ok())
            .and_then(|t| MessageType::try_from(t).ok());
        match kind {
            Some(MessageType::Notify) => Ok(Self::Notify(serde_json::from_value(value)?)),
            Some(MessageType::PingReply) => {
                let id = value
                    .get("request_id")
                    .and_then(Value::as_u64)
                    .map(RequestId::new);
                Ok(Self::PingReply(id))
            }
            _ => Ok(Self::Response(serde_json::from_value(value)?)),
        }
    }
}
