//! Wire format of the hub's websocket protocol.
//!
//! Client requests carry a numeric `id` that the matching `result` frame
//! echoes; the auth message is the only one without.

use serde::{Deserialize, Serialize};

use automoli_domain::entity_id::EntityId;
use automoli_domain::event::EventType;
use automoli_domain::service::{Service, ServiceCall, ServiceData};

/// The handshake reply carrying the access token.
#[derive(Debug, Serialize)]
pub struct AuthMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    #[must_use]
    pub fn new(access_token: &'a str) -> Self {
        Self {
            kind: "auth",
            access_token,
        }
    }
}

/// `target` object of a `call_service` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub entity_id: EntityId,
}

/// A request sent to the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    SubscribeEvents {
        event_type: EventType,
    },
    CallService {
        domain: String,
        service: Service,
        #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
        service_data: ServiceData,
        target: Target,
    },
    GetStates,
    Ping,
}

impl From<ServiceCall> for Request {
    fn from(call: ServiceCall) -> Self {
        Self::CallService {
            domain: call.domain,
            service: call.service,
            service_data: call.service_data,
            target: Target {
                entity_id: call.target,
            },
        }
    }
}

/// A request together with its correlation id.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub request: &'a Request,
}

/// A frame received from the hub, classified by its `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    /// The event payload is decoded separately so that one odd event does
    /// not take the connection down.
    Event {
        #[serde(default)]
        id: u64,
        event: serde_json::Value,
    },
    Result(ResultMsg),
    #[serde(other)]
    Other,
}

impl Inbound {
    /// The wire name of this frame's `type`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequired { .. } => "auth_required",
            Self::AuthOk { .. } => "auth_ok",
            Self::AuthInvalid { .. } => "auth_invalid",
            Self::Event { .. } => "event",
            Self::Result(_) => "result",
            Self::Other => "other",
        }
    }
}

/// The answer to a request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultMsg {
    pub id: u64,
    pub success: bool,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

/// Error details of a failed request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorInfo {
    #[serde(default)]
    pub code: serde_json::Value,
    #[serde(default)]
    pub message: String,
}

impl ErrorInfo {
    /// The error code as text, whether the hub sent a string or a number.
    #[must_use]
    pub fn code_text(&self) -> String {
        match &self.code {
            serde_json::Value::String(code) => code.clone(),
            serde_json::Value::Null => "unknown".to_string(),
            other => other.to_string(),
        }
    }
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns the JSON error for frames that are not valid protocol messages.
pub fn decode(text: &str) -> Result<Inbound, serde_json::Error> {
    serde_json::from_str(text)
}

/// Encode a request with its id.
///
/// # Errors
///
/// Returns the JSON error if the request cannot be serialized.
pub fn encode(id: u64, request: &Request) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope { id, request })
}
