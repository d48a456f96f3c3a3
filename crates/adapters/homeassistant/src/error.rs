//! Home Assistant adapter error types.

use std::time::Duration;

use automoli_domain::error::{AutomoliError, ValidationError};
use tokio_tungstenite::tungstenite;

/// Errors specific to the hub connection.
///
/// All of them end (or prevent) a connection epoch and are handled by the
/// reconnect loop; only service-call failures reach the automation core.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The websocket transport failed.
    #[error("websocket transport error")]
    Transport(#[source] Box<tungstenite::Error>),

    /// Dial plus handshake, or snapshot plus resubscription, did not finish
    /// in time.
    #[error("timed out connecting to hub after {0:?}")]
    Timeout(Duration),

    /// The hub rejected the access token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The hub sent an unexpected message during the handshake.
    #[error("unexpected handshake message {got:?}, expected {expected:?}")]
    HandshakeProtocol { expected: &'static str, got: String },

    /// The connection was closed by the peer or torn down locally.
    #[error("connection closed")]
    ConnectionClosed,

    /// No connection is currently established.
    #[error("not connected to hub")]
    NotConnected,

    /// No frame was received for longer than the watchdog allows.
    #[error("no frame received for {0:?}")]
    Stale(Duration),

    /// A frame could not be decoded.
    #[error("failed to decode hub frame")]
    Decode(#[source] serde_json::Error),

    /// A request could not be encoded.
    #[error("failed to encode request")]
    Encode(#[source] serde_json::Error),

    /// The state snapshot was empty.
    #[error("no states received from hub")]
    NoStatesReceived,

    /// The hub answered a request with `success: false`.
    #[error("hub call failed: {code}: {message}")]
    CallFailed { code: String, message: String },

    /// The connection configuration is invalid.
    #[error("invalid configuration")]
    Validation(#[from] ValidationError),
}

impl HubError {
    /// Convert into an [`AutomoliError`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> AutomoliError {
        match self {
            Self::Validation(err) => AutomoliError::Validation(err),
            other => AutomoliError::Hub(Box::new(other)),
        }
    }
}

impl From<HubError> for AutomoliError {
    fn from(err: HubError) -> Self {
        err.into_domain()
    }
}

impl From<tungstenite::Error> for HubError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::ConnectionClosed
            }
            other => Self::Transport(Box::new(other)),
        }
    }
}
