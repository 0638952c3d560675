//! Voice bridge server
//!
//! Accepts telephony media-stream websockets, resolves each call's stream id
//! and runs one voice pipeline per call.

pub mod handshake;
pub mod http;
pub mod metrics;
pub mod providers;
pub mod serializer;
pub mod session;
pub mod state;
pub mod transport;
pub mod websocket;

pub use handshake::{decode_lenient, find_stream_sid, resolve_from_messages, resolve_stream_id};
pub use http::create_router;
pub use metrics::init_metrics;
pub use providers::Providers;
pub use serializer::{InboundEvent, TwilioFrameSerializer};
pub use session::{Session, SessionManager, SessionState};
pub use state::AppState;
pub use transport::WebSocketSink;

use thiserror::Error;
use voice_bridge_core::HandshakeError;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Session limit of {0} reached")]
    Capacity(usize),

    #[error("Provider setup failed: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Handshake(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Session(_) => axum::http::StatusCode::CONFLICT,
            ServerError::Capacity(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Provider(_) | ServerError::Config(_) | ServerError::Internal(_) => {
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ServerError> for voice_bridge_core::Error {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Handshake(e) => voice_bridge_core::Error::Handshake(e),
            ServerError::Config(msg) => voice_bridge_core::Error::Config(msg),
            other => voice_bridge_core::Error::Transport(other.to_string()),
        }
    }
}
