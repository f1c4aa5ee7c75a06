use thiserror::Error;

use crate::message::SdpType;

/// Errors raised while decoding or encoding signaling traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("signaling message carries no payload")]
    MissingPayload,

    #[error("signaling message carries several payloads: {0}")]
    AmbiguousPayload(String),

    #[error("malformed session description: {0}")]
    SessionDescription(#[source] serde_json::Error),

    #[error("expected {expected:?} description, got {found:?}")]
    UnexpectedDescription { expected: SdpType, found: SdpType },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
