//! Call-related error types.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use wccore::media::DeviceError;
use wccore::{CallId, MessageKey, ProtocolError};

use super::state::InvalidTransition;
use super::traits::ErrorNotice;

/// A fallible step of one peer's negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    CreateConnection,
    AttachMedia,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddCandidate,
}

impl NegotiationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateConnection => "create peer connection",
            Self::AttachMedia => "add local stream",
            Self::CreateOffer => "create offer",
            Self::CreateAnswer => "create answer",
            Self::SetLocalDescription => "set local description",
            Self::SetRemoteDescription => "set remote description",
            Self::AddCandidate => "add candidate",
        }
    }
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error classes, each with its own treatment by the failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transport,
    Negotiation,
    Device,
    Protocol,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("failed to subscribe to call {call_id}: {source}")]
    Subscribe {
        call_id: CallId,
        source: anyhow::Error,
    },

    #[error("failed to subscribe to updates of user {user_id}: {source}")]
    SubscribeUser {
        user_id: String,
        source: anyhow::Error,
    },

    #[error("failed to send {kind} for call {call_id}: {source}")]
    Publish {
        kind: &'static str,
        call_id: CallId,
        source: anyhow::Error,
    },

    #[error("failed to {step} for {peer}: {source}")]
    Negotiation {
        step: NegotiationStep,
        peer: String,
        source: anyhow::Error,
    },

    #[error("invalid {kind} received from {peer}: {source}")]
    Description {
        kind: &'static str,
        peer: String,
        source: ProtocolError,
    },

    #[error("negotiation with {peer} still pending after {after:?}")]
    NegotiationTimeout { peer: String, after: Duration },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("local media is not available")]
    MediaUnavailable,

    #[error("malformed signaling message: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected {kind} from {peer} in state {phase}")]
    Unexpected {
        kind: &'static str,
        peer: String,
        phase: &'static str,
    },

    #[error("{kind} received for unknown peer {peer}")]
    UnknownPeer { kind: &'static str, peer: String },

    #[error("{kind} addressed to {target}")]
    Misaddressed { kind: &'static str, target: String },

    #[error("invalid peer state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("peer {0} is closed")]
    Closed(String),
}

impl CallError {
    pub fn negotiation(step: NegotiationStep, peer: &str, source: anyhow::Error) -> Self {
        Self::Negotiation {
            step,
            peer: peer.to_string(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Subscribe { .. } | Self::SubscribeUser { .. } | Self::Publish { .. } => {
                ErrorClass::Transport
            }
            Self::Negotiation { .. } | Self::Description { .. } | Self::NegotiationTimeout { .. } => {
                ErrorClass::Negotiation
            }
            Self::Device(_) | Self::MediaUnavailable => ErrorClass::Device,
            Self::Protocol(_)
            | Self::Unexpected { .. }
            | Self::UnknownPeer { .. }
            | Self::Misaddressed { .. }
            | Self::InvalidTransition(_)
            | Self::Closed(_) => ErrorClass::Protocol,
        }
    }

    /// Errors that are a consequence of an earlier, already handled one.
    pub fn is_consequential(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::MediaUnavailable)
    }

    /// What the user sees for this error.
    pub fn notice(&self) -> ErrorNotice {
        match self {
            Self::Subscribe { .. } => ErrorNotice {
                title: MessageKey::ErrorStartingCall,
                message: vec![
                    MessageKey::ErrorSubscribeCall,
                    MessageKey::RefreshTryAgainContactAdmin,
                ],
                detail: None,
            },
            Self::SubscribeUser { .. } => ErrorNotice {
                title: MessageKey::ErrorStartingCall,
                message: vec![
                    MessageKey::ErrorSubscribeUser,
                    MessageKey::RefreshTryAgainContactAdmin,
                ],
                detail: None,
            },
            Self::Negotiation {
                step: NegotiationStep::CreateConnection,
                source,
                ..
            } => ErrorNotice {
                title: MessageKey::ErrorStartingCall,
                message: vec![
                    MessageKey::ConnectionFailed,
                    MessageKey::RefreshTryAgainContactAdmin,
                ],
                detail: Some(source.to_string()),
            },
            Self::Device(device) => ErrorNotice {
                title: device.title_key(),
                message: device.message_keys(),
                detail: match device {
                    DeviceError::NoAudioInput { .. } | DeviceError::PermissionDenied(_) => None,
                    other => Some(other.to_string()),
                },
            },
            other => ErrorNotice {
                title: MessageKey::ErrorStartingConnection,
                message: Vec::new(),
                detail: Some(other.to_string()),
            },
        }
    }
}
