pub mod call;
pub mod error;
pub mod keys;
pub mod media;
pub mod message;
pub mod rtc;
pub mod update;

pub use call::{Call, CallId};
pub use error::ProtocolError;
pub use keys::MessageKey;
pub use message::{
    ALL, CandidatePayload, IceCandidate, Payload, Recipient, SdpType, SessionDescription,
    SignalingMessage,
};
