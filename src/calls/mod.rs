//! Multi-party call engine over a publish/subscribe signaling channel.
//!
//! # Architecture
//!
//! - [`CallSession`]: one call page. Routes inbound messages, owns the peers
//!   and drives join, hang-up and teardown.
//! - [`PeerNegotiator`]: the offer/answer and candidate exchange with one
//!   remote participant.
//! - [`NegotiationGate`]: holds candidates until the descriptions settled.
//! - [`LocalMediaGate`]: the single local capture shared by every peer.
//! - [`FailurePolicy`]: logs, shows and tears down on failure.
//!
//! Host integration happens through the traits in [`traits`].
//!
//! # Protocol Overview
//!
//! Every participant publishes `hello` to all on join. Whoever receives a
//! hello attaches media to a fresh peer, which makes the connection ask for
//! negotiation; that side sends the offer. Candidates from both sides are
//! held until the answer is applied (offerer) or delivered (answerer).

mod error;
mod gate;
mod media;
mod peer;
mod policy;
mod session;
mod state;
pub mod traits;

#[cfg(test)]
mod protocol_tests;

pub use error::{CallError, ErrorClass, NegotiationStep};
pub use gate::{GateState, NegotiationGate};
pub use media::{LocalMediaGate, MediaState};
pub use peer::PeerNegotiator;
pub use policy::{FailurePolicy, PolicyAction, new_reference};
pub use session::{CallSession, SessionContext, SessionSignal, SessionState, TeardownReason};
pub use state::{InvalidTransition, PeerPhase, PeerRole, PeerState, PeerTransition};
pub use traits::{
    CallRegistry, CallView, Collaborators, ErrorNotice, IceConnectionState, MediaDevices,
    MediaStream, MediaTrack, PeerConnection, PeerConnectionFactory, PeerEvent, PreferenceStore,
    SignalingChannel, Subscription, SubscriptionHandle, Tone, UserUpdates,
};
