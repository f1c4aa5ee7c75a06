// Wire types and pure helpers live in the core crate
pub use wccore::{call, keys, media, message, rtc, update};

pub mod calls;
pub mod config;
pub mod provider;
pub mod sim;

pub use calls::{CallError, CallSession, Collaborators, SessionState};
pub use config::SessionConfig;
pub use provider::{CallProvider, ProviderEntry, ProviderError, ProviderRegistry, WebRtcProvider};
