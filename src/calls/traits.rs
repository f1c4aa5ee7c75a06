//! Collaborator seams consumed by the call engine.
//!
//! Nothing here is implemented by the engine itself: the signaling transport,
//! call registry, user-update feed, media devices, peer connections and the
//! view are all supplied by the host. [`crate::sim`] has in-memory versions.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wccore::media::{DeviceError, DeviceKind, MediaConstraints, MediaDeviceInfo, ScreenInfo};
use wccore::rtc::PeerConfiguration;
use wccore::update::UserUpdate;
use wccore::{CallId, IceCandidate, MessageKey, SessionDescription, SignalingMessage};

/// Handle of a live channel subscription.
pub trait SubscriptionHandle: Send + Sync {
    /// Stop delivery. Safe to call more than once.
    fn cancel(&self);
}

/// A successful subscription: the inbound message stream and its handle.
pub struct Subscription {
    pub messages: mpsc::UnboundedReceiver<SignalingMessage>,
    pub handle: Arc<dyn SubscriptionHandle>,
}

/// Publish/subscribe transport keyed by call id.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Resolves once the subscription is acknowledged.
    async fn subscribe(&self, call_id: &CallId) -> Result<Subscription, anyhow::Error>;

    /// Resolves once the channel acknowledged the message.
    async fn publish(&self, call_id: &CallId, message: SignalingMessage)
    -> Result<(), anyhow::Error>;
}

/// Remote call bookkeeping. Every call is best-effort.
#[async_trait]
pub trait CallRegistry: Send + Sync {
    async fn joined_call(&self, call_id: &CallId) -> Result<(), anyhow::Error>;
    async fn leaved_call(&self, call_id: &CallId) -> Result<(), anyhow::Error>;
    async fn delete_call(&self, call_id: &CallId) -> Result<(), anyhow::Error>;
}

/// Out-of-band events addressed to one user.
#[async_trait]
pub trait UserUpdates: Send + Sync {
    async fn subscribe_user(
        &self,
        user_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<UserUpdate>, anyhow::Error>;
}

pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> DeviceKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
}

pub trait MediaStream: Send + Sync {
    fn id(&self) -> String;
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;

    fn tracks_of(&self, kind: DeviceKind) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks()
            .into_iter()
            .filter(|track| track.kind() == kind)
            .collect()
    }

    fn stop(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// Local capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, anyhow::Error>;

    fn screen(&self) -> ScreenInfo;

    fn supports_facing_mode(&self) -> bool;

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn MediaStream>, DeviceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// States after which the remote media is gone.
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Notifications emitted by a peer connection.
#[derive(Clone)]
pub enum PeerEvent {
    NegotiationNeeded,
    /// A gathered local candidate; `None` when gathering completed.
    IceCandidate(Option<IceCandidate>),
    Track { stream: Arc<dyn MediaStream> },
    IceConnectionStateChanged(IceConnectionState),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            Self::IceCandidate(candidate) => f.debug_tuple("IceCandidate").field(candidate).finish(),
            Self::Track { stream } => f.debug_struct("Track").field("stream", &stream.id()).finish(),
            Self::IceConnectionStateChanged(state) => f
                .debug_tuple("IceConnectionStateChanged")
                .field(state)
                .finish(),
        }
    }
}

/// One point-to-point media transport session.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_stream(&self, stream: Arc<dyn MediaStream>) -> Result<(), anyhow::Error>;
    async fn create_offer(&self) -> Result<SessionDescription, anyhow::Error>;
    async fn create_answer(&self) -> Result<SessionDescription, anyhow::Error>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), anyhow::Error>;
    async fn set_remote_description(&self, desc: SessionDescription)
    -> Result<(), anyhow::Error>;
    fn local_description(&self) -> Option<SessionDescription>;
    fn remote_description(&self) -> Option<SessionDescription>;
    /// `None` signals the end of remote candidates.
    async fn add_ice_candidate(&self, candidate: Option<IceCandidate>)
    -> Result<(), anyhow::Error>;
    fn remote_streams(&self) -> Vec<Arc<dyn MediaStream>>;
    async fn close(&self) -> Result<(), anyhow::Error>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Creates a connection and the stream of its events.
    async fn create(
        &self,
        config: &PeerConfiguration,
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), anyhow::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Loops on the caller side until the first peer negotiated.
    Outgoing,
    /// Played once when the call ends.
    Complete,
}

/// A user-visible error: title key, message keys and an optional raw detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub title: MessageKey,
    pub message: Vec<MessageKey>,
    pub detail: Option<String>,
}

/// Rendering side of the call page. Localisation happens behind it.
pub trait CallView: Send + Sync {
    fn show_error(&self, notice: &ErrorNotice, reference: &str);
    fn show_stopped(&self, message: MessageKey);
    fn show_remote(&self, user_id: &str, stream: Arc<dyn MediaStream>);
    fn hide_remote(&self, user_id: &str);
    fn play_tone(&self, tone: Tone);
    fn stop_tone(&self, tone: Tone);
    fn close_window(&self, after: Duration);
}

/// Per-user key/value preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    fn set(&self, key: &str, value: &str) -> Result<(), anyhow::Error>;
}

/// Everything a session needs from its host.
#[derive(Clone)]
pub struct Collaborators {
    pub channel: Arc<dyn SignalingChannel>,
    pub registry: Arc<dyn CallRegistry>,
    pub updates: Arc<dyn UserUpdates>,
    pub devices: Arc<dyn MediaDevices>,
    pub connections: Arc<dyn PeerConnectionFactory>,
    pub view: Arc<dyn CallView>,
    pub preferences: Arc<dyn PreferenceStore>,
}
