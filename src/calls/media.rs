//! Local media gate: one capture per session, shared by every peer.

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use wccore::media::{DeviceError, DeviceKind, MediaConstraints};
use wccore::update::Preference;

use super::error::CallError;
use super::traits::{MediaDevices, MediaStream, PreferenceStore};

#[derive(Clone)]
pub enum MediaState {
    Pending,
    Ready(Arc<dyn MediaStream>),
    Failed(DeviceError),
    Stopped,
}

impl std::fmt::Debug for MediaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Ready(stream) => f.debug_tuple("Ready").field(&stream.id()).finish(),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            Self::Stopped => f.write_str("Stopped"),
        }
    }
}

pub struct LocalMediaGate {
    devices: Arc<dyn MediaDevices>,
    preferences: Arc<dyn PreferenceStore>,
    user_id: String,
    namespace: String,
    state: watch::Sender<MediaState>,
    requested: AtomicBool,
}

impl LocalMediaGate {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        preferences: Arc<dyn PreferenceStore>,
        user_id: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let (state, _rx) = watch::channel(MediaState::Pending);
        Self {
            devices,
            preferences,
            user_id: user_id.into(),
            namespace: namespace.into(),
            state,
            requested: AtomicBool::new(false),
        }
    }

    /// Build the capture request from the enumerated inputs.
    pub async fn constraints(&self) -> Result<MediaConstraints, DeviceError> {
        match self.devices.enumerate_devices().await {
            Ok(devices) => MediaConstraints::from_devices(
                &devices,
                self.devices.screen(),
                self.devices.supports_facing_mode(),
            ),
            Err(e) => {
                warn!(target: "Call/Media", "Unable to read media devices, going with default audio and video: {e}");
                Ok(MediaConstraints::fallback())
            }
        }
    }

    /// Acquire the local stream. Only the first call touches the devices;
    /// later calls wait for its outcome.
    pub async fn acquire(&self) -> Result<Arc<dyn MediaStream>, DeviceError> {
        if self.requested.swap(true, Ordering::SeqCst) {
            return match self.settled().await {
                MediaState::Ready(stream) => Ok(stream),
                MediaState::Failed(err) => Err(err),
                MediaState::Pending | MediaState::Stopped => {
                    Err(DeviceError::Enumeration("local media stopped".to_string()))
                }
            };
        }

        let outcome = self.capture().await;
        match outcome {
            Ok(stream) => {
                let mut stream = Some(stream);
                let accepted = self.state.send_if_modified(|state| {
                    if matches!(state, MediaState::Pending) {
                        if let Some(stream) = stream.take() {
                            *state = MediaState::Ready(stream);
                        }
                        true
                    } else {
                        false
                    }
                });
                if let Some(late) = stream {
                    // Stopped while capturing.
                    debug!(target: "Call/Media", "Releasing stream acquired after stop");
                    late.stop();
                }
                match (accepted, self.current()) {
                    (true, Some(stream)) => Ok(stream),
                    _ => Err(DeviceError::Enumeration("local media stopped".to_string())),
                }
            }
            Err(err) => {
                self.state.send_if_modified(|state| {
                    if matches!(state, MediaState::Pending) {
                        *state = MediaState::Failed(err.clone());
                        true
                    } else {
                        false
                    }
                });
                Err(err)
            }
        }
    }

    async fn capture(&self) -> Result<Arc<dyn MediaStream>, DeviceError> {
        let constraints = self.constraints().await?;
        info!(target: "Call/Media", "Media constraints: {} ({})",
            serde_json::to_string(&constraints).unwrap_or_default(),
            constraints.describe()
        );
        let stream = self.devices.get_user_media(&constraints).await?;
        self.apply_preferences(stream.as_ref());
        Ok(stream)
    }

    fn apply_preferences(&self, stream: &dyn MediaStream) {
        for (preference, kind) in [
            (Preference::AudioDisable, DeviceKind::AudioInput),
            (Preference::VideoDisable, DeviceKind::VideoInput),
        ] {
            match self.preferences.get(&self.preference_key(preference)) {
                Ok(Some(value)) if value == "true" => {
                    info!(target: "Call/Media", "Apply user preference: {}d", preference.name());
                    set_tracks(stream, kind, Some(false));
                }
                Ok(_) => {}
                Err(e) => warn!(target: "Call/Media", "Failed to read preference {}: {e}", preference.name()),
            }
        }
    }

    async fn settled(&self) -> MediaState {
        let mut rx = self.state.subscribe();
        match rx
            .wait_for(|state| !matches!(state, MediaState::Pending))
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => MediaState::Stopped,
        }
    }

    /// Wait for the shared stream; peers call this before attaching media.
    pub async fn stream(&self) -> Result<Arc<dyn MediaStream>, CallError> {
        match self.settled().await {
            MediaState::Ready(stream) => Ok(stream),
            _ => Err(CallError::MediaUnavailable),
        }
    }

    pub fn current(&self) -> Option<Arc<dyn MediaStream>> {
        match &*self.state.borrow() {
            MediaState::Ready(stream) => Some(stream.clone()),
            _ => None,
        }
    }

    pub fn state(&self) -> MediaState {
        self.state.borrow().clone()
    }

    pub fn preference_key(&self, preference: Preference) -> String {
        preference.key(&self.user_id, &self.namespace)
    }

    pub fn audio_enabled(&self) -> bool {
        self.enabled(DeviceKind::AudioInput)
    }

    pub fn video_enabled(&self) -> bool {
        self.enabled(DeviceKind::VideoInput)
    }

    fn enabled(&self, kind: DeviceKind) -> bool {
        self.current()
            .and_then(|stream| stream.tracks_of(kind).first().map(|track| track.is_enabled()))
            .unwrap_or(true)
    }

    /// Flip audio and persist the result. Returns the new enabled state.
    pub fn toggle_audio(&self) -> bool {
        self.update(Preference::AudioDisable, DeviceKind::AudioInput, None)
    }

    pub fn toggle_video(&self) -> bool {
        self.update(Preference::VideoDisable, DeviceKind::VideoInput, None)
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> bool {
        self.update(Preference::AudioDisable, DeviceKind::AudioInput, Some(enabled))
    }

    pub fn set_video_enabled(&self, enabled: bool) -> bool {
        self.update(Preference::VideoDisable, DeviceKind::VideoInput, Some(enabled))
    }

    fn update(&self, preference: Preference, kind: DeviceKind, value: Option<bool>) -> bool {
        let enabled = match self.current() {
            Some(stream) => set_tracks(stream.as_ref(), kind, value),
            None => value.unwrap_or(true),
        };
        info!(target: "Call/Media", "{:?} {}muted", kind, if enabled { "un" } else { "" });
        let key = self.preference_key(preference);
        let stored = if enabled { "false" } else { "true" };
        if let Err(e) = self.preferences.set(&key, stored) {
            warn!(target: "Call/Media", "Error saving call preference {key}: {e}");
        }
        enabled
    }

    /// Stop the local tracks. Only the session controller calls this.
    pub fn stop(&self) {
        let previous = self.state.send_replace(MediaState::Stopped);
        if let MediaState::Ready(stream) = previous {
            debug!(target: "Call/Media", "Stopping local stream {}", stream.id());
            stream.stop();
        }
    }
}

/// Apply `value` to every track of `kind` (or flip each one when `None`).
/// Without tracks of that kind the result is "enabled".
fn set_tracks(stream: &dyn MediaStream, kind: DeviceKind, value: Option<bool>) -> bool {
    let tracks = stream.tracks_of(kind);
    for track in &tracks {
        track.set_enabled(value.unwrap_or(!track.is_enabled()));
    }
    match tracks.first() {
        Some(track) => track.is_enabled(),
        None => value.unwrap_or(true),
    }
}
