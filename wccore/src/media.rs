//! Local capture constraints and device error classification.
//!
//! Audio is mandatory for a call, video is optional. The requested video
//! width follows a small fixed ladder picked from the screen size; it is a
//! local heuristic and never negotiated with the remote side.

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::keys::MessageKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeviceInfo {
    #[serde(default)]
    pub device_id: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub label: String,
}

impl MediaDeviceInfo {
    pub fn new(kind: DeviceKind, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            label: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
}

impl ScreenInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_portrait(&self) -> bool {
        self.width < self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoResolution {
    pub width: u32,
    pub height: u32,
}

impl VideoResolution {
    pub const LOW: Self = Self {
        width: 320,
        height: 240,
    };
    pub const STANDARD: Self = Self {
        width: 640,
        height: 480,
    };
    pub const HD: Self = Self {
        width: 1280,
        height: 720,
    };

    /// Minimum resolution for a screen; `HD` is only ever the ideal.
    pub fn for_screen(screen: ScreenInfo) -> Self {
        if screen.width >= Self::STANDARD.width {
            Self::STANDARD
        } else {
            Self::LOW
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WidthRange {
    pub min: u32,
    pub ideal: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoConstraints {
    pub width: WidthRange,
    #[serde(rename = "facingMode", skip_serializing_if = "Option::is_none")]
    pub facing_mode: Option<FacingMode>,
}

impl VideoConstraints {
    pub fn for_screen(screen: ScreenInfo, supports_facing_mode: bool) -> Self {
        let base = VideoResolution::for_screen(screen);
        let width = if screen.is_portrait() {
            WidthRange {
                min: base.height,
                ideal: VideoResolution::HD.height,
            }
        } else {
            WidthRange {
                min: base.width,
                ideal: VideoResolution::HD.width,
            }
        };
        Self {
            width,
            facing_mode: supports_facing_mode.then_some(FacingMode::User),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoRequest {
    Off,
    /// Any camera, engine defaults.
    Any,
    Constrained(VideoConstraints),
}

impl VideoRequest {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

impl Serialize for VideoRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Off => serializer.serialize_bool(false),
            Self::Any => serializer.serialize_bool(true),
            Self::Constrained(constraints) => constraints.serialize(serializer),
        }
    }
}

/// A capture request in `getUserMedia` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: VideoRequest,
}

impl MediaConstraints {
    /// Build a request from enumerated input devices.
    pub fn from_devices(
        devices: &[MediaDeviceInfo],
        screen: ScreenInfo,
        supports_facing_mode: bool,
    ) -> Result<Self, DeviceError> {
        let has = |kind| devices.iter().any(|device| device.kind == kind);
        let has_camera = has(DeviceKind::VideoInput);
        if !has(DeviceKind::AudioInput) {
            return Err(DeviceError::NoAudioInput {
                video_found: has_camera,
            });
        }
        let video = if has_camera {
            VideoRequest::Constrained(VideoConstraints::for_screen(screen, supports_facing_mode))
        } else {
            VideoRequest::Off
        };
        Ok(Self { audio: true, video })
    }

    /// Used when the device list cannot be read at all.
    pub fn fallback() -> Self {
        Self {
            audio: true,
            video: VideoRequest::Any,
        }
    }

    pub fn describe(&self) -> &'static str {
        if self.video.is_enabled() {
            "Found audio and video"
        } else {
            "Found audio"
        }
    }
}

/// Device problems that prevent a call from starting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("no audio input device found (video found: {video_found})")]
    NoAudioInput { video_found: bool },

    #[error("media access denied: {0}")]
    PermissionDenied(String),

    #[error("media device not found: {0}")]
    NotFound(String),

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("media device error {name}: {message}")]
    Other { name: String, message: String },
}

impl DeviceError {
    /// Map an engine error name onto a user-facing category.
    pub fn classify(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "PERMISSION_DENIED"
            | "SecurityError" => Self::PermissionDenied(message),
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                Self::NotFound(message)
            }
            _ => Self::Other {
                name: name.to_string(),
                message,
            },
        }
    }

    pub fn title_key(&self) -> MessageKey {
        match self {
            Self::NoAudioInput { .. } | Self::Enumeration(_) => MessageKey::AudioVideoRequired,
            _ => MessageKey::MediaDevicesError,
        }
    }

    /// Keys making up the user message, in display order.
    pub fn message_keys(&self) -> Vec<MessageKey> {
        match self {
            Self::NoAudioInput { video_found: true } => {
                vec![MessageKey::NoAudioFound, MessageKey::ButVideoFound]
            }
            Self::NoAudioInput { video_found: false } => vec![MessageKey::NoAudioFound],
            Self::PermissionDenied(_) => vec![MessageKey::AccessDenied],
            _ => vec![MessageKey::MediaDevicesError],
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mic() -> MediaDeviceInfo {
        MediaDeviceInfo::new(DeviceKind::AudioInput, "mic-1")
    }

    fn cam() -> MediaDeviceInfo {
        MediaDeviceInfo::new(DeviceKind::VideoInput, "cam-1")
    }

    #[test]
    fn no_microphone_is_rejected_even_with_camera() {
        let err = MediaConstraints::from_devices(&[cam()], ScreenInfo::new(1920, 1080), true)
            .unwrap_err();
        assert_eq!(err, DeviceError::NoAudioInput { video_found: true });
        assert_eq!(
            err.message_keys(),
            vec![MessageKey::NoAudioFound, MessageKey::ButVideoFound]
        );
        assert_eq!(err.title_key(), MessageKey::AudioVideoRequired);
    }

    #[test]
    fn audio_only_without_camera() {
        let constraints =
            MediaConstraints::from_devices(&[mic()], ScreenInfo::new(1920, 1080), true).unwrap();
        assert!(constraints.audio);
        assert_eq!(constraints.video, VideoRequest::Off);
        assert_eq!(
            serde_json::to_value(&constraints).unwrap(),
            json!({"audio": true, "video": false})
        );
    }

    #[test]
    fn landscape_wide_screen_asks_for_standard_minimum() {
        let constraints =
            MediaConstraints::from_devices(&[mic(), cam()], ScreenInfo::new(1920, 1080), true)
                .unwrap();
        assert_eq!(
            serde_json::to_value(&constraints).unwrap(),
            json!({
                "audio": true,
                "video": {"width": {"min": 640, "ideal": 1280}, "facingMode": "user"}
            })
        );
    }

    #[test]
    fn narrow_portrait_screen_uses_low_rung_height() {
        let video = VideoConstraints::for_screen(ScreenInfo::new(360, 740), false);
        assert_eq!(video.width, WidthRange { min: 240, ideal: 720 });
        assert!(video.facing_mode.is_none());
    }

    #[test]
    fn wide_portrait_screen_uses_standard_rung_height() {
        let video = VideoConstraints::for_screen(ScreenInfo::new(768, 1024), true);
        assert_eq!(video.width, WidthRange { min: 480, ideal: 720 });
    }

    #[test]
    fn fallback_requests_audio_and_any_video() {
        assert_eq!(
            serde_json::to_value(MediaConstraints::fallback()).unwrap(),
            json!({"audio": true, "video": true})
        );
    }

    #[test]
    fn classification_separates_permission_from_other_errors() {
        assert!(DeviceError::classify("NotAllowedError", "denied").is_permission_denied());
        assert!(DeviceError::classify("PermissionDeniedError", "").is_permission_denied());
        assert!(matches!(
            DeviceError::classify("NotFoundError", "gone"),
            DeviceError::NotFound(_)
        ));
        let other = DeviceError::classify("NotReadableError", "busy");
        assert_eq!(other.message_keys(), vec![MessageKey::MediaDevicesError]);
        assert_eq!(other.title_key(), MessageKey::MediaDevicesError);
    }
}
