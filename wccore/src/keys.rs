//! Message keys handed to the view layer, which owns localisation.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    CallStopped,
    ErrorStartingCall,
    ErrorStartingConnection,
    ErrorSubscribeCall,
    ErrorSubscribeUser,
    RefreshTryAgainContactAdmin,
    ConnectionFailed,
    MediaDevicesError,
    AudioVideoRequired,
    NoAudioFound,
    ButVideoFound,
    AccessDenied,
    ProviderError,
    NotSupportedPlatform,
}

impl MessageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallStopped => "callStopped",
            Self::ErrorStartingCall => "errorStartingCall",
            Self::ErrorStartingConnection => "errorStartingConnection",
            Self::ErrorSubscribeCall => "errorSubscribeCall",
            Self::ErrorSubscribeUser => "errorSubscribeUser",
            Self::RefreshTryAgainContactAdmin => "refreshTryAgainContactAdmin",
            Self::ConnectionFailed => "connectionFailed",
            Self::MediaDevicesError => "mediaDevicesError",
            Self::AudioVideoRequired => "audioVideoRequired",
            Self::NoAudioFound => "noAudioFound",
            Self::ButVideoFound => "butVideoFound",
            Self::AccessDenied => "accessDenied",
            Self::ProviderError => "providerError",
            Self::NotSupportedPlatform => "notSupportedPlatform",
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
