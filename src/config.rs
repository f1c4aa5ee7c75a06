use serde::{Deserialize, Serialize};
use std::time::Duration;
use wccore::rtc::{PeerConfiguration, RtcConfiguration, TransportQuirks};
use wccore::update::DEFAULT_PREFERENCE_NAMESPACE;

pub const DEFAULT_PROVIDER_TYPE: &str = "webrtc";

/// Settings for one call session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Stamped on outbound messages; inbound messages of other providers are ignored.
    pub provider_type: String,
    pub rtc: RtcConfiguration,
    pub user_agent: String,
    /// Unset means a stalled negotiation is only ended by the user.
    pub negotiation_timeout_ms: Option<u64>,
    pub close_window_delay_ms: u64,
    pub preference_namespace: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider_type: DEFAULT_PROVIDER_TYPE.to_string(),
            rtc: RtcConfiguration::default(),
            user_agent: String::new(),
            negotiation_timeout_ms: None,
            close_window_delay_ms: 1500,
            preference_namespace: DEFAULT_PREFERENCE_NAMESPACE.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with_rtc(mut self, rtc: RtcConfiguration) -> Self {
        self.rtc = rtc;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_ms.map(Duration::from_millis)
    }

    pub fn close_window_delay(&self) -> Duration {
        Duration::from_millis(self.close_window_delay_ms)
    }

    pub fn quirks(&self) -> TransportQuirks {
        TransportQuirks::from_user_agent(&self.user_agent)
    }

    /// The sanitised configuration every peer connection of the session uses.
    pub fn peer_configuration(&self) -> PeerConfiguration {
        self.rtc.sanitize(&self.quirks())
    }
}
