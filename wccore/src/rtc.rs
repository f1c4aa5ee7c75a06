//! Peer connection configuration and engine quirks.
//!
//! Provider settings arrive as a loose JSON object that also carries admin
//! bookkeeping fields. [`RtcConfiguration::sanitize`] turns it into the
//! configuration a peer connection is created with, applying the session's
//! [`TransportQuirks`] once.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine family, detected once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEngine {
    Edge,
    Firefox,
    Chromium,
    Other,
}

impl BrowserEngine {
    pub fn from_user_agent(user_agent: &str) -> Self {
        // Legacy Edge also advertises Chrome, so it goes first.
        if user_agent.contains("Edge") {
            Self::Edge
        } else if user_agent.contains("Firefox") {
            Self::Firefox
        } else if user_agent.contains("Chrome") || user_agent.contains("Chromium") {
            Self::Chromium
        } else {
            Self::Other
        }
    }
}

/// Engine-specific negotiation behaviour, resolved once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportQuirks {
    /// Drop `turns:` ICE URLs (TURN over TLS/TCP unsupported).
    pub skip_secure_turn: bool,
    /// Apply an empty remote candidate as end-of-candidates (`None`).
    pub null_end_of_candidates: bool,
}

impl TransportQuirks {
    pub fn for_engine(engine: BrowserEngine) -> Self {
        match engine {
            BrowserEngine::Edge => Self {
                skip_secure_turn: true,
                null_end_of_candidates: true,
            },
            BrowserEngine::Firefox | BrowserEngine::Chromium | BrowserEngine::Other => {
                Self::default()
            }
        }
    }

    pub fn from_user_agent(user_agent: &str) -> Self {
        Self::for_engine(BrowserEngine::from_user_agent(user_agent))
    }
}

/// ICE server entry as stored in provider settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IceServerSettings {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(rename = "default", default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

/// RTC configuration as delivered by the provider settings endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_transport_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_candidate_pool_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_enabled: Option<bool>,
    #[serde(default)]
    pub ice_servers: Vec<IceServerSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// What a peer connection is actually created with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_transport_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_candidate_pool_size: Option<u32>,
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn string_only(value: &Option<Value>) -> Option<String> {
    match value {
        // Empty strings are meaningful here and kept.
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

impl RtcConfiguration {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn sanitize(&self, quirks: &TransportQuirks) -> PeerConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .filter_map(|server| {
                let urls: Vec<String> = if quirks.skip_secure_turn {
                    server
                        .urls
                        .iter()
                        .filter(|url| {
                            let keep = !url.starts_with("turns");
                            if !keep {
                                warn!(target: "Rtc/Config", "Skipped ICE server URL unsupported by this engine: {url}");
                            }
                            keep
                        })
                        .cloned()
                        .collect()
                } else {
                    server.urls.clone()
                };
                if quirks.skip_secure_turn && urls.is_empty() {
                    return None;
                }
                Some(IceServer {
                    urls,
                    username: string_only(&server.username),
                    credential: string_only(&server.credential),
                })
            })
            .collect();

        PeerConfiguration {
            bundle_policy: non_empty(&self.bundle_policy),
            ice_transport_policy: non_empty(&self.ice_transport_policy),
            ice_candidate_pool_size: self
                .ice_candidate_pool_size
                .filter(|size| *size > 0)
                .and_then(|size| u32::try_from(size).ok()),
            ice_servers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EDGE_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/70.0.3538.102 Safari/537.36 Edge/18.19041";
    const CHROME_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/81.0.4044.138 Safari/537.36";
    const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:75.0) Gecko/20100101 Firefox/75.0";

    fn settings() -> RtcConfiguration {
        RtcConfiguration::from_json(
            &json!({
                "bundlePolicy": "",
                "iceTransportPolicy": "relay",
                "iceCandidatePoolSize": 0,
                "logEnabled": true,
                "iceServers": [
                    {"urls": ["stun:stun.example.org:3478"], "enabled": true, "default": true},
                    {
                        "urls": ["turn:turn.example.org:3478", "turns:turn.example.org:5349"],
                        "username": "",
                        "credential": null,
                        "enabled": true
                    },
                    {"urls": ["turns:secure.example.org:443"], "username": "bob", "credential": "pw"}
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn engine_detection_prefers_edge_over_chrome_token() {
        assert_eq!(BrowserEngine::from_user_agent(EDGE_UA), BrowserEngine::Edge);
        assert_eq!(BrowserEngine::from_user_agent(CHROME_UA), BrowserEngine::Chromium);
        assert_eq!(BrowserEngine::from_user_agent(FIREFOX_UA), BrowserEngine::Firefox);
        assert_eq!(BrowserEngine::from_user_agent("curl/8.0"), BrowserEngine::Other);
    }

    #[test]
    fn sanitize_strips_admin_fields_and_empty_policies() {
        let conf = settings().sanitize(&TransportQuirks::from_user_agent(CHROME_UA));
        assert_eq!(conf.bundle_policy, None);
        assert_eq!(conf.ice_transport_policy.as_deref(), Some("relay"));
        assert_eq!(conf.ice_candidate_pool_size, None);
        assert_eq!(conf.ice_servers.len(), 3);
        // Empty username kept, null credential dropped.
        assert_eq!(conf.ice_servers[1].username.as_deref(), Some(""));
        assert_eq!(conf.ice_servers[1].credential, None);

        let value = serde_json::to_value(&conf).unwrap();
        assert!(value.get("logEnabled").is_none());
        assert!(value["iceServers"][0].get("enabled").is_none());
        assert!(value["iceServers"][0].get("default").is_none());
    }

    #[test]
    fn edge_quirks_drop_secure_turn_urls() {
        let quirks = TransportQuirks::from_user_agent(EDGE_UA);
        assert!(quirks.null_end_of_candidates);
        let conf = settings().sanitize(&quirks);
        assert_eq!(conf.ice_servers.len(), 2);
        assert_eq!(conf.ice_servers[1].urls, vec!["turn:turn.example.org:3478"]);
    }

    #[test]
    fn positive_pool_size_is_kept() {
        let conf = RtcConfiguration {
            ice_candidate_pool_size: Some(4),
            ..Default::default()
        }
        .sanitize(&TransportQuirks::default());
        assert_eq!(conf.ice_candidate_pool_size, Some(4));
    }
}
