//! Out-of-band user events and per-user preference keys.

use serde::{Deserialize, Serialize};

use crate::call::CallId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOwner {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl UpdateOwner {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: "user".to_string(),
            id: Some(id.into()),
        }
    }

    pub fn is_user(&self) -> bool {
        self.kind == "user"
    }
}

/// An event from the user-update channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum UserUpdate {
    #[serde(rename = "call_state", rename_all = "camelCase")]
    CallState {
        call_id: CallId,
        call_state: String,
        owner: UpdateOwner,
    },
    #[serde(rename = "call_leaved", rename_all = "camelCase")]
    CallLeaved {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl UserUpdate {
    pub fn call_stopped(call_id: impl Into<CallId>, owner: UpdateOwner) -> Self {
        Self::CallState {
            call_id: call_id.into(),
            call_state: "stopped".to_string(),
            owner,
        }
    }

    /// True when this is a user-owned stop notification for `call_id`.
    pub fn stops(&self, call_id: &CallId) -> bool {
        match self {
            Self::CallState {
                call_id: id,
                call_state,
                owner,
            } => owner.is_user() && call_state == "stopped" && id == call_id,
            Self::CallLeaved { .. } | Self::Unknown => false,
        }
    }
}

pub const DEFAULT_PREFERENCE_NAMESPACE: &str = "exo.webconferencing.webrtc";

/// Muted-track preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    AudioDisable,
    VideoDisable,
}

impl Preference {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AudioDisable => "audio.disable",
            Self::VideoDisable => "video.disable",
        }
    }

    /// `"<user>@<namespace>.<name>"`
    pub fn key(&self, user_id: &str, namespace: &str) -> String {
        format!("{user_id}@{namespace}.{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_event_for_this_call_is_recognised() {
        let update: UserUpdate = serde_json::from_str(
            r#"{"eventType":"call_state","callId":"abc123","callState":"stopped","owner":{"type":"user","id":"u2"}}"#,
        )
        .unwrap();
        assert!(update.stops(&CallId::from("abc123")));
        assert!(!update.stops(&CallId::from("other")));
    }

    #[test]
    fn space_owned_stop_is_not_a_user_stop() {
        let update = UserUpdate::call_stopped(
            "g/team",
            UpdateOwner {
                kind: "space".to_string(),
                id: None,
            },
        );
        assert!(!update.stops(&CallId::from("g/team")));
    }

    #[test]
    fn leaved_and_unknown_events_decode() {
        let leaved: UserUpdate =
            serde_json::from_str(r#"{"eventType":"call_leaved","callId":"g/x","userId":"u3"}"#)
                .unwrap();
        assert!(matches!(leaved, UserUpdate::CallLeaved { .. }));
        let unknown: UserUpdate =
            serde_json::from_str(r#"{"eventType":"call_joined","callId":"g/x"}"#).unwrap();
        assert_eq!(unknown, UserUpdate::Unknown);
    }

    #[test]
    fn preference_keys_are_scoped_by_user() {
        assert_eq!(
            Preference::AudioDisable.key("u1", DEFAULT_PREFERENCE_NAMESPACE),
            "u1@exo.webconferencing.webrtc.audio.disable"
        );
        assert_eq!(
            Preference::VideoDisable.key("u1", "ns"),
            "u1@ns.video.disable"
        );
    }
}
