//! Wire format of the call signaling channel.
//!
//! Every message published on a call's channel is a flat JSON object:
//!
//! ```json
//! {"provider": "webrtc", "sender": "u2", "receiver": "u1", "offer": "{\"type\":\"offer\",\"sdp\":\"...\"}"}
//! ```
//!
//! Exactly one of `hello`, `bye`, `offer`, `answer` or `candidate` is present.
//! Offers and answers travel as JSON-encoded session descriptions (a string
//! inside the message), candidates as plain objects. An empty candidate
//! object (`{}`) marks the end of the sender's candidate gathering.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::ProtocolError;

/// Broadcast marker for `receiver`, `hello` and `bye`.
pub const ALL: &str = "__all__";

/// Target of a message: one user or everybody on the call channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    All,
    User(String),
}

impl Recipient {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// True for the broadcast marker or for exactly this user.
    pub fn includes(&self, user_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::User(id) => id == user_id,
        }
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        if value == ALL {
            Self::All
        } else {
            Self::User(value)
        }
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        match value {
            Recipient::All => ALL.to_string(),
            Recipient::User(id) => id,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(ALL),
            Self::User(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as produced by a peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Parse the JSON string carried in an `offer`/`answer` field.
    pub fn from_wire(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::SessionDescription)
    }

    /// Like [`Self::from_wire`] but also checks the description type.
    pub fn from_wire_as(raw: &str, expected: SdpType) -> Result<Self, ProtocolError> {
        let desc = Self::from_wire(raw)?;
        if desc.kind != expected {
            return Err(ProtocolError::UnexpectedDescription {
                expected,
                found: desc.kind,
            });
        }
        Ok(desc)
    }

    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One ICE candidate in the browser's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    #[serde(default)]
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }

    /// An empty candidate string ends one generation of candidates
    /// (some engines send it, others don't).
    pub fn is_end_of_generation(&self) -> bool {
        self.candidate.is_empty()
    }
}

/// Content of a `candidate` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidatePayload {
    Candidate(IceCandidate),
    /// `{}`: the sender finished gathering.
    EndOfCandidates,
}

impl Serialize for CandidatePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Candidate(candidate) => candidate.serialize(serializer),
            Self::EndOfCandidates => serde_json::Map::new().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CandidatePayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        if object.is_empty() {
            return Ok(Self::EndOfCandidates);
        }
        serde_json::from_value(serde_json::Value::Object(object))
            .map(Self::Candidate)
            .map_err(D::Error::custom)
    }
}

/// The tagged union of payload kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Hello(Recipient),
    Bye(Recipient),
    /// JSON-encoded [`SessionDescription`].
    Offer(String),
    /// JSON-encoded [`SessionDescription`].
    Answer(String),
    Candidate(CandidatePayload),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::Bye(_) => "bye",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct SignalingMessage {
    pub provider: String,
    pub sender: String,
    pub receiver: Option<Recipient>,
    pub payload: Payload,
}

impl SignalingMessage {
    pub fn new(provider: impl Into<String>, sender: impl Into<String>, payload: Payload) -> Self {
        Self {
            provider: provider.into(),
            sender: sender.into(),
            receiver: None,
            payload,
        }
    }

    pub fn to(mut self, receiver: Recipient) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Receiver check for directed payloads (offer, answer, candidate).
    /// A missing receiver addresses nobody.
    pub fn is_addressed_to(&self, user_id: &str) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| receiver.includes(user_id))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    provider: String,
    sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receiver: Option<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hello: Option<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bye: Option<Recipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<CandidatePayload>,
}

impl TryFrom<WireMessage> for SignalingMessage {
    type Error = ProtocolError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let mut payloads = Vec::with_capacity(1);
        if let Some(target) = wire.hello {
            payloads.push(Payload::Hello(target));
        }
        if let Some(target) = wire.bye {
            payloads.push(Payload::Bye(target));
        }
        if let Some(offer) = wire.offer {
            payloads.push(Payload::Offer(offer));
        }
        if let Some(answer) = wire.answer {
            payloads.push(Payload::Answer(answer));
        }
        if let Some(candidate) = wire.candidate {
            payloads.push(Payload::Candidate(candidate));
        }

        if payloads.len() > 1 {
            let kinds: Vec<&str> = payloads.iter().map(Payload::kind).collect();
            return Err(ProtocolError::AmbiguousPayload(kinds.join(", ")));
        }
        let payload = payloads.pop().ok_or(ProtocolError::MissingPayload)?;

        Ok(Self {
            provider: wire.provider,
            sender: wire.sender,
            receiver: wire.receiver,
            payload,
        })
    }
}

impl From<SignalingMessage> for WireMessage {
    fn from(message: SignalingMessage) -> Self {
        let mut wire = WireMessage {
            provider: message.provider,
            sender: message.sender,
            receiver: message.receiver,
            hello: None,
            bye: None,
            offer: None,
            answer: None,
            candidate: None,
        };
        match message.payload {
            Payload::Hello(target) => wire.hello = Some(target),
            Payload::Bye(target) => wire.bye = Some(target),
            Payload::Offer(offer) => wire.offer = Some(offer),
            Payload::Answer(answer) => wire.answer = Some(answer),
            Payload::Candidate(candidate) => wire.candidate = Some(candidate),
        }
        wire
    }
}
