//! Call identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix that marks a group call id.
pub const GROUP_CALL_PREFIX: &str = "g/";

/// Identifier of a conversation on the signaling channel.
///
/// Group calls are recognised solely by the `g/` prefix; any other id is a
/// one-to-one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.starts_with(GROUP_CALL_PREFIX)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A call as seen by the local call page. Immutable once the page starts.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: CallId,
    pub title: String,
    /// The initiator of the call, when the page knows it.
    pub caller_id: Option<String>,
    pub current_user_id: String,
}

impl Call {
    pub fn new(id: impl Into<CallId>, current_user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            caller_id: None,
            current_user_id: current_user_id.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_caller(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    pub fn is_group(&self) -> bool {
        self.id.is_group()
    }

    pub fn is_caller(&self) -> bool {
        self.caller_id.as_deref() == Some(self.current_user_id.as_str())
    }

    /// Role name used in log lines.
    pub fn role(&self) -> &'static str {
        if self.is_caller() {
            "caller"
        } else {
            "participant"
        }
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
