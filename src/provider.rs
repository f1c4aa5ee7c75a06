//! Call providers and their registry.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use wccore::{Call, CallId, MessageKey, SignalingMessage};

use crate::calls::{CallError, CallSession, Collaborators, ErrorNotice};
use crate::config::SessionConfig;

/// A conferencing provider the page can start calls with.
#[async_trait]
pub trait CallProvider: Send + Sync {
    fn provider_type(&self) -> &str;

    /// Start a session for `call` and join it.
    async fn connect(&self, call: Call) -> Result<CallSession, CallError>;

    /// Publish a message on the call's channel, stamped with this provider.
    async fn send_signal(
        &self,
        call_id: &CallId,
        message: SignalingMessage,
    ) -> Result<(), anyhow::Error>;

    /// Settings exposed to an admin UI, if the provider has any.
    fn settings_hook(&self) -> Option<serde_json::Value> {
        None
    }
}

pub struct WebRtcProvider {
    config: SessionConfig,
    collaborators: Collaborators,
}

impl WebRtcProvider {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A session without joining it.
    pub fn session(&self, call: Call) -> CallSession {
        CallSession::new(call, self.config.clone(), self.collaborators.clone())
    }
}

#[async_trait]
impl CallProvider for WebRtcProvider {
    fn provider_type(&self) -> &str {
        &self.config.provider_type
    }

    async fn connect(&self, call: Call) -> Result<CallSession, CallError> {
        let session = self.session(call);
        session.join().await?;
        Ok(session)
    }

    async fn send_signal(
        &self,
        call_id: &CallId,
        mut message: SignalingMessage,
    ) -> Result<(), anyhow::Error> {
        if message.provider != self.config.provider_type {
            debug!(target: "Call/Session", "Restamping {} message from provider {}", message.payload.kind(), message.provider);
            message.provider = self.config.provider_type.clone();
        }
        self.collaborators.channel.publish(call_id, message).await
    }

    fn settings_hook(&self) -> Option<serde_json::Value> {
        match serde_json::to_value(&self.config.rtc) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(target: "Rtc/Config", "Unable to expose RTC settings: {e}");
                None
            }
        }
    }
}

#[derive(Clone)]
pub enum ProviderEntry {
    Ready(Arc<dyn CallProvider>),
    Unsupported { reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider {0} not registered")]
    Unknown(String),
    #[error("provider {provider} not supported: {reason}")]
    Unsupported { provider: String, reason: String },
}

impl ProviderError {
    pub fn notice(&self) -> ErrorNotice {
        match self {
            Self::Unknown(_) => ErrorNotice {
                title: MessageKey::ProviderError,
                message: vec![MessageKey::RefreshTryAgainContactAdmin],
                detail: Some(self.to_string()),
            },
            Self::Unsupported { .. } => ErrorNotice {
                title: MessageKey::ProviderError,
                message: vec![MessageKey::NotSupportedPlatform],
                detail: None,
            },
        }
    }
}

/// Providers by type string.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider`, replacing any entry of the same type.
    pub fn register(&mut self, provider: Arc<dyn CallProvider>) {
        let provider_type = provider.provider_type().to_string();
        info!(target: "Call/Session", "Registered call provider {provider_type}");
        if self
            .entries
            .insert(provider_type.clone(), ProviderEntry::Ready(provider))
            .is_some()
        {
            warn!(target: "Call/Session", "Replaced call provider {provider_type}");
        }
    }

    pub fn mark_unsupported(&mut self, provider_type: impl Into<String>, reason: impl Into<String>) {
        let provider_type = provider_type.into();
        let reason = reason.into();
        info!(target: "Call/Session", "Call provider {provider_type} not supported: {reason}");
        self.entries
            .insert(provider_type, ProviderEntry::Unsupported { reason });
    }

    pub fn entry(&self, provider_type: &str) -> Option<&ProviderEntry> {
        self.entries.get(provider_type)
    }

    pub fn get(&self, provider_type: &str) -> Result<Arc<dyn CallProvider>, ProviderError> {
        match self.entries.get(provider_type) {
            Some(ProviderEntry::Ready(provider)) => Ok(provider.clone()),
            Some(ProviderEntry::Unsupported { reason }) => Err(ProviderError::Unsupported {
                provider: provider_type.to_string(),
                reason: reason.clone(),
            }),
            None => Err(ProviderError::Unknown(provider_type.to_string())),
        }
    }

    /// Types of the providers calls can be started with.
    pub fn ready_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, ProviderEntry::Ready(_)))
            .map(|(provider_type, _)| provider_type.clone())
            .collect();
        types.sort();
        types
    }
}
