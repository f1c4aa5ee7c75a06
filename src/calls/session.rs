//! Call session controller.
//!
//! A [`CallSession`] owns the peers of one call page. It subscribes to the
//! call's signaling channel, routes inbound messages to the right
//! [`PeerNegotiator`] (creating it on demand), and drives the call-level
//! lifecycle. One spawned task per session drains the subscription and the
//! internal signals; every per-message peer operation runs in its own task so
//! a candidate waiting for negotiation never blocks the answer it waits for.
//!
//! All teardown triggers (hang-up, unload, failure, a closed peer, a remote
//! stop) funnel into one idempotent [`SessionInner::teardown`].

use futures_util::future::join_all;
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use wccore::rtc::{PeerConfiguration, TransportQuirks};
use wccore::update::UserUpdate;
use wccore::{Call, MessageKey, Payload, Recipient, SignalingMessage};

use super::error::CallError;
use super::media::LocalMediaGate;
use super::peer::PeerNegotiator;
use super::policy::FailurePolicy;
use super::state::PeerPhase;
use super::traits::{
    CallRegistry, CallView, Collaborators, PeerConnectionFactory, SignalingChannel,
    SubscriptionHandle, Tone, UserUpdates,
};
use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Joining,
    Active,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    HangUp,
    Unload,
    Failure,
    PeerClosed,
    RemoteStop,
}

impl TeardownReason {
    /// Whether the remote call registry hears about this stop.
    pub fn notifies_registry(&self) -> bool {
        matches!(self, Self::HangUp | Self::Unload | Self::Failure)
    }
}

/// Requests sent to the session loop by peers and the failure policy.
#[derive(Debug, Clone)]
pub enum SessionSignal {
    Teardown(TeardownReason),
    Negotiated { peer: String },
}

/// Per-session context handed to every peer at creation.
pub struct SessionContext {
    pub call: Arc<Call>,
    pub provider_type: String,
    pub channel: Arc<dyn SignalingChannel>,
    pub connections: Arc<dyn PeerConnectionFactory>,
    pub view: Arc<dyn CallView>,
    pub media: Arc<LocalMediaGate>,
    pub policy: Arc<FailurePolicy>,
    pub signals: mpsc::UnboundedSender<SessionSignal>,
    pub quirks: TransportQuirks,
    pub peer_config: PeerConfiguration,
    pub negotiation_timeout: Option<Duration>,
}

impl SessionContext {
    /// An outbound message stamped with our provider and user id.
    pub fn message(&self, payload: Payload) -> SignalingMessage {
        SignalingMessage::new(&self.provider_type, &self.call.current_user_id, payload)
    }
}

struct SessionInner {
    ctx: Arc<SessionContext>,
    config: SessionConfig,
    registry: Arc<dyn CallRegistry>,
    updates: Arc<dyn UserUpdates>,
    peers: RwLock<HashMap<String, Arc<PeerNegotiator>>>,
    state: watch::Sender<SessionState>,
    stopping: AtomicBool,
    listening: AtomicBool,
    first_negotiated: AtomicBool,
    joined: AtomicBool,
    subscription: Mutex<Option<Arc<dyn SubscriptionHandle>>>,
    signals: Mutex<Option<mpsc::UnboundedReceiver<SessionSignal>>>,
    update_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl CallSession {
    pub fn new(call: Call, config: SessionConfig, collaborators: Collaborators) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let quirks = config.quirks();
        let media = Arc::new(LocalMediaGate::new(
            collaborators.devices.clone(),
            collaborators.preferences.clone(),
            call.current_user_id.clone(),
            config.preference_namespace.clone(),
        ));
        let policy = Arc::new(FailurePolicy::new(
            collaborators.view.clone(),
            signals_tx.clone(),
        ));
        let ctx = Arc::new(SessionContext {
            call: Arc::new(call),
            provider_type: config.provider_type.clone(),
            channel: collaborators.channel,
            connections: collaborators.connections,
            view: collaborators.view,
            media,
            policy,
            signals: signals_tx,
            quirks,
            peer_config: config.rtc.sanitize(&quirks),
            negotiation_timeout: config.negotiation_timeout(),
        });
        let (state, _rx) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(SessionInner {
                ctx,
                config,
                registry: collaborators.registry,
                updates: collaborators.updates,
                peers: RwLock::new(HashMap::new()),
                state,
                stopping: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                first_negotiated: AtomicBool::new(false),
                joined: AtomicBool::new(false),
                subscription: Mutex::new(None),
                signals: Mutex::new(Some(signals_rx)),
                update_task: Mutex::new(None),
            }),
        }
    }

    pub fn call(&self) -> &Call {
        &self.inner.ctx.call
    }

    pub fn media(&self) -> &Arc<LocalMediaGate> {
        &self.inner.ctx.media
    }

    pub fn policy(&self) -> &Arc<FailurePolicy> {
        &self.inner.ctx.policy
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the session reaches a terminal state.
    pub async fn stopped(&self) -> SessionState {
        let mut rx = self.watch_state();
        match rx.wait_for(SessionState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    pub async fn peer(&self, user_id: &str) -> Option<Arc<PeerNegotiator>> {
        self.inner.peers.read().await.get(user_id).cloned()
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.peers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn peer_phases(&self) -> Vec<(String, PeerPhase)> {
        let peers: Vec<Arc<PeerNegotiator>> =
            self.inner.peers.read().await.values().cloned().collect();
        let mut phases = Vec::with_capacity(peers.len());
        for peer in peers {
            phases.push((peer.remote_user_id().to_string(), peer.phase().await));
        }
        phases.sort_by(|a, b| a.0.cmp(&b.0));
        phases
    }

    /// Subscribe, acquire local media and say hello.
    ///
    /// A failed channel subscription leaves the session `Failed` and is not
    /// retried. A failed user-update subscription is shown but the call
    /// goes on.
    pub async fn join(&self) -> Result<(), CallError> {
        let inner = &self.inner;
        let ctx = &inner.ctx;
        let call = &ctx.call;
        if !inner.set_state(SessionState::Idle, SessionState::Joining) {
            warn!(target: "Call/Session", "Call {} already joined", call.id);
            return Ok(());
        }
        info!(target: "Call/Session", "Starting call {} ({}, {})", call.id,
            if call.is_group() { "group" } else { "one-on-one" }, call.role());

        match inner.updates.subscribe_user(&call.current_user_id).await {
            Ok(updates) => {
                let task = tokio::spawn(inner.clone().forward_updates(updates));
                *inner.update_task.lock().await = Some(task);
            }
            Err(source) => {
                ctx.policy.notify(&CallError::SubscribeUser {
                    user_id: call.current_user_id.clone(),
                    source,
                });
            }
        }

        if call.is_caller() {
            ctx.view.play_tone(Tone::Outgoing);
        }

        let (media, subscription) =
            tokio::join!(ctx.media.acquire(), ctx.channel.subscribe(&call.id));

        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(source) => {
                let err = CallError::Subscribe {
                    call_id: call.id.clone(),
                    source,
                };
                ctx.policy.notify(&err);
                ctx.policy.halt();
                ctx.view.stop_tone(Tone::Outgoing);
                ctx.media.stop();
                if let Some(task) = inner.update_task.lock().await.take() {
                    task.abort();
                }
                inner.state.send_replace(SessionState::Failed);
                return Err(err);
            }
        };
        debug!(target: "Call/Session", "Subscribed to call {}", call.id);

        *inner.subscription.lock().await = Some(subscription.handle.clone());
        inner.listening.store(true, Ordering::SeqCst);
        if inner.stopping.load(Ordering::SeqCst) {
            // Hung up while subscribing.
            inner.stop_listening().await;
            return Ok(());
        }
        match inner.signals.lock().await.take() {
            Some(signals) => {
                tokio::spawn(inner.clone().run(subscription.messages, signals));
            }
            None => error!(target: "Call/Session", "Session loop for {} already started", call.id),
        }

        if let Err(device) = media {
            let err = CallError::Device(device);
            ctx.policy.handle(&err);
            return Err(err);
        }
        inner.set_state(SessionState::Joining, SessionState::Active);

        if let Err(source) = ctx
            .channel
            .publish(&call.id, ctx.message(Payload::Hello(Recipient::All)))
            .await
        {
            let err = CallError::Publish {
                kind: "hello",
                call_id: call.id.clone(),
                source,
            };
            ctx.policy.handle(&err);
            return Err(err);
        }
        debug!(target: "Call/Session", "Sent Hello (by {}) for {}", call.role(), call.id);
        Ok(())
    }

    /// Route one inbound message.
    pub async fn on_message(&self, message: SignalingMessage) {
        self.inner.on_message(message).await;
    }

    /// User hang-up. One-to-one calls also close the window afterwards.
    pub async fn hang_up(&self) -> bool {
        self.inner.teardown(TeardownReason::HangUp).await
    }

    /// Page unload.
    pub async fn unload(&self) -> bool {
        self.inner.teardown(TeardownReason::Unload).await
    }

    /// Handle an out-of-band update; a stop of this call tears it down locally.
    pub async fn on_remote_stop(&self, update: &UserUpdate) -> bool {
        self.inner.on_user_update(update).await
    }
}

impl SessionInner {
    fn me(&self) -> &str {
        &self.ctx.call.current_user_id
    }

    /// Move `from` → `to`, never out of a terminal state.
    fn set_state(&self, from: SessionState, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    async fn run(
        self: Arc<Self>,
        mut messages: mpsc::UnboundedReceiver<SignalingMessage>,
        mut signals: mpsc::UnboundedReceiver<SessionSignal>,
    ) {
        let mut state = self.state.subscribe();
        let _guard = scopeguard::guard((), |_| {
            self.listening.store(false, Ordering::SeqCst);
        });
        loop {
            let listening = self.listening.load(Ordering::SeqCst);
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(SessionSignal::Teardown(reason)) => {
                        self.teardown(reason).await;
                    }
                    Some(SessionSignal::Negotiated { peer }) => self.on_negotiated(&peer),
                    None => break,
                },
                message = messages.recv(), if listening => match message {
                    Some(message) => self.on_message(message).await,
                    None => {
                        debug!(target: "Call/Session", "Subscription to {} ended", self.ctx.call.id);
                        self.listening.store(false, Ordering::SeqCst);
                    }
                },
                _ = async {
                    let _ = state.wait_for(SessionState::is_terminal).await;
                } => break,
            }
        }
        trace!(target: "Call/Session", "Session loop for {} finished", self.ctx.call.id);
    }

    async fn forward_updates(self: Arc<Self>, mut updates: mpsc::UnboundedReceiver<UserUpdate>) {
        while let Some(update) = updates.recv().await {
            self.on_user_update(&update).await;
            if self.state.borrow().is_terminal() {
                break;
            }
        }
    }

    async fn on_user_update(&self, update: &UserUpdate) -> bool {
        match update {
            UserUpdate::CallLeaved { call_id, user_id } => {
                debug!(target: "Call/Session", "User {} left call {call_id}", user_id.as_deref().unwrap_or("?"));
                false
            }
            update if update.stops(&self.ctx.call.id) => {
                if self.stopping.load(Ordering::SeqCst) {
                    trace!(target: "Call/Session", "Call stopped remotely: {}", self.ctx.call.id);
                } else {
                    info!(target: "Call/Session", "Call stopped remotely: {}", self.ctx.call.id);
                }
                self.teardown(TeardownReason::RemoteStop).await
            }
            _ => false,
        }
    }

    fn on_negotiated(self: &Arc<Self>, peer: &str) {
        if !self.first_negotiated.swap(true, Ordering::SeqCst) {
            self.ctx.view.stop_tone(Tone::Outgoing);
        }
        info!(target: "Call/Session", "Negotiated with {peer}@{}", self.ctx.call.id);
        if !self.joined.swap(true, Ordering::SeqCst) {
            let inner = self.clone();
            tokio::spawn(async move {
                if let Err(e) = inner.registry.joined_call(&inner.ctx.call.id).await {
                    warn!(target: "Call/Session", "Failed to mark call {} joined: {e}", inner.ctx.call.id);
                }
            });
        }
    }

    async fn on_message(&self, message: SignalingMessage) {
        if message.provider != self.ctx.provider_type {
            trace!(target: "Call/Session", "Skip {} message of provider {}", message.payload.kind(), message.provider);
            return;
        }
        if message.sender == self.me() {
            trace!(target: "Call/Session", "Skip own {} for {}", message.payload.kind(), self.ctx.call.id);
            return;
        }
        if !self.listening.load(Ordering::SeqCst) {
            trace!(target: "Call/Session", "Not listening on {}, dropped {}", self.ctx.call.id, message.payload.kind());
            return;
        }
        let addressed = message.is_addressed_to(self.me());
        let SignalingMessage {
            sender, payload, ..
        } = message;
        let policy = &self.ctx.policy;

        match payload {
            Payload::Hello(target) => {
                debug!(target: "Call/Session", "Received Hello for {} from {sender}", self.ctx.call.id);
                if !target.is_all() {
                    policy.handle(&CallError::Misaddressed {
                        kind: "hello",
                        target: target.to_string(),
                    });
                    return;
                }
                if self.peers.read().await.contains_key(&sender) {
                    debug!(target: "Call/Session", "Skip hello received for already created peer {sender}@{}", self.ctx.call.id);
                    return;
                }
                let Some(peer) = self.get_or_create_peer(&sender).await else {
                    return;
                };
                let policy = policy.clone();
                tokio::spawn(async move {
                    if let Err(e) = peer.start().await {
                        policy.handle(&e);
                    }
                });
            }
            Payload::Bye(target) => {
                debug!(target: "Call/Session", "Received Bye for {} from {sender}", self.ctx.call.id);
                if !target.includes(self.me()) {
                    policy.handle(&CallError::Misaddressed {
                        kind: "bye",
                        target: target.to_string(),
                    });
                    return;
                }
                let removed = self.peers.write().await.remove(&sender);
                match removed {
                    Some(peer) => {
                        self.stop_listening().await;
                        tokio::spawn(async move { peer.close().await });
                    }
                    None => {
                        debug!(target: "Call/Session", "Skip bye received for not existing peer {sender}@{}", self.ctx.call.id);
                    }
                }
            }
            Payload::Offer(raw) | Payload::Answer(raw) if !addressed => {
                trace!(target: "Call/Session", "Skip description from {sender} for another receiver ({} bytes)", raw.len());
            }
            Payload::Offer(raw) => {
                debug!(target: "Call/Session", "Received offer for {} from {sender}", self.ctx.call.id);
                let Some(peer) = self.get_or_create_peer(&sender).await else {
                    return;
                };
                let policy = policy.clone();
                tokio::spawn(async move {
                    if let Err(e) = peer.add_offer(&raw).await {
                        policy.handle(&e);
                    }
                });
            }
            Payload::Answer(raw) => {
                debug!(target: "Call/Session", "Received answer for {} from {sender}", self.ctx.call.id);
                let Some(peer) = self.get_or_create_peer(&sender).await else {
                    return;
                };
                let policy = policy.clone();
                tokio::spawn(async move {
                    if let Err(e) = peer.add_answer(&raw).await {
                        policy.handle(&e);
                    }
                });
            }
            Payload::Candidate(_) if !addressed => {
                trace!(target: "Call/Session", "Skip candidate from {sender} for another receiver");
            }
            Payload::Candidate(candidate) => {
                let peer = self.peers.read().await.get(&sender).cloned();
                match peer {
                    Some(peer) => {
                        let policy = policy.clone();
                        tokio::spawn(async move {
                            if let Err(e) = peer.add_candidate(candidate).await {
                                policy.handle(&e);
                            }
                        });
                    }
                    None => {
                        policy.handle(&CallError::UnknownPeer {
                            kind: "candidate",
                            peer: sender,
                        });
                    }
                }
            }
        }
    }

    /// At most one peer per remote user; none once teardown started.
    async fn get_or_create_peer(&self, user_id: &str) -> Option<Arc<PeerNegotiator>> {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get(user_id) {
            return Some(peer.clone());
        }
        if self.stopping.load(Ordering::SeqCst) {
            return None;
        }
        match PeerNegotiator::create(user_id, self.ctx.clone()).await {
            Ok(peer) => {
                peers.insert(user_id.to_string(), peer.clone());
                Some(peer)
            }
            Err(e) => {
                self.ctx.policy.handle(&e);
                None
            }
        }
    }

    async fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
        if let Some(handle) = self.subscription.lock().await.take() {
            debug!(target: "Call/Session", "Cancelling subscription to {}", self.ctx.call.id);
            handle.cancel();
        }
    }

    /// Release everything local. Runs once; later calls return `false`.
    async fn teardown(&self, reason: TeardownReason) -> bool {
        if self.stopping.swap(true, Ordering::SeqCst) {
            trace!(target: "Call/Session", "Call {} already stopping ({reason:?})", self.ctx.call.id);
            return false;
        }
        let ctx = &self.ctx;
        let call = &ctx.call;
        ctx.policy.halt();
        info!(target: "Call/Session", "Stopping call {} ({reason:?})", call.id);
        ctx.view.play_tone(Tone::Complete);

        if reason.notifies_registry() {
            let notified = if call.is_group() {
                self.registry.leaved_call(&call.id).await
            } else {
                self.registry.delete_call(&call.id).await
            };
            if let Err(e) = notified {
                error!(target: "Call/Session", "Failed to notify registry about stop of {}: {e}", call.id);
            }
        }

        ctx.view.stop_tone(Tone::Outgoing);
        ctx.view.show_stopped(MessageKey::CallStopped);
        ctx.media.stop();

        let peers: Vec<Arc<PeerNegotiator>> = self.peers.write().await.drain().map(|(_, p)| p).collect();
        join_all(peers.iter().map(|peer| peer.close())).await;
        self.stop_listening().await;
        if let Some(task) = self.update_task.lock().await.take() {
            task.abort();
        }

        let terminal = if reason == TeardownReason::Failure {
            SessionState::Failed
        } else {
            SessionState::Stopped
        };
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = terminal;
                true
            }
        });

        if reason == TeardownReason::HangUp && !call.is_group() {
            ctx.view.close_window(self.config.close_window_delay());
        }
        debug!(target: "Call/Session", "Stopped call {}", call.id);
        true
    }
}
