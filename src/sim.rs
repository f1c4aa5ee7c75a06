//! In-memory collaborators for tests and the demo binary.
//!
//! [`SimNetwork`] wires a signaling bus, a call registry and a user-update
//! feed shared by every [`SimParticipant`]. Messages cross the bus as JSON so
//! the wire codec runs on every hop, and the sender receives its own messages
//! back the way a broadcast channel echoes them.

use async_trait::async_trait;
use log::trace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use wccore::media::{DeviceError, DeviceKind, MediaConstraints, MediaDeviceInfo, ScreenInfo};
use wccore::rtc::PeerConfiguration;
use wccore::update::{UpdateOwner, UserUpdate};
use wccore::{CallId, IceCandidate, MessageKey, SessionDescription, SignalingMessage};

use crate::calls::traits::{
    CallRegistry, CallView, Collaborators, ErrorNotice, IceConnectionState, MediaDevices,
    MediaStream, MediaTrack, PeerConnection, PeerConnectionFactory, PeerEvent, PreferenceStore,
    SignalingChannel, Subscription, SubscriptionHandle, Tone, UserUpdates,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_id(prefix: &str) -> String {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    format!("{prefix}-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

// -- Signaling --

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<HashMap<CallId, Vec<Subscriber>>>,
    published: Mutex<Vec<(CallId, SignalingMessage)>>,
    next_subscriber: AtomicU64,
}

impl BusInner {
    fn deliver(&self, call_id: &CallId, raw: &str) -> Result<usize, anyhow::Error> {
        let message = SignalingMessage::decode(raw)?;
        let mut subscribers = lock(&self.subscribers);
        let Some(list) = subscribers.get_mut(call_id) else {
            return Ok(0);
        };
        list.retain(|subscriber| subscriber.tx.send(message.clone()).is_ok());
        Ok(list.len())
    }

    fn unsubscribe(&self, call_id: &CallId, id: u64) {
        if let Some(list) = lock(&self.subscribers).get_mut(call_id) {
            list.retain(|subscriber| subscriber.id != id);
        }
    }
}

/// Broadcast bus shared by every participant's channel.
#[derive(Clone, Default)]
pub struct SignalingBus {
    inner: Arc<BusInner>,
}

impl SignalingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> Arc<SimChannel> {
        Arc::new(SimChannel {
            bus: self.clone(),
            fail_subscribe: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
        })
    }

    /// Every message published on the bus, in order.
    pub fn published(&self) -> Vec<(CallId, SignalingMessage)> {
        lock(&self.inner.published).clone()
    }

    pub fn published_by(&self, sender: &str) -> Vec<SignalingMessage> {
        self.published()
            .into_iter()
            .filter(|(_, message)| message.sender == sender)
            .map(|(_, message)| message)
            .collect()
    }

    pub fn subscriber_count(&self, call_id: &CallId) -> usize {
        lock(&self.inner.subscribers)
            .get(call_id)
            .map_or(0, Vec::len)
    }

    /// Deliver a raw wire message as if some other client published it.
    pub fn inject_raw(&self, call_id: &CallId, raw: &str) -> Result<usize, anyhow::Error> {
        self.inner.deliver(call_id, raw)
    }

    pub fn inject(&self, call_id: &CallId, message: &SignalingMessage) -> Result<usize, anyhow::Error> {
        self.inject_raw(call_id, &message.encode()?)
    }
}

pub struct SimChannel {
    bus: SignalingBus,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
}

impl SimChannel {
    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn bus(&self) -> &SignalingBus {
        &self.bus
    }
}

struct SimSubscriptionHandle {
    bus: Arc<BusInner>,
    call_id: CallId,
    id: u64,
    cancelled: AtomicBool,
}

impl SubscriptionHandle for SimSubscriptionHandle {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            trace!(target: "Sim/Bus", "Cancel subscriber {} of {}", self.id, self.call_id);
            self.bus.unsubscribe(&self.call_id, self.id);
        }
    }
}

#[async_trait]
impl SignalingChannel for SimChannel {
    async fn subscribe(&self, call_id: &CallId) -> Result<Subscription, anyhow::Error> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            anyhow::bail!("subscription to {call_id} refused");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.bus.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        lock(&self.bus.inner.subscribers)
            .entry(call_id.clone())
            .or_default()
            .push(Subscriber { id, tx });
        Ok(Subscription {
            messages: rx,
            handle: Arc::new(SimSubscriptionHandle {
                bus: self.bus.inner.clone(),
                call_id: call_id.clone(),
                id,
                cancelled: AtomicBool::new(false),
            }),
        })
    }

    async fn publish(
        &self,
        call_id: &CallId,
        message: SignalingMessage,
    ) -> Result<(), anyhow::Error> {
        if self.fail_publish.load(Ordering::SeqCst) {
            anyhow::bail!("publish of {} to {call_id} refused", message.payload.kind());
        }
        let raw = message.encode()?;
        trace!(target: "Sim/Bus", "{call_id} <- {raw}");
        lock(&self.bus.inner.published).push((call_id.clone(), message));
        self.bus.inner.deliver(call_id, &raw)?;
        Ok(())
    }
}

// -- Registry and user updates --

#[derive(Default)]
pub struct SimUserUpdates {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<UserUpdate>>>>,
    fail_subscribe: AtomicBool,
}

impl SimUserUpdates {
    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn push(&self, user_id: &str, update: UserUpdate) {
        if let Some(list) = lock(&self.subscribers).get_mut(user_id) {
            list.retain(|tx| tx.send(update.clone()).is_ok());
        }
    }

    pub fn broadcast(&self, update: UserUpdate) {
        for list in lock(&self.subscribers).values_mut() {
            list.retain(|tx| tx.send(update.clone()).is_ok());
        }
    }
}

#[async_trait]
impl UserUpdates for SimUserUpdates {
    async fn subscribe_user(
        &self,
        user_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<UserUpdate>, anyhow::Error> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            anyhow::bail!("user updates of {user_id} unavailable");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers)
            .entry(user_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Joined(CallId),
    Leaved(CallId),
    Deleted(CallId),
}

/// Records registry calls. Deleting a call tells every subscribed user it
/// stopped.
pub struct SimRegistry {
    updates: Arc<SimUserUpdates>,
    calls: Mutex<Vec<RegistryCall>>,
    fail: AtomicBool,
}

impl SimRegistry {
    pub fn new(updates: Arc<SimUserUpdates>) -> Self {
        Self {
            updates,
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: RegistryCall) -> Result<(), anyhow::Error> {
        lock(&self.calls).push(call);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("registry unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl CallRegistry for SimRegistry {
    async fn joined_call(&self, call_id: &CallId) -> Result<(), anyhow::Error> {
        self.record(RegistryCall::Joined(call_id.clone()))
    }

    async fn leaved_call(&self, call_id: &CallId) -> Result<(), anyhow::Error> {
        self.record(RegistryCall::Leaved(call_id.clone()))
    }

    async fn delete_call(&self, call_id: &CallId) -> Result<(), anyhow::Error> {
        self.record(RegistryCall::Deleted(call_id.clone()))?;
        self.updates.broadcast(UserUpdate::call_stopped(
            call_id.clone(),
            UpdateOwner::user(call_id.as_str()),
        ));
        Ok(())
    }
}

// -- Media --

pub struct SimTrack {
    id: String,
    kind: DeviceKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl SimTrack {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            id: next_id("track"),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for SimTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct SimStream {
    id: String,
    tracks: Vec<Arc<SimTrack>>,
}

impl SimStream {
    pub fn new(kinds: &[DeviceKind]) -> Self {
        Self {
            id: next_id("stream"),
            tracks: kinds.iter().map(|kind| Arc::new(SimTrack::new(*kind))).collect(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|track| track.is_stopped())
    }
}

impl MediaStream for SimStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .map(|track| track.clone() as Arc<dyn MediaTrack>)
            .collect()
    }
}

pub struct SimMediaDevices {
    devices: Vec<MediaDeviceInfo>,
    screen: ScreenInfo,
    facing_mode: bool,
    fail_enumeration: bool,
    capture_error: Option<DeviceError>,
    calls: AtomicUsize,
    streams: Mutex<Vec<Arc<SimStream>>>,
}

impl SimMediaDevices {
    pub fn new(devices: Vec<MediaDeviceInfo>) -> Self {
        Self {
            devices,
            screen: ScreenInfo::new(1280, 800),
            facing_mode: false,
            fail_enumeration: false,
            capture_error: None,
            calls: AtomicUsize::new(0),
            streams: Mutex::new(Vec::new()),
        }
    }

    /// A microphone and a camera.
    pub fn standard() -> Self {
        Self::new(vec![
            MediaDeviceInfo::new(DeviceKind::AudioInput, "default-mic"),
            MediaDeviceInfo::new(DeviceKind::VideoInput, "default-cam"),
        ])
    }

    pub fn with_screen(mut self, screen: ScreenInfo) -> Self {
        self.screen = screen;
        self
    }

    pub fn with_facing_mode(mut self) -> Self {
        self.facing_mode = true;
        self
    }

    pub fn failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }

    pub fn failing_capture(mut self, err: DeviceError) -> Self {
        self.capture_error = Some(err);
        self
    }

    pub fn get_user_media_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> Vec<Arc<SimStream>> {
        lock(&self.streams).clone()
    }
}

#[async_trait]
impl MediaDevices for SimMediaDevices {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, anyhow::Error> {
        if self.fail_enumeration {
            anyhow::bail!("enumerateDevices not available");
        }
        Ok(self.devices.clone())
    }

    fn screen(&self) -> ScreenInfo {
        self.screen
    }

    fn supports_facing_mode(&self) -> bool {
        self.facing_mode
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn MediaStream>, DeviceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.capture_error {
            return Err(err.clone());
        }
        let mut kinds = Vec::with_capacity(2);
        if constraints.audio {
            kinds.push(DeviceKind::AudioInput);
        }
        if constraints.video.is_enabled() {
            kinds.push(DeviceKind::VideoInput);
        }
        let stream = Arc::new(SimStream::new(&kinds));
        lock(&self.streams).push(stream.clone());
        Ok(stream)
    }
}

// -- Peer connections --

/// A connection operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStep {
    AddStream,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddCandidate,
}

pub struct SimPeerConnection {
    id: String,
    config: PeerConfiguration,
    events: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
    failing: Option<SimStep>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    local_streams: Mutex<Vec<Arc<dyn MediaStream>>>,
    remote_streams: Mutex<Vec<Arc<SimStream>>>,
    candidates: Mutex<Vec<Option<IceCandidate>>>,
    offers: AtomicUsize,
    closed: AtomicBool,
}

impl SimPeerConnection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &PeerConfiguration {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remote candidates applied so far; `None` is an end-of-candidates.
    pub fn applied_candidates(&self) -> Vec<Option<IceCandidate>> {
        lock(&self.candidates).clone()
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn local_stream_count(&self) -> usize {
        lock(&self.local_streams).len()
    }

    pub fn remote_sim_streams(&self) -> Vec<Arc<SimStream>> {
        lock(&self.remote_streams).clone()
    }

    /// Emit an event as the engine would.
    pub fn emit(&self, event: PeerEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    fn check(&self, step: SimStep) -> Result<(), anyhow::Error> {
        if self.is_closed() {
            anyhow::bail!("connection {} is closed", self.id);
        }
        if self.failing == Some(step) {
            anyhow::bail!("{step:?} failed on {}", self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for SimPeerConnection {
    async fn add_stream(&self, stream: Arc<dyn MediaStream>) -> Result<(), anyhow::Error> {
        self.check(SimStep::AddStream)?;
        let tracks = stream.tracks().len();
        lock(&self.local_streams).push(stream);
        // One negotiation-needed per added track until a remote description exists.
        if lock(&self.remote).is_none() {
            for _ in 0..tracks.max(1) {
                self.emit(PeerEvent::NegotiationNeeded);
            }
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, anyhow::Error> {
        self.check(SimStep::CreateOffer)?;
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("v=0\r\no=sim {} {n} IN IP4 0.0.0.0\r\n", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, anyhow::Error> {
        self.check(SimStep::CreateAnswer)?;
        if lock(&self.remote).is_none() {
            anyhow::bail!("no remote offer on {}", self.id);
        }
        Ok(SessionDescription::answer(format!("v=0\r\no=sim {} 1 IN IP4 0.0.0.0\r\n", self.id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), anyhow::Error> {
        self.check(SimStep::SetLocalDescription)?;
        *lock(&self.local) = Some(desc);
        self.emit(PeerEvent::IceCandidate(Some(
            IceCandidate::new(format!("candidate:1 1 udp 2122260223 10.0.0.1 9 typ host ufrag {}", self.id))
                .with_sdp_mid("0")
                .with_sdp_m_line_index(0),
        )));
        self.emit(PeerEvent::IceCandidate(None));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), anyhow::Error> {
        self.check(SimStep::SetRemoteDescription)?;
        *lock(&self.remote) = Some(desc);
        let stream = Arc::new(SimStream::new(&[DeviceKind::AudioInput, DeviceKind::VideoInput]));
        lock(&self.remote_streams).push(stream.clone());
        self.emit(PeerEvent::Track { stream });
        self.emit(PeerEvent::IceConnectionStateChanged(IceConnectionState::Checking));
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local).clone()
    }

    fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.remote).clone()
    }

    async fn add_ice_candidate(
        &self,
        candidate: Option<IceCandidate>,
    ) -> Result<(), anyhow::Error> {
        self.check(SimStep::AddCandidate)?;
        if lock(&self.remote).is_none() {
            anyhow::bail!("candidate before remote description on {}", self.id);
        }
        lock(&self.candidates).push(candidate);
        Ok(())
    }

    fn remote_streams(&self) -> Vec<Arc<dyn MediaStream>> {
        lock(&self.remote_streams)
            .iter()
            .map(|stream| stream.clone() as Arc<dyn MediaStream>)
            .collect()
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            lock(&self.events).take();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SimPeerFactory {
    connections: Mutex<Vec<Arc<SimPeerConnection>>>,
    fail_create: AtomicBool,
    failing: Mutex<Option<SimStep>>,
}

impl SimPeerFactory {
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make `step` fail on connections created from now on.
    pub fn fail_step(&self, step: Option<SimStep>) {
        *lock(&self.failing) = step;
    }

    pub fn connections(&self) -> Vec<Arc<SimPeerConnection>> {
        lock(&self.connections).clone()
    }
}

#[async_trait]
impl PeerConnectionFactory for SimPeerFactory {
    async fn create(
        &self,
        config: &PeerConfiguration,
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), anyhow::Error> {
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("peer connection not available");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(SimPeerConnection {
            id: next_id("pc"),
            config: config.clone(),
            events: Mutex::new(Some(tx)),
            failing: *lock(&self.failing),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            local_streams: Mutex::new(Vec::new()),
            remote_streams: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            offers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        lock(&self.connections).push(connection.clone());
        Ok((connection, rx))
    }
}

// -- View and preferences --

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Error {
        title: MessageKey,
        message: Vec<MessageKey>,
        detail: Option<String>,
        reference: String,
    },
    Stopped(MessageKey),
    Remote { user_id: String, stream_id: String },
    HideRemote { user_id: String },
    ToneStart(Tone),
    ToneStop(Tone),
    CloseWindow(Duration),
}

#[derive(Default)]
pub struct RecordingView {
    events: Mutex<Vec<ViewEvent>>,
}

impl RecordingView {
    pub fn events(&self) -> Vec<ViewEvent> {
        lock(&self.events).clone()
    }

    pub fn error_references(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ViewEvent::Error { reference, .. } => Some(reference),
                _ => None,
            })
            .collect()
    }

    pub fn error_titles(&self) -> Vec<MessageKey> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ViewEvent::Error { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }

    pub fn closed_window(&self) -> bool {
        self.events()
            .iter()
            .any(|event| matches!(event, ViewEvent::CloseWindow(_)))
    }

    pub fn count(&self, wanted: &ViewEvent) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }

    fn push(&self, event: ViewEvent) {
        lock(&self.events).push(event);
    }
}

impl CallView for RecordingView {
    fn show_error(&self, notice: &ErrorNotice, reference: &str) {
        self.push(ViewEvent::Error {
            title: notice.title,
            message: notice.message.clone(),
            detail: notice.detail.clone(),
            reference: reference.to_string(),
        });
    }

    fn show_stopped(&self, message: MessageKey) {
        self.push(ViewEvent::Stopped(message));
    }

    fn show_remote(&self, user_id: &str, stream: Arc<dyn MediaStream>) {
        self.push(ViewEvent::Remote {
            user_id: user_id.to_string(),
            stream_id: stream.id(),
        });
    }

    fn hide_remote(&self, user_id: &str) {
        self.push(ViewEvent::HideRemote {
            user_id: user_id.to_string(),
        });
    }

    fn play_tone(&self, tone: Tone) {
        self.push(ViewEvent::ToneStart(tone));
    }

    fn stop_tone(&self, tone: Tone) {
        self.push(ViewEvent::ToneStop(tone));
    }

    fn close_window(&self, after: Duration) {
        self.push(ViewEvent::CloseWindow(after));
    }
}

#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), anyhow::Error> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// -- Wiring --

/// Shared server side: bus, registry and user updates.
#[derive(Clone)]
pub struct SimNetwork {
    pub bus: SignalingBus,
    pub updates: Arc<SimUserUpdates>,
    pub registry: Arc<SimRegistry>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        let updates = Arc::new(SimUserUpdates::default());
        Self {
            bus: SignalingBus::new(),
            registry: Arc::new(SimRegistry::new(updates.clone())),
            updates,
        }
    }
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A participant with a microphone and a camera.
    pub fn participant(&self, user_id: &str) -> SimParticipant {
        self.participant_with(user_id, SimMediaDevices::standard())
    }

    pub fn participant_with(&self, user_id: &str, devices: SimMediaDevices) -> SimParticipant {
        SimParticipant {
            user_id: user_id.to_string(),
            network: self.clone(),
            channel: self.bus.channel(),
            devices: Arc::new(devices),
            connections: Arc::new(SimPeerFactory::default()),
            view: Arc::new(RecordingView::default()),
            preferences: Arc::new(MemoryPreferences::default()),
        }
    }
}

/// Client side of one user.
pub struct SimParticipant {
    pub user_id: String,
    pub network: SimNetwork,
    pub channel: Arc<SimChannel>,
    pub devices: Arc<SimMediaDevices>,
    pub connections: Arc<SimPeerFactory>,
    pub view: Arc<RecordingView>,
    pub preferences: Arc<MemoryPreferences>,
}

impl SimParticipant {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            channel: self.channel.clone(),
            registry: self.network.registry.clone(),
            updates: self.network.updates.clone(),
            devices: self.devices.clone(),
            connections: self.connections.clone(),
            view: self.view.clone(),
            preferences: self.preferences.clone(),
        }
    }
}
