//! Peer negotiation unit: one connection with one remote participant.

use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify, OnceCell, mpsc};
use wccore::{CandidatePayload, IceCandidate, Payload, Recipient, SdpType, SessionDescription};

use super::error::{CallError, NegotiationStep};
use super::gate::{GateState, NegotiationGate};
use super::session::{SessionContext, SessionSignal, TeardownReason};
use super::state::{PeerPhase, PeerState, PeerTransition};
use super::traits::{PeerConnection, PeerEvent};

pub struct PeerNegotiator {
    remote_user_id: String,
    ctx: Arc<SessionContext>,
    connection: Arc<dyn PeerConnection>,
    state: Mutex<PeerState>,
    gate: NegotiationGate,
    attached: OnceCell<()>,
    /// Signalled once an offer was started or received.
    negotiating: Notify,
    answer_taken: AtomicBool,
    closed: AtomicBool,
}

impl PeerNegotiator {
    /// Create the connection for `remote_user_id` and start draining its
    /// events. The connection is created here and nowhere else.
    pub async fn create(
        remote_user_id: impl Into<String>,
        ctx: Arc<SessionContext>,
    ) -> Result<Arc<Self>, CallError> {
        let remote_user_id = remote_user_id.into();
        let (connection, events) = ctx
            .connections
            .create(&ctx.peer_config)
            .await
            .map_err(|e| CallError::negotiation(NegotiationStep::CreateConnection, &remote_user_id, e))?;

        let peer = Arc::new(Self {
            state: Mutex::new(PeerState::new(remote_user_id.clone())),
            remote_user_id,
            ctx,
            connection,
            gate: NegotiationGate::new(),
            attached: OnceCell::new(),
            negotiating: Notify::new(),
            answer_taken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        debug!(target: "Call/Peer", "Created peer {}", peer.label());

        tokio::spawn(peer.clone().drive_events(events));
        if let Some(after) = peer.ctx.negotiation_timeout {
            let watched = peer.clone();
            tokio::spawn(async move {
                // Only peers that started an offer exchange are timed.
                tokio::select! {
                    _ = watched.negotiating.notified() => {}
                    _ = watched.gate.settled() => return,
                }
                if tokio::time::timeout(after, watched.gate.settled()).await.is_err() {
                    watched.ctx.policy.handle(&CallError::NegotiationTimeout {
                        peer: watched.remote_user_id.clone(),
                        after,
                    });
                }
            });
        }
        Ok(peer)
    }

    pub fn remote_user_id(&self) -> &str {
        &self.remote_user_id
    }

    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    pub fn gate(&self) -> &NegotiationGate {
        &self.gate
    }

    pub async fn phase(&self) -> PeerPhase {
        self.state.lock().await.phase.clone()
    }

    pub async fn snapshot(&self) -> PeerState {
        self.state.lock().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn label(&self) -> String {
        format!("{}@{}", self.remote_user_id, self.ctx.call.id)
    }

    /// Attach the shared local stream. On the offering side this is what
    /// triggers negotiation. Resolves once media is attached; concurrent
    /// callers share one attempt.
    pub async fn start(&self) -> Result<(), CallError> {
        self.attached
            .get_or_try_init(|| self.attach_local_media())
            .await
            .map(|_| ())
    }

    async fn attach_local_media(&self) -> Result<(), CallError> {
        let stream = self.ctx.media.stream().await?;
        if self.is_closed() {
            return Err(CallError::Closed(self.remote_user_id.clone()));
        }
        debug!(target: "Call/Peer", "Adding local ({}) stream for {}", self.ctx.call.role(), self.label());
        self.connection
            .add_stream(stream)
            .await
            .map_err(|e| CallError::negotiation(NegotiationStep::AttachMedia, &self.remote_user_id, e))?;
        debug!(target: "Call/Peer", "Started exchange ({}) media information for {}", self.ctx.call.role(), self.label());
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.attached.initialized()
    }

    async fn transition(&self, transition: PeerTransition) -> Result<(), CallError> {
        let mut state = self.state.lock().await;
        state.apply_transition(transition)?;
        trace!(target: "Call/Peer", "Peer {} now {}", self.label(), state.phase.name());
        Ok(())
    }

    async fn unexpected(&self, kind: &'static str) -> CallError {
        CallError::Unexpected {
            kind,
            peer: self.remote_user_id.clone(),
            phase: self.state.lock().await.phase.name(),
        }
    }

    async fn publish(&self, payload: Payload) -> Result<(), CallError> {
        let kind = payload.kind();
        let message = self
            .ctx
            .message(payload)
            .to(Recipient::user(self.remote_user_id.clone()));
        self.ctx
            .channel
            .publish(&self.ctx.call.id, message)
            .await
            .map_err(|source| CallError::Publish {
                kind,
                call_id: self.ctx.call.id.clone(),
                source,
            })
    }

    fn resolve(&self) {
        if self.gate.resolve() {
            debug!(target: "Call/Peer", "Started exchange network information with peer {}", self.label());
            let _ = self.ctx.signals.send(SessionSignal::Negotiated {
                peer: self.remote_user_id.clone(),
            });
        }
    }

    /// Create, apply and send the local offer. Ignored unless the peer is
    /// still fresh, so only one offer is ever sent.
    pub async fn negotiate(&self) -> Result<(), CallError> {
        if self.is_closed() {
            return Ok(());
        }
        if self.transition(PeerTransition::OfferStarted).await.is_err() {
            debug!(target: "Call/Peer", "Skipped negotiation-needed for {} in {}", self.label(), self.phase().await.name());
            return Ok(());
        }
        self.negotiating.notify_one();
        debug!(target: "Call/Peer", "Negotiation starting (by {}) for {}", self.ctx.call.role(), self.label());
        let peer = self.remote_user_id.as_str();

        trace!(target: "Call/Peer", "Creating offer for {}", self.label());
        let offer = self
            .connection
            .create_offer()
            .await
            .map_err(|e| CallError::negotiation(NegotiationStep::CreateOffer, peer, e))?;
        self.connection
            .set_local_description(offer)
            .await
            .map_err(|e| CallError::negotiation(NegotiationStep::SetLocalDescription, peer, e))?;
        let local = self.local_description()?;
        trace!(target: "Call/Peer", "Sending offer for {}", self.label());
        self.publish(Payload::Offer(local.to_wire()?)).await?;
        debug!(target: "Call/Peer", "Published offer for {}", self.label());
        Ok(())
    }

    fn local_description(&self) -> Result<SessionDescription, CallError> {
        self.connection.local_description().ok_or_else(|| {
            CallError::negotiation(
                NegotiationStep::SetLocalDescription,
                &self.remote_user_id,
                anyhow::anyhow!("connection has no local description"),
            )
        })
    }

    fn parse(&self, raw: &str, expected: SdpType) -> Result<SessionDescription, CallError> {
        SessionDescription::from_wire_as(raw, expected).map_err(|source| CallError::Description {
            kind: if expected == SdpType::Offer { "offer" } else { "answer" },
            peer: self.remote_user_id.clone(),
            source,
        })
    }

    /// Apply a remote offer, attach media and answer it.
    pub async fn add_offer(&self, raw: &str) -> Result<(), CallError> {
        if self.transition(PeerTransition::OfferReceived).await.is_err() {
            return Err(self.unexpected("offer").await);
        }
        self.negotiating.notify_one();
        let peer = self.remote_user_id.as_str();
        let offer = self.parse(raw, SdpType::Offer)?;
        trace!(target: "Call/Peer", "Setting remote description (offer) for {}", self.label());
        self.connection
            .set_remote_description(offer)
            .await
            .map_err(|e| CallError::negotiation(NegotiationStep::SetRemoteDescription, peer, e))?;

        self.start().await?;

        trace!(target: "Call/Peer", "Creating answer for {}", self.label());
        let answer = self
            .connection
            .create_answer()
            .await
            .map_err(|e| CallError::negotiation(NegotiationStep::CreateAnswer, peer, e))?;
        self.connection
            .set_local_description(answer)
            .await
            .map_err(|e| CallError::negotiation(NegotiationStep::SetLocalDescription, peer, e))?;
        let local = self.local_description()?;
        self.publish(Payload::Answer(local.to_wire()?)).await?;

        self.transition(PeerTransition::AnswerSent).await?;
        self.transition(PeerTransition::AnswerDelivered).await?;
        self.resolve();
        Ok(())
    }

    /// Apply the remote answer to our offer.
    pub async fn add_answer(&self, raw: &str) -> Result<(), CallError> {
        let awaiting = matches!(self.phase().await, PeerPhase::AwaitingAnswer { .. });
        if !awaiting || self.answer_taken.swap(true, Ordering::SeqCst) {
            return Err(self.unexpected("answer").await);
        }
        let answer = self.parse(raw, SdpType::Answer)?;
        trace!(target: "Call/Peer", "Setting answer (remote description) for {}", self.label());
        self.connection
            .set_remote_description(answer)
            .await
            .map_err(|e| {
                CallError::negotiation(NegotiationStep::SetRemoteDescription, &self.remote_user_id, e)
            })?;
        self.transition(PeerTransition::AnswerReceived).await?;
        self.resolve();
        Ok(())
    }

    /// Apply a remote candidate once negotiation resolved. The `{}` sentinel
    /// is only logged.
    pub async fn add_candidate(&self, payload: CandidatePayload) -> Result<(), CallError> {
        let seq = self.state.lock().await.next_remote_candidate();
        let candidate = match payload {
            CandidatePayload::EndOfCandidates => {
                info!(target: "Call/Peer", "Call connected (added {} ICE candidates) for {}", seq - 1, self.label());
                return Ok(());
            }
            CandidatePayload::Candidate(candidate) => candidate,
        };
        debug!(target: "Call/Peer", "Received candidate ({seq}) for {}", self.label());

        if !self.gate.wait().await || self.is_closed() {
            return Err(CallError::Closed(self.remote_user_id.clone()));
        }
        let candidate = if self.ctx.quirks.null_end_of_candidates && candidate.is_end_of_generation() {
            None
        } else {
            Some(candidate)
        };
        self.connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| CallError::negotiation(NegotiationStep::AddCandidate, &self.remote_user_id, e))?;
        trace!(target: "Call/Peer", "Added candidate ({seq}) for {}", self.label());
        Ok(())
    }

    async fn send_candidate(&self, candidate: Option<IceCandidate>) -> Result<(), CallError> {
        let seq = self.state.lock().await.next_local_candidate();
        debug!(target: "Call/Peer", "ICE candidate ({seq}) ready for {}", self.label());
        if !self.gate.wait().await || self.is_closed() {
            return Err(CallError::Closed(self.remote_user_id.clone()));
        }
        let payload = match candidate {
            Some(candidate) => CandidatePayload::Candidate(candidate),
            None => CandidatePayload::EndOfCandidates,
        };
        self.publish(Payload::Candidate(payload)).await?;
        trace!(target: "Call/Peer", "Sent candidate ({seq}) for {}", self.label());
        Ok(())
    }

    async fn drive_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        while let Some(event) = events.recv().await {
            if self.is_closed() {
                break;
            }
            trace!(target: "Call/Peer", "Peer event for {}: {event:?}", self.label());
            match event {
                PeerEvent::NegotiationNeeded => {
                    let peer = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = peer.negotiate().await {
                            peer.ctx.policy.handle(&e);
                        }
                    });
                }
                PeerEvent::IceCandidate(candidate) => {
                    let peer = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = peer.send_candidate(candidate).await {
                            peer.ctx.policy.handle(&e);
                        }
                    });
                }
                PeerEvent::Track { stream } => {
                    debug!(target: "Call/Peer", "Added remote stream {} for {}", stream.id(), self.label());
                    self.ctx.view.show_remote(&self.remote_user_id, stream);
                }
                PeerEvent::IceConnectionStateChanged(state) => {
                    debug!(target: "Call/Peer", "ICE connection state {state:?} for {}", self.label());
                    if state.is_lost() {
                        self.ctx.view.hide_remote(&self.remote_user_id);
                    }
                }
            }
        }
        trace!(target: "Call/Peer", "Event loop finished for {}", self.label());
    }

    /// Release the connection and ask for local teardown. Runs once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.gate.abandon() {
            debug!(target: "Call/Peer", "Closing {} before negotiation completed", self.label());
        }
        let outcome = self.gate.settled().await;
        if let Err(e) = self.transition(PeerTransition::Close).await {
            warn!(target: "Call/Peer", "Closing {}: {e}", self.label());
        }

        // The local stream belongs to the session; only remote tracks are ours.
        for stream in self.connection.remote_streams() {
            stream.stop();
        }
        if let Err(e) = self.connection.close().await {
            warn!(target: "Call/Peer", "Failed to close peer connection {}: {e}", self.label());
        }
        info!(target: "Call/Peer", "Closed peer {} (negotiation {})", self.label(),
            if outcome == GateState::Resolved { "completed" } else { "abandoned" });

        let _ = self
            .ctx
            .signals
            .send(SessionSignal::Teardown(TeardownReason::PeerClosed));
    }
}
