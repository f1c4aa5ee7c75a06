//! Call scenarios over the in-memory bus.
//!
//! Each test joins real sessions or plays the remote side by injecting wire
//! messages, then checks what crossed the bus and what the view showed.

#[cfg(test)]
mod tests {
    use crate::calls::error::CallError;
    use crate::calls::session::{CallSession, SessionState};
    use crate::calls::state::PeerRole;
    use crate::calls::traits::Tone;
    use crate::config::SessionConfig;
    use crate::sim::{
        RegistryCall, SimMediaDevices, SimNetwork, SimParticipant, SimStep, ViewEvent,
    };
    use std::time::Duration;
    use wccore::media::{DeviceError, DeviceKind, MediaDeviceInfo};
    use wccore::rtc::RtcConfiguration;
    use wccore::update::{UpdateOwner, UserUpdate};
    use wccore::{
        Call, CallId, CandidatePayload, IceCandidate, MessageKey, Payload, Recipient,
        SessionDescription, SignalingMessage,
    };

    const CALL_ID: &str = "abc123";
    const GROUP_ID: &str = "g/space-42";
    const EDGE_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/70.0.3538.102 Safari/537.36 Edge/18.19041";

    macro_rules! eventually {
        ($cond:expr) => {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if $cond {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect(concat!("timed out waiting for ", stringify!($cond)))
        };
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn session(participant: &SimParticipant, call_id: &str) -> CallSession {
        session_with(participant, call_id, SessionConfig::default())
    }

    fn session_with(participant: &SimParticipant, call_id: &str, config: SessionConfig) -> CallSession {
        let call = Call::new(call_id, participant.user_id.as_str()).with_caller("u1");
        CallSession::new(call, config, participant.collaborators())
    }

    /// A message from a remote user that only exists on the wire.
    fn remote(sender: &str, payload: Payload) -> SignalingMessage {
        SignalingMessage::new("webrtc", sender, payload)
    }

    fn offer_wire() -> String {
        SessionDescription::offer("v=0\r\no=remote 1 IN IP4 0.0.0.0\r\n")
            .to_wire()
            .unwrap()
    }

    fn answer_wire() -> String {
        SessionDescription::answer("v=0\r\no=remote 1 IN IP4 0.0.0.0\r\n")
            .to_wire()
            .unwrap()
    }

    fn candidate(text: &str) -> Payload {
        Payload::Candidate(CandidatePayload::Candidate(
            IceCandidate::new(text).with_sdp_mid("0").with_sdp_m_line_index(0),
        ))
    }

    async fn negotiated(session: &CallSession, peers: usize) -> bool {
        let phases = session.peer_phases().await;
        phases.len() == peers && phases.iter().all(|(_, phase)| phase.is_negotiated())
    }

    /// u1 joined alone, u2 announced itself, u1 sent its offer.
    async fn offering(network: &SimNetwork, config: SessionConfig) -> (SimParticipant, CallSession) {
        let u1 = network.participant("u1");
        let s1 = session_with(&u1, CALL_ID, config);
        s1.join().await.unwrap();
        network
            .bus
            .inject(&CALL_ID.into(), &remote("u2", Payload::Hello(Recipient::All)))
            .unwrap();
        eventually!(network
            .bus
            .published_by("u1")
            .iter()
            .any(|m| matches!(m.payload, Payload::Offer(_))));
        (u1, s1)
    }

    #[tokio::test]
    async fn test_one_on_one_call_negotiates_without_errors() {
        let network = SimNetwork::new();
        let (u1, u2) = (network.participant("u1"), network.participant("u2"));
        let (s1, s2) = (session(&u1, CALL_ID), session(&u2, CALL_ID));

        s1.join().await.unwrap();
        s2.join().await.unwrap();
        eventually!(negotiated(&s1, 1).await && negotiated(&s2, 1).await);

        let offerer = s1.peer("u2").await.unwrap().snapshot().await;
        let answerer = s2.peer("u1").await.unwrap().snapshot().await;
        assert_eq!(offerer.role, Some(PeerRole::Offerer));
        assert_eq!(answerer.role, Some(PeerRole::Answerer));

        // Each side applies the other's single candidate; `{}` is never applied.
        let pc1 = u1.connections.connections()[0].clone();
        let pc2 = u2.connections.connections()[0].clone();
        eventually!(pc1.applied_candidates().len() == 1 && pc2.applied_candidates().len() == 1);
        settle().await;
        assert!(pc1.applied_candidates().iter().all(Option::is_some));
        assert!(pc2.applied_candidates().iter().all(Option::is_some));
        assert_eq!(pc1.offers_created(), 1);

        let from_u1 = network.bus.published_by("u1");
        let offers = from_u1.iter().filter(|m| matches!(m.payload, Payload::Offer(_)));
        assert_eq!(offers.count(), 1);
        for message in from_u1.iter().filter(|m| !matches!(m.payload, Payload::Hello(_))) {
            assert_eq!(message.receiver, Some(Recipient::user("u2")));
        }
        assert!(from_u1.iter().any(|m| {
            m.payload == Payload::Candidate(CandidatePayload::EndOfCandidates)
        }));

        assert!(u1.view.error_references().is_empty());
        assert!(u2.view.error_references().is_empty());
        assert_eq!(u1.view.count(&ViewEvent::ToneStart(Tone::Outgoing)), 1);
        assert!(u1.view.events().contains(&ViewEvent::ToneStop(Tone::Outgoing)));
        assert_eq!(u2.view.count(&ViewEvent::ToneStart(Tone::Outgoing)), 0);
        assert!(u1.view.events().iter().any(|e| matches!(e, ViewEvent::Remote { user_id, .. } if user_id == "u2")));

        eventually!(network.registry.calls().len() == 2);
        assert!(network
            .registry
            .calls()
            .iter()
            .all(|c| *c == RegistryCall::Joined(CallId::from(CALL_ID))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_runs_on_spawned_tasks() {
        let network = SimNetwork::new();
        let (u1, u2) = (network.participant("u1"), network.participant("u2"));
        let (s1, s2) = (session(&u1, CALL_ID), session(&u2, CALL_ID));

        let joining = s1.clone();
        tokio::spawn(async move { joining.join().await }).await.unwrap().unwrap();
        let joining = s2.clone();
        tokio::spawn(async move { joining.join().await }).await.unwrap().unwrap();
        eventually!(negotiated(&s1, 1).await && negotiated(&s2, 1).await);

        let hanging_up = s1.clone();
        assert!(tokio::spawn(async move { hanging_up.hang_up().await }).await.unwrap());
        assert_eq!(s1.stopped().await, SessionState::Stopped);
        eventually!(!s1.is_listening());
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        let s1 = session(&u1, CALL_ID);
        s1.join().await.unwrap();
        let call_id = CallId::from(CALL_ID);
        for payload in [
            Payload::Offer(offer_wire()),
            Payload::Answer(answer_wire()),
            candidate("candidate:3 1 udp 1 10.0.0.1 9 typ host"),
        ] {
            network
                .bus
                .inject(&call_id, &remote("u1", payload).to(Recipient::user("u1")))
                .unwrap();
        }
        settle().await;

        assert_eq!(network.bus.published_by("u1").len(), 1);
        assert!(u1.view.error_references().is_empty());
        assert!(s1.peer_ids().await.is_empty());
        assert!(u1.connections.connections().is_empty());
        assert_eq!(s1.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_candidate_is_held_until_answer_applied() {
        let network = SimNetwork::new();
        let (u1, s1) = offering(&network, SessionConfig::default()).await;
        let call_id = CallId::from(CALL_ID);
        let pc = u1.connections.connections()[0].clone();

        network
            .bus
            .inject(&call_id, &remote("u2", candidate("candidate:7 1 udp 1 10.0.0.2 9 typ host")).to(Recipient::user("u1")))
            .unwrap();
        settle().await;
        assert!(pc.applied_candidates().is_empty());
        assert!(!s1.peer("u2").await.unwrap().gate().is_resolved());

        network
            .bus
            .inject(&call_id, &remote("u2", Payload::Answer(answer_wire())).to(Recipient::user("u1")))
            .unwrap();
        eventually!(pc.applied_candidates().len() == 1);
        assert!(negotiated(&s1, 1).await);

        network
            .bus
            .inject(
                &call_id,
                &remote("u2", Payload::Candidate(CandidatePayload::EndOfCandidates)).to(Recipient::user("u1")),
            )
            .unwrap();
        settle().await;
        assert_eq!(pc.applied_candidates().len(), 1);
        assert!(u1.view.error_references().is_empty());
    }

    #[tokio::test]
    async fn test_second_answer_is_dropped() {
        let network = SimNetwork::new();
        let (u1, s1) = offering(&network, SessionConfig::default()).await;
        let call_id = CallId::from(CALL_ID);
        let answer = remote("u2", Payload::Answer(answer_wire())).to(Recipient::user("u1"));

        network.bus.inject(&call_id, &answer).unwrap();
        eventually!(negotiated(&s1, 1).await);
        network.bus.inject(&call_id, &answer).unwrap();
        settle().await;

        assert!(negotiated(&s1, 1).await);
        assert_eq!(s1.state(), SessionState::Active);
        assert!(u1.view.error_references().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_and_misaddressed_messages_are_dropped() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        let s1 = session(&u1, CALL_ID);
        s1.join().await.unwrap();
        let call_id = CallId::from(CALL_ID);

        let mut other_provider = remote("u2", Payload::Hello(Recipient::All));
        other_provider.provider = "jitsi".into();
        network.bus.inject(&call_id, &other_provider).unwrap();
        network
            .bus
            .inject(&call_id, &remote("u2", Payload::Hello(Recipient::user("u3"))))
            .unwrap();
        // Hello is always a broadcast, even when it names us.
        network
            .bus
            .inject(&call_id, &remote("u2", Payload::Hello(Recipient::user("u1"))))
            .unwrap();
        network
            .bus
            .inject(&call_id, &remote("u2", Payload::Answer(answer_wire())).to(Recipient::user("u3")))
            .unwrap();
        network
            .bus
            .inject(&call_id, &remote("u9", candidate("candidate:1")).to(Recipient::user("u1")))
            .unwrap();
        network
            .bus
            .inject(&call_id, &remote("u9", Payload::Bye(Recipient::All)))
            .unwrap();
        settle().await;

        assert!(s1.peer_ids().await.is_empty());
        assert!(u1.connections.connections().is_empty());
        assert!(u1.view.error_references().is_empty());
        assert_eq!(s1.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_malformed_wire_message_is_not_delivered() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        let s1 = session(&u1, CALL_ID);
        s1.join().await.unwrap();

        let raw = r#"{"provider":"webrtc","sender":"u2","hello":"__all__","bye":"__all__"}"#;
        assert!(network.bus.inject_raw(&CALL_ID.into(), raw).is_err());
        settle().await;
        assert!(s1.peer_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_bye_closes_peer_and_stops_listening() {
        let network = SimNetwork::new();
        let (u1, s1) = offering(&network, SessionConfig::default()).await;
        let call_id = CallId::from(CALL_ID);
        let pc = u1.connections.connections()[0].clone();

        network
            .bus
            .inject(&call_id, &remote("u2", Payload::Bye(Recipient::All)))
            .unwrap();
        eventually!(s1.state() == SessionState::Stopped);

        assert!(s1.peer_ids().await.is_empty());
        assert!(pc.is_closed());
        assert!(!s1.is_listening());
        assert_eq!(network.bus.subscriber_count(&call_id), 0);
        assert_eq!(network.bus.inject(&call_id, &remote("u3", Payload::Hello(Recipient::All))).unwrap(), 0);
        // A peer going away is not a hang-up.
        assert!(network.registry.calls().is_empty());
        assert!(!u1.view.closed_window());
        assert!(u1.view.error_references().is_empty());
    }

    #[tokio::test]
    async fn test_hang_up_is_idempotent() {
        let network = SimNetwork::new();
        let (u1, u2) = (network.participant("u1"), network.participant("u2"));
        let (s1, s2) = (session(&u1, CALL_ID), session(&u2, CALL_ID));
        s1.join().await.unwrap();
        s2.join().await.unwrap();
        eventually!(negotiated(&s1, 1).await && negotiated(&s2, 1).await);

        assert!(s1.hang_up().await);
        assert!(!s1.hang_up().await);
        assert!(!s1.unload().await);
        assert_eq!(s1.state(), SessionState::Stopped);

        let deleted = RegistryCall::Deleted(CallId::from(CALL_ID));
        assert_eq!(network.registry.calls().iter().filter(|c| **c == deleted).count(), 1);
        assert_eq!(u1.view.count(&ViewEvent::CloseWindow(Duration::from_millis(1500))), 1);
        assert_eq!(u1.view.count(&ViewEvent::ToneStart(Tone::Complete)), 1);
        assert_eq!(u1.view.count(&ViewEvent::Stopped(MessageKey::CallStopped)), 1);
        assert!(u1.devices.streams()[0].is_stopped());
        assert!(u1.connections.connections()[0].is_closed());

        // The registry told u2 the call stopped.
        eventually!(s2.state() == SessionState::Stopped);
        assert!(!u2.view.closed_window());
        assert!(u2.devices.streams()[0].is_stopped());
        assert_eq!(network.registry.calls().iter().filter(|c| **c == deleted).count(), 1);
    }

    #[tokio::test]
    async fn test_group_hang_up_leaves_call() {
        let network = SimNetwork::new();
        let (u1, u2) = (network.participant("u1"), network.participant("u2"));
        let (s1, s2) = (session(&u1, GROUP_ID), session(&u2, GROUP_ID));
        s1.join().await.unwrap();
        s2.join().await.unwrap();
        eventually!(negotiated(&s1, 1).await && negotiated(&s2, 1).await);

        s2.hang_up().await;
        let calls = network.registry.calls();
        assert!(calls.contains(&RegistryCall::Leaved(CallId::from(GROUP_ID))));
        assert!(!calls.iter().any(|c| matches!(c, RegistryCall::Deleted(_))));
        assert!(!u2.view.closed_window());
        settle().await;
        assert_eq!(s1.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_remote_stop_releases_without_closing_window() {
        let network = SimNetwork::new();
        let (u1, s1) = offering(&network, SessionConfig::default()).await;

        let foreign = UserUpdate::call_stopped("other-call", UpdateOwner::user("u2"));
        assert!(!s1.on_remote_stop(&foreign).await);
        let space_owned = UserUpdate::call_stopped(
            CALL_ID,
            UpdateOwner {
                kind: "space".into(),
                id: Some("s1".into()),
            },
        );
        assert!(!s1.on_remote_stop(&space_owned).await);
        assert_eq!(s1.state(), SessionState::Active);

        network
            .updates
            .push("u1", UserUpdate::call_stopped(CALL_ID, UpdateOwner::user("u2")));
        eventually!(s1.state() == SessionState::Stopped);
        assert!(!u1.view.closed_window());
        assert!(network.registry.calls().is_empty());
        assert!(u1.connections.connections()[0].is_closed());
    }

    #[tokio::test]
    async fn test_missing_microphone_blocks_the_call() {
        let network = SimNetwork::new();
        let devices = SimMediaDevices::new(vec![MediaDeviceInfo::new(DeviceKind::VideoInput, "cam")]);
        let u1 = network.participant_with("u1", devices);
        let s1 = session(&u1, CALL_ID);

        let err = s1.join().await.unwrap_err();
        assert!(matches!(err, CallError::Device(DeviceError::NoAudioInput { video_found: true })));
        assert_eq!(u1.devices.get_user_media_calls(), 0);
        assert!(network.bus.published_by("u1").is_empty());

        eventually!(s1.state() == SessionState::Failed);
        let errors: Vec<ViewEvent> = u1
            .view
            .events()
            .into_iter()
            .filter(|e| matches!(e, ViewEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        let ViewEvent::Error { title, message, detail, .. } = &errors[0] else {
            unreachable!();
        };
        assert_eq!(*title, MessageKey::AudioVideoRequired);
        assert_eq!(*message, vec![MessageKey::NoAudioFound, MessageKey::ButVideoFound]);
        assert!(detail.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_failure_fails_the_session() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        u1.channel.fail_subscribe(true);
        let s1 = session(&u1, CALL_ID);

        let err = s1.join().await.unwrap_err();
        assert!(matches!(err, CallError::Subscribe { .. }));
        assert_eq!(s1.state(), SessionState::Failed);
        assert_eq!(u1.view.error_titles(), vec![MessageKey::ErrorStartingCall]);
        assert!(u1.devices.streams()[0].is_stopped());
        assert!(u1.view.events().contains(&ViewEvent::ToneStop(Tone::Outgoing)));
        assert!(network.bus.published_by("u1").is_empty());
    }

    #[tokio::test]
    async fn test_user_update_failure_keeps_the_call() {
        let network = SimNetwork::new();
        network.updates.fail_subscribe(true);
        let u1 = network.participant("u1");
        let s1 = session(&u1, CALL_ID);

        s1.join().await.unwrap();
        assert_eq!(s1.state(), SessionState::Active);
        assert_eq!(u1.view.error_titles(), vec![MessageKey::ErrorStartingCall]);
        assert_eq!(network.bus.published_by("u1").len(), 1);
    }

    #[tokio::test]
    async fn test_offer_failure_aborts_with_one_reference() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        u1.connections.fail_step(Some(SimStep::CreateOffer));
        let s1 = session(&u1, CALL_ID);
        s1.join().await.unwrap();

        network
            .bus
            .inject(&CALL_ID.into(), &remote("u2", Payload::Hello(Recipient::All)))
            .unwrap();
        eventually!(s1.state() == SessionState::Failed);

        assert_eq!(u1.view.error_references().len(), 1);
        assert_eq!(u1.view.error_titles(), vec![MessageKey::ErrorStartingConnection]);
        assert!(network
            .registry
            .calls()
            .contains(&RegistryCall::Deleted(CallId::from(CALL_ID))));
        assert!(u1.connections.connections()[0].is_closed());
        // A failure is not a hang-up.
        assert!(!u1.view.closed_window());
    }

    #[tokio::test]
    async fn test_connection_creation_failure_is_reported() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        u1.connections.fail_create(true);
        let s1 = session(&u1, CALL_ID);
        s1.join().await.unwrap();

        network
            .bus
            .inject(&CALL_ID.into(), &remote("u2", Payload::Hello(Recipient::All)))
            .unwrap();
        eventually!(s1.state() == SessionState::Failed);

        let errors: Vec<ViewEvent> = u1
            .view
            .events()
            .into_iter()
            .filter(|e| matches!(e, ViewEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ViewEvent::Error { title: MessageKey::ErrorStartingCall, message, .. }
                if message[0] == MessageKey::ConnectionFailed
        ));
        assert!(s1.peer_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_offer_to_answerer_is_dropped() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        let s1 = session(&u1, CALL_ID);
        s1.join().await.unwrap();
        let call_id = CallId::from(CALL_ID);
        let offer = remote("u2", Payload::Offer(offer_wire())).to(Recipient::user("u1"));

        network.bus.inject(&call_id, &offer).unwrap();
        eventually!(negotiated(&s1, 1).await);
        assert_eq!(s1.peer("u2").await.unwrap().snapshot().await.role, Some(PeerRole::Answerer));
        network.bus.inject(&call_id, &offer).unwrap();
        settle().await;

        assert!(negotiated(&s1, 1).await);
        assert_eq!(s1.state(), SessionState::Active);
        assert!(u1.view.error_references().is_empty());
        let answers = network
            .bus
            .published_by("u1")
            .into_iter()
            .filter(|m| matches!(m.payload, Payload::Answer(_)))
            .count();
        assert_eq!(answers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_answer_does_not_trip_the_timeout() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        let config = SessionConfig::default().with_negotiation_timeout(Duration::from_millis(100));
        let s1 = session_with(&u1, CALL_ID, config);
        s1.join().await.unwrap();

        network
            .bus
            .inject(&CALL_ID.into(), &remote("u9", Payload::Answer(answer_wire())).to(Recipient::user("u1")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(s1.state(), SessionState::Active);
        assert!(u1.view.error_references().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_negotiation_timeout_aborts() {
        let network = SimNetwork::new();
        let config = SessionConfig::default().with_negotiation_timeout(Duration::from_millis(100));
        let (u1, s1) = offering(&network, config).await;

        eventually!(s1.state() == SessionState::Failed);
        assert_eq!(u1.view.error_references().len(), 1);
    }

    #[tokio::test]
    async fn test_edge_quirks_shape_configuration_and_candidates() {
        let network = SimNetwork::new();
        let rtc = RtcConfiguration::from_json(
            r#"{"iceServers":[{"urls":["stun:stun.example.org"]},{"urls":["turns:turn.example.org:5349"]}]}"#,
        )
        .unwrap();
        let config = SessionConfig::default().with_rtc(rtc).with_user_agent(EDGE_UA);
        let (u1, s1) = offering(&network, config).await;
        let call_id = CallId::from(CALL_ID);
        let pc = u1.connections.connections()[0].clone();

        assert_eq!(pc.config().ice_servers.len(), 1);
        assert_eq!(pc.config().ice_servers[0].urls, vec!["stun:stun.example.org".to_string()]);

        network
            .bus
            .inject(&call_id, &remote("u2", Payload::Answer(answer_wire())).to(Recipient::user("u1")))
            .unwrap();
        network
            .bus
            .inject(&call_id, &remote("u2", candidate("")).to(Recipient::user("u1")))
            .unwrap();
        eventually!(pc.applied_candidates().len() == 1);
        assert_eq!(pc.applied_candidates()[0], None);
        assert!(negotiated(&s1, 1).await);
    }

    #[tokio::test]
    async fn test_saved_mute_is_applied_to_the_shared_stream() {
        let network = SimNetwork::new();
        let u1 = network.participant("u1");
        crate::calls::traits::PreferenceStore::set(
            u1.preferences.as_ref(),
            "u1@exo.webconferencing.webrtc.video.disable",
            "true",
        )
        .unwrap();
        let s1 = session(&u1, CALL_ID);
        s1.join().await.unwrap();

        assert!(s1.media().audio_enabled());
        assert!(!s1.media().video_enabled());
        assert!(s1.media().toggle_video());
    }
}
