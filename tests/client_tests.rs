//! PresenceClient integration tests (in-memory transport, paused clock)

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use world_presence::{
        ActionKind, MemoryTransport, Message, MessageType, MovementFlags, PlayerAction,
        PlayerState, PresenceClient, PresenceConfig, PresenceError, SpatialAudioBridge,
        SpatialAudioSink, Vec3, Zone,
    };

    fn make_client() -> (PresenceClient, MemoryTransport) {
        let transport = MemoryTransport::new();
        let client = PresenceClient::with_transport(PresenceConfig::default(), transport.clone());
        (client, transport)
    }

    async fn connected() -> (PresenceClient, MemoryTransport) {
        let (client, transport) = make_client();
        tokio_test::assert_ok!(client.try_connect().await);
        (client, transport)
    }

    /// Let the pump and timer tasks run without moving the clock.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_ms(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn remote(id: &str) -> PlayerState {
        PlayerState::new(id, format!("name-{}", id))
    }

    fn remote_at(id: &str, x: f32, z: f32) -> PlayerState {
        let mut s = remote(id);
        s.position = Vec3::new(x, 0.0, z);
        s
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let c = Arc::new(AtomicUsize::new(0));
        let read = {
            let c = c.clone();
            move || c.load(Ordering::SeqCst)
        };
        (c, read)
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn connect_fires_connection_change() {
        let (client, transport) = make_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = client.on_connection_change(move |up| s.lock().push(up));

        assert!(client.connect().await);
        assert!(client.is_connected());
        assert_eq!(transport.open_count(), 1);
        assert_eq!(*seen.lock(), vec![true]);

        // Second connect is a no-op.
        assert!(client.connect().await);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(*seen.lock(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_returns_false() {
        let client =
            PresenceClient::with_transport(PresenceConfig::default(), MemoryTransport::refusing());
        assert!(!client.connect().await);
        assert!(!client.is_connected());
        let err = tokio_test::assert_err!(client.try_connect().await);
        assert!(matches!(err, PresenceError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_client_is_disabled() {
        let client = PresenceClient::new(PresenceConfig::default());
        assert!(!client.connect().await);
        assert!(matches!(
            client.try_connect().await,
            Err(PresenceError::Disabled(_))
        ));
        assert!(!client.broadcast_position(Vec3::new(5.0, 0.0, 5.0), 0.0, MovementFlags::idle()));
        assert!(!client.send_action(ActionKind::Wave, None));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_before_connect_is_silent() {
        let (client, transport) = make_client();
        let (count, read) = counter();
        let _sub = client.on_connection_change(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        client.disconnect();
        client.disconnect();
        assert_eq!(read(), 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_says_goodbye_and_clears_table() {
        let (client, transport) = connected().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = client.on_connection_change(move |up| s.lock().push(up));

        transport.inject(Message::update(remote("p1")));
        settle().await;
        assert_eq!(client.player_count(), 1);

        client.disconnect();

        let actions = transport.sent_of(MessageType::PlayerAction);
        assert_eq!(actions.len(), 1);
        assert_eq!(
            actions[0].player_action().map(|a| a.kind),
            Some(ActionKind::Disconnect)
        );
        assert!(transport.is_closed());
        assert!(!client.is_connected());
        assert!(client.players().is_empty());
        assert_eq!(*seen.lock(), vec![false]);

        // No timers survive: a heartbeat interval later nothing new is sent.
        let before = transport.sent().len();
        advance_ms(31_000).await;
        assert_eq!(transport.sent().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_stops_heartbeat_and_restore_resumes_it() {
        let (client, transport) = connected().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = client.on_connection_change(move |up| s.lock().push(up));

        transport.drop_connection("cable pulled");
        settle().await;
        assert!(!client.is_connected());

        advance_ms(31_000).await;
        assert!(transport.sent_of(MessageType::PlayerUpdate).is_empty());

        transport.restore_connection();
        settle().await;
        assert!(client.is_connected());
        advance_ms(30_000).await;
        assert_eq!(transport.sent_of(MessageType::PlayerUpdate).len(), 1);

        assert_eq!(*seen.lock(), vec![false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_after_loss_reports_down_once() {
        let (client, transport) = make_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = client.on_connection_change(move |up| s.lock().push(up));

        assert!(client.connect().await);
        transport.drop_connection("cable pulled");
        settle().await;
        client.disconnect();

        assert_eq!(*seen.lock(), vec![true, false]);
        assert!(transport.is_closed());
        assert!(transport.sent_of(MessageType::PlayerAction).is_empty());
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn own_messages_are_ignored() {
        let (client, transport) = connected().await;
        let (count, read) = counter();
        let _sub = client.on_message(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let (snapshots, read_snapshots) = counter();
        let _players = client.on_players_update(move |_| {
            snapshots.fetch_add(1, Ordering::SeqCst);
        });

        transport.inject(Message::update(remote(client.local_id())));
        // Echo relayed under a different envelope id still names us.
        let mut echo = Message::update(remote(client.local_id()));
        echo.player_id = "relay".into();
        transport.inject(echo);
        settle().await;

        assert!(client.players().is_empty());
        assert_eq!(read(), 0);
        assert_eq!(read_snapshots(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn update_join_and_sync_response_upsert() {
        let (client, transport) = connected().await;
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let s = snapshots.clone();
        let _sub = client.on_players_update(move |snap| s.lock().push(snap.len()));

        transport.inject(Message::join(remote("p1")));
        transport.inject(Message::update(remote_at("p2", 1.0, 2.0)));
        transport.inject(Message::sync_response("p3", remote("p3")));
        settle().await;

        assert_eq!(client.player_count(), 3);
        assert_eq!(*snapshots.lock(), vec![1, 2, 3]);
        assert_eq!(
            client.player("p2").map(|p| p.position),
            Some(Vec3::new(1.0, 0.0, 2.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn later_update_overwrites_entry() {
        let (client, transport) = connected().await;
        transport.inject(Message::update(remote_at("p1", 1.0, 1.0)));
        let mut moved = remote_at("p1", 3.0, 4.0);
        moved.zone = Zone::Art;
        transport.inject(Message::update(moved));
        settle().await;

        let p1 = client.player("p1").unwrap();
        assert_eq!(client.player_count(), 1);
        assert_eq!(p1.position, Vec3::new(3.0, 0.0, 4.0));
        assert_eq!(p1.zone, Zone::Art);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_is_idempotent() {
        let (client, transport) = connected().await;
        let (count, read) = counter();

        transport.inject(Message::update(remote("p1")));
        settle().await;
        let _sub = client.on_players_update(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        transport.inject(Message::leave("p1"));
        transport.inject(Message::leave("p1"));
        transport.inject(Message::leave("never-seen"));
        settle().await;

        assert!(client.players().is_empty());
        assert_eq!(read(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn actions_are_delivered_not_stored() {
        let (client, transport) = connected().await;
        let got = Arc::new(Mutex::new(Vec::new()));
        let g = got.clone();
        let _sub = client.on_action(move |id, action| g.lock().push((id.to_string(), action.kind)));

        transport.inject(Message::action(
            "p2",
            PlayerAction::new(ActionKind::Wave, None),
        ));
        settle().await;

        assert_eq!(*got.lock(), vec![("p2".to_string(), ActionKind::Wave)]);
        assert!(client.players().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_does_not_break_the_link() {
        let (client, transport) = connected().await;
        transport.inject_frame(b"{ definitely not json");
        transport.inject_frame(br#"{"type":"teleport","playerId":"p1","timestamp":0}"#);
        transport.inject(Message::update(remote("p1")));
        settle().await;

        assert!(client.is_connected());
        assert_eq!(client.player_count(), 1);
    }

    #[test]
    fn handle_message_works_without_a_runtime() {
        let client = PresenceClient::new(PresenceConfig::default());
        client.handle_message(Message::update(remote("p1")));
        assert_eq!(client.player_count(), 1);
        client.handle_message(Message::leave("p1"));
        assert_eq!(client.player_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_callbacks_stop_firing() {
        let (client, transport) = connected().await;
        let (count, read) = counter();
        let sub = client.on_players_update(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        transport.inject(Message::update(remote("p1")));
        settle().await;
        sub.unsubscribe();
        transport.inject(Message::update(remote("p2")));
        settle().await;

        assert_eq!(read(), 1);
        assert_eq!(client.player_count(), 2);
    }

    // -----------------------------------------------------------------------
    // Sync requests and heartbeats
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn sync_request_answered_once_state_is_known() {
        let (client, transport) = connected().await;

        transport.inject(Message::sync_request("p2"));
        settle().await;
        assert!(transport.sent_of(MessageType::SyncResponse).is_empty());

        client.broadcast_position(Vec3::new(2.0, 0.0, 0.0), 0.0, MovementFlags::idle());
        transport.inject(Message::sync_request("p2"));
        settle().await;

        let replies = transport.sent_of(MessageType::SyncResponse);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].player_id, client.local_id());
        assert_eq!(
            replies[0].state().map(|s| s.position),
            Some(Vec3::new(2.0, 0.0, 0.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_sent_every_thirty_seconds() {
        let (_client, transport) = connected().await;

        advance_ms(29_000).await;
        assert!(transport.sent_of(MessageType::PlayerUpdate).is_empty());

        advance_ms(1_000).await;
        let beats = transport.sent_of(MessageType::PlayerUpdate);
        assert_eq!(beats.len(), 1);
        assert!(beats[0].state().is_none());

        advance_ms(30_000).await;
        assert_eq!(transport.sent_of(MessageType::PlayerUpdate).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_from_known_peer_keeps_it_alive() {
        let (client, transport) = connected().await;
        transport.inject(Message::update(remote("p1")));
        settle().await;

        advance_ms(50_000).await;
        transport.inject(Message::heartbeat("p1"));
        settle().await;

        advance_ms(50_000).await;
        assert!(client.player("p1").is_some());

        advance_ms(11_000).await;
        assert!(client.player("p1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_from_unknown_peer_is_ignored() {
        let (client, transport) = connected().await;
        let (count, read) = counter();
        let _sub = client.on_players_update(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        transport.inject(Message::heartbeat("stranger"));
        settle().await;
        assert!(client.players().is_empty());
        assert_eq!(read(), 0);
    }

    // -----------------------------------------------------------------------
    // Inactivity eviction
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn silent_player_is_evicted() {
        let (client, transport) = connected().await;
        let (count, read) = counter();
        transport.inject(Message::update(remote("p1")));
        settle().await;
        let _sub = client.on_players_update(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        advance_ms(59_999).await;
        assert!(client.player("p1").is_some());

        advance_ms(2).await;
        assert!(client.player("p1").is_none());
        assert_eq!(read(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn updates_reset_the_inactivity_clock() {
        let (client, transport) = connected().await;

        // t = 0
        transport.inject(Message::update(remote("p1")));
        settle().await;

        // t = 59 000
        advance_ms(59_000).await;
        transport.inject(Message::update(remote_at("p1", 1.0, 0.0)));
        settle().await;

        // t = 119 000: silent for exactly the timeout, not longer.
        advance_ms(60_000).await;
        assert!(client.player("p1").is_some());

        // t = 180 000
        advance_ms(61_000).await;
        assert!(client.player("p1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn custom_inactivity_timeout_is_honoured() {
        let transport = MemoryTransport::new();
        let config = PresenceConfig {
            inactivity_timeout_ms: 5_000,
            ..Default::default()
        };
        let client = PresenceClient::with_transport(config, transport.clone());
        assert!(client.connect().await);

        transport.inject(Message::update(remote("p1")));
        settle().await;
        advance_ms(5_001).await;
        assert!(client.players().is_empty());
    }

    // -----------------------------------------------------------------------
    // Outbound throttling
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn small_moves_are_not_broadcast() {
        let (client, transport) = connected().await;

        assert!(!client.broadcast_position(Vec3::new(0.03, 0.0, 0.0), 0.0, MovementFlags::idle()));
        assert!(client.broadcast_position(Vec3::new(0.06, 0.0, 0.0), 0.0, MovementFlags::idle()));
        // Baseline is the last *sent* position.
        assert!(!client.broadcast_position(Vec3::new(0.10, 0.0, 0.04), 0.0, MovementFlags::idle()));
        assert!(client.broadcast_position(Vec3::new(0.06, 0.0, 0.12), 0.0, MovementFlags::idle()));

        let updates = transport.sent_of(MessageType::PlayerUpdate);
        assert_eq!(updates.len(), 2);
        let last = updates[1].state().unwrap();
        assert_eq!(last.id, client.local_id());
        assert_eq!(last.position, Vec3::new(0.06, 0.0, 0.12));
    }

    #[tokio::test(start_paused = true)]
    async fn vertical_motion_alone_is_not_broadcast() {
        let (client, transport) = connected().await;
        assert!(!client.broadcast_position(Vec3::new(0.0, 10.0, 0.0), 0.0, MovementFlags::idle()));
        assert!(transport.sent_of(MessageType::PlayerUpdate).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn identical_calls_at_origin_send_nothing() {
        let (client, transport) = connected().await;
        client.broadcast_position(Vec3::zero(), 0.0, MovementFlags::idle());
        client.broadcast_position(Vec3::zero(), 0.0, MovementFlags::idle());
        assert!(transport.sent_of(MessageType::PlayerUpdate).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_requires_connection() {
        let (client, transport) = make_client();
        assert!(!client.broadcast_position(Vec3::new(9.0, 0.0, 9.0), 0.0, MovementFlags::idle()));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_flushes_orientation_and_flags() {
        let (client, transport) = connected().await;

        client.broadcast_position(Vec3::zero(), 1.5, MovementFlags::new(true, true));
        assert!(transport.sent_of(MessageType::PlayerUpdate).is_empty());

        advance_ms(1_000).await;
        let updates = transport.sent_of(MessageType::PlayerUpdate);
        assert_eq!(updates.len(), 1);
        let state = updates[0].state().unwrap();
        assert_eq!(state.orientation, 1.5);
        assert!(state.movement.is_sprinting);

        // Nothing changed since: the next tick stays quiet.
        advance_ms(1_000).await;
        assert_eq!(transport.sent_of(MessageType::PlayerUpdate).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_threshold_drift_never_goes_out() {
        let (client, transport) = connected().await;

        for x in [0.01, 0.02, 0.03, 0.04] {
            assert!(!client.broadcast_position(
                Vec3::new(x, 0.0, 0.0),
                0.0,
                MovementFlags::idle()
            ));
            advance_ms(600).await;
        }
        advance_ms(3_000).await;

        assert!(transport.sent_of(MessageType::PlayerUpdate).is_empty());
        assert_eq!(client.local_state().position, Vec3::new(0.04, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn zone_and_emote_go_out_on_next_tick() {
        let (client, transport) = connected().await;
        client.set_zone(Zone::Art);
        client.set_emote(Some("dance".into()));

        advance_ms(1_000).await;
        let updates = transport.sent_of(MessageType::PlayerUpdate);
        assert_eq!(updates.len(), 1);
        let state = updates[0].state().unwrap();
        assert_eq!(state.zone, Zone::Art);
        assert_eq!(state.emote.as_deref(), Some("dance"));
        assert_eq!(client.local_state().zone, Zone::Art);
    }

    #[tokio::test(start_paused = true)]
    async fn send_action_reaches_the_wire() {
        let (client, transport) = connected().await;
        assert!(client.send_action(ActionKind::Emote, Some(serde_json::json!({"tag": "cheer"}))));

        let sent = transport.sent_of(MessageType::PlayerAction);
        assert_eq!(sent.len(), 1);
        let action = sent[0].player_action().unwrap();
        assert_eq!(action.kind, ActionKind::Emote);
        assert_eq!(action.data, Some(serde_json::json!({"tag": "cheer"})));
    }

    // -----------------------------------------------------------------------
    // Spatial audio
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingSink {
        positions: Mutex<Vec<(String, Vec3)>>,
        listener: Mutex<Option<(Vec3, f32)>>,
        removed: Mutex<Vec<String>>,
    }

    impl SpatialAudioSink for RecordingSink {
        fn update_player_position(&self, id: &str, position: Vec3) {
            self.positions.lock().push((id.to_string(), position));
        }

        fn update_listener_position(&self, position: Vec3, rotation: f32) {
            *self.listener.lock() = Some((position, rotation));
        }

        fn remove_player(&self, id: &str) {
            self.removed.lock().push(id.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn audio_bridge_follows_the_table() {
        let (client, transport) = connected().await;
        let sink = Arc::new(RecordingSink::default());
        let bridge = SpatialAudioBridge::attach(&client, sink.clone());

        transport.inject(Message::update(remote_at("p1", 4.0, 2.0)));
        settle().await;
        assert_eq!(
            *sink.positions.lock(),
            vec![("p1".to_string(), Vec3::new(4.0, 0.0, 2.0))]
        );

        transport.inject(Message::leave("p1"));
        settle().await;
        assert_eq!(*sink.removed.lock(), vec!["p1".to_string()]);

        bridge.detach();
        transport.inject(Message::update(remote("p2")));
        settle().await;
        assert_eq!(sink.positions.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn audio_forwarding_is_a_noop_without_sink() {
        let client = PresenceClient::new(PresenceConfig::default());
        client.update_listener_position(Vec3::zero(), 0.0);

        let sink = Arc::new(RecordingSink::default());
        client.set_audio_sink(Some(sink.clone() as Arc<dyn SpatialAudioSink>));
        client.update_listener_position(Vec3::new(1.0, 2.0, 3.0), 0.25);
        client.update_player_position("p1", Vec3::new(5.0, 0.0, 5.0));

        assert_eq!(*sink.listener.lock(), Some((Vec3::new(1.0, 2.0, 3.0), 0.25)));
        assert_eq!(sink.positions.lock().len(), 1);
    }
}
