//! GameClient end-to-end tests

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use realm_session::protocol::events;
    use realm_session::testing::{ScriptHandle, ScriptedChannel};
    use realm_session::{
        ClientError, ClientSettings, ConnectionState, Direction, GameClient,
        MemoryDirectoryStore, MovementPolicy, SessionError,
    };
    use serde_json::json;

    fn settings() -> ClientSettings {
        let mut settings = ClientSettings::default();
        settings.directory.backoff_base_ms = 0;
        settings.directory.backoff_cap_ms = 0;
        settings.session.reconnect_delay_ms = 0;
        settings.session.max_reconnect_attempts = 0;
        settings
    }

    fn store() -> MemoryDirectoryStore {
        let mut store = MemoryDirectoryStore::new();
        store.insert(
            "world:alpha",
            r#"{"worldId":"alpha","name":"Alpha","host":"alpha.example","port":7000}"#,
        );
        store
    }

    fn client_with(
        settings: &ClientSettings,
    ) -> (GameClient<MemoryDirectoryStore, ScriptedChannel>, ScriptHandle) {
        let (channel, script) = ScriptedChannel::new();
        (GameClient::from_settings(store(), channel, settings), script)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // -----------------------------------------------------------------------
    // Join flow
    // -----------------------------------------------------------------------

    #[test]
    fn discover_join_enter_and_move() {
        let (mut client, script) = client_with(&settings());
        script
            .push_frame(
                events::PLAYER_JOINED,
                json!({"playerId": "p2", "displayName": "Bo", "x": 1, "y": 1}),
            )
            .accept_auth("p1", "Ada", 5, 5);
        let t0 = Instant::now();

        tokio_test::block_on(async {
            assert_eq!(client.refresh_worlds().await.len(), 1);
            let auth = client.join_world("alpha", "tok").await.unwrap();
            assert_eq!(auth.player_id, "p1");
            assert_eq!(client.state(), ConnectionState::Connected);
            assert_eq!(client.current_world(), Some("alpha"));

            // Everything since authentication lands when the view subscribes.
            assert_eq!(client.enter_world(), 2);
            assert_eq!(client.world().entity_count(), 2);
            assert_eq!(client.world().controlled().map(|e| e.tile()), Some((5, 5)));
            assert_eq!(client.world().entity("p2").unwrap().display_name, "Bo");

            assert!(client.handle_input(Direction::North, t0).await);
            assert!(!client.handle_input(Direction::North, t0 + ms(50)).await);
            assert_eq!(client.world().controlled().map(|e| e.tile()), Some((5, 6)));

            script.push_frame(events::PLAYER_MOVED, json!({"playerId": "p1", "x": 5, "y": 6}));
            assert!(client.pump().await.unwrap());
        });

        assert_eq!(script.opened(), vec!["http://alpha.example:7000"]);
        assert_eq!(script.sent_events(), vec!["auth", "move"]);
        assert_eq!(script.sent()[1].payload, json!({"direction": "north"}));
        assert!(client.world().pending_move().is_none());
        assert_eq!(client.world().corrections(), 0);
    }

    #[test]
    fn held_key_repeats_once_per_cooldown() {
        let (mut client, script) = client_with(&settings());
        script.accept_auth("p1", "Ada", 0, 0);
        let t0 = Instant::now();

        tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("alpha", "tok").await.unwrap();
            client.enter_world();

            assert!(client.handle_input(Direction::East, t0).await);
            assert!(!client.handle_input(Direction::East, t0 + ms(199)).await);
            assert!(client.handle_input(Direction::East, t0 + ms(200)).await);
        });

        assert_eq!(script.sent_count(events::MOVE), 2);
        assert_eq!(client.world().controlled().map(|e| e.tile()), Some((2, 0)));
    }

    #[test]
    fn edge_triggered_policy_needs_a_release() {
        let mut settings = settings();
        settings.movement.policy = MovementPolicy::EdgeTriggered;
        let (mut client, script) = client_with(&settings);
        script.accept_auth("p1", "Ada", 0, 0);
        let t0 = Instant::now();

        tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("alpha", "tok").await.unwrap();
            client.enter_world();

            assert!(client.handle_input(Direction::South, t0).await);
            assert!(!client.handle_input(Direction::South, t0 + ms(500)).await);
            client.release_input();
            assert!(client.handle_input(Direction::South, t0 + ms(600)).await);
        });

        assert_eq!(script.sent_count(events::MOVE), 2);
        assert_eq!(client.world().controlled().map(|e| e.tile()), Some((0, -2)));
    }

    #[test]
    fn authoritative_move_corrects_prediction() {
        let (mut client, script) = client_with(&settings());
        script.accept_auth("p1", "Ada", 0, 0);

        tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("alpha", "tok").await.unwrap();
            client.enter_world();

            assert!(client.handle_input(Direction::West, Instant::now()).await);
            // Server refused the move: still at the origin.
            script.push_frame(events::PLAYER_MOVED, json!({"playerId": "p1", "x": 0, "y": 0}));
            client.pump().await.unwrap();
        });

        assert_eq!(client.world().controlled().map(|e| e.tile()), Some((0, 0)));
        assert_eq!(client.world().corrections(), 1);
    }

    // -----------------------------------------------------------------------
    // Failure paths
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_world_is_rejected_without_connecting() {
        let (mut client, script) = client_with(&settings());

        let err = tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("omega", "tok").await.unwrap_err()
        });

        assert!(matches!(err, ClientError::UnknownWorld(ref id) if id == "omega"));
        assert!(script.opened().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn input_before_entering_world_is_ignored() {
        let (mut client, script) = client_with(&settings());
        script.accept_auth("p1", "Ada", 0, 0);

        tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("alpha", "tok").await.unwrap();
            assert!(!client.handle_input(Direction::North, Instant::now()).await);
        });
        assert_eq!(script.sent_count(events::MOVE), 0);
    }

    #[test]
    fn input_after_control_disconnect_is_not_predicted() {
        let (mut client, script) = client_with(&settings());
        script.accept_auth("p1", "Ada", 0, 0);

        tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("alpha", "tok").await.unwrap();
            client.enter_world();

            client.control().disconnect();
            assert!(!client.handle_input(Direction::North, Instant::now()).await);
        });

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.world().controlled().map(|e| e.tile()), Some((0, 0)));
        assert!(client.world().pending_move().is_none());
        assert_eq!(script.sent_count(events::MOVE), 0);
    }

    #[test]
    fn refused_move_is_rolled_back() {
        let (mut client, script) = client_with(&settings());
        script.accept_auth("p1", "Ada", 0, 0);
        let t0 = Instant::now();

        tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("alpha", "tok").await.unwrap();
            client.enter_world();

            script.refuse_sends(events::MOVE);
            assert!(!client.handle_input(Direction::North, t0).await);
            assert_eq!(client.world().controlled().map(|e| e.tile()), Some((0, 0)));
            assert!(client.world().pending_move().is_none());
        });

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(script.sent_count(events::MOVE), 0);
    }

    #[test]
    fn lost_connection_clears_world() {
        let (mut client, script) = client_with(&settings());
        script.accept_auth("p1", "Ada", 0, 0);

        let err = tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("alpha", "tok").await.unwrap();
            client.enter_world();
            assert_eq!(client.world().entity_count(), 1);
            client.pump().await.unwrap_err()
        });

        assert!(matches!(
            err,
            ClientError::Session(SessionError::ConnectionLost { .. })
        ));
        assert_eq!(client.world().entity_count(), 0);
        assert!(client.current_world().is_none());
        assert!(client.control().connection_lost());
    }

    #[test]
    fn disconnect_clears_world_and_blocks_input() {
        let (mut client, script) = client_with(&settings());
        script.accept_auth("p1", "Ada", 0, 0);

        tokio_test::block_on(async {
            client.refresh_worlds().await;
            client.join_world("alpha", "tok").await.unwrap();
            client.enter_world();
            client.disconnect().await;
            assert!(!client.handle_input(Direction::North, Instant::now()).await);
        });

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.world().entity_count(), 0);
        assert_eq!(script.sent_count(events::MOVE), 0);
        assert_eq!(client.worlds().len(), 1);
    }
}
