//! Integration tests for the presence tracking engine
//!
//! These tests drive whole tracking sessions through the public API, with an
//! in-memory backend standing in for the server processes.

use shared::{Notification, NotificationKind, ServerFamily, Signal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracker::backend::ChannelBackend;
use tracker::classifier::{Classifier, RuleTier, SignalKind};
use tracker::config::TrackerConfig;
use tracker::manager::PresenceManager;
use tracker::roster::RosterReconciler;

fn tracking(backend: &Arc<ChannelBackend>) -> PresenceManager {
    PresenceManager::new(backend.clone(), TrackerConfig::default())
}

async fn wait_for_roster(roster: &mut watch::Receiver<Vec<String>>, expected: &[&str]) {
    loop {
        if *roster.borrow_and_update() == expected {
            return;
        }
        roster.changed().await.expect("session ended before roster matched");
    }
}

/// SCENARIO TESTS
mod scenario_tests {
    use super::*;

    const SCENARIO: [&str; 4] = [
        "[Server] UUID of player Alice is 069a79f4-44e9-4726-a5be-fca90e38aaf5",
        "[Server] Alice joined the game",
        "[Server] There are 1 of a max of 20 players online: Alice",
        "[Server] Alice left the game",
    ];

    /// Tests the signal sequence of a full probe/join/list/leave cycle
    #[test]
    fn scenario_signal_sequence() {
        let mut reconciler = RosterReconciler::new("survival", Arc::new(Classifier::default()));

        let outcomes: Vec<_> = SCENARIO
            .iter()
            .map(|line| reconciler.feed_line(line))
            .collect();

        let signals: Vec<Signal> = outcomes.iter().map(|o| o.signal.clone()).collect();
        assert_eq!(
            signals,
            vec![
                Signal::IdentityProbe("Alice".to_string()),
                Signal::Join("Alice".to_string()),
                Signal::RosterSnapshot(vec!["Alice".to_string()]),
                Signal::Leave("Alice".to_string()),
            ]
        );

        let messages: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.notification.as_ref())
            .map(|n| n.message())
            .collect();
        assert_eq!(messages, vec!["Alice joined", "Alice left"]);
        assert!(reconciler.is_empty());
    }

    /// Tests the same cycle through a live tracking session
    #[tokio::test(start_paused = true)]
    async fn scenario_through_session() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        let mut notifications = manager.subscribe_notifications();
        manager.start_tracking("survival", Some(ServerFamily::Java)).unwrap();

        for line in SCENARIO {
            backend.push_line("survival", line);
        }

        let joined = notifications.recv().await.unwrap();
        let left = notifications.recv().await.unwrap();
        assert_eq!(joined, Notification::joined("survival", "Alice"));
        assert_eq!(left.kind, NotificationKind::Left);
        assert_eq!(left.to_string(), "[survival] Alice left");

        assert!(manager.roster("survival").is_empty());
        assert!(notifications.try_recv().is_err());
    }

    /// Tests that listings correct drift without announcing anything
    #[tokio::test(start_paused = true)]
    async fn snapshot_corrects_drift_silently() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        let mut notifications = manager.subscribe_notifications();
        manager.start_tracking("survival", None).unwrap();
        let mut roster = manager.watch_roster("survival").unwrap();

        backend.push_line("survival", "[12:00:01] [Server thread/INFO]: Alice joined the game");
        backend.push_line("survival", "[12:00:02] [Server thread/INFO]: Bob joined the game");
        notifications.recv().await.unwrap();
        notifications.recv().await.unwrap();

        // Bob's leave line was lost; Carol joined before tracking started.
        backend.push_line(
            "survival",
            "[12:01:00] [Server thread/INFO]: There are 2 of a max of 20 players online: Carol, Alice",
        );
        wait_for_roster(&mut roster, &["Carol", "Alice"]).await;
        assert!(notifications.try_recv().is_err());

        backend.push_line("survival", "[12:02:00] [Server thread/INFO]: There are 0 of a max of 20 players online:");
        wait_for_roster(&mut roster, &[]).await;
        assert!(notifications.try_recv().is_err());
    }

    /// Tests that decorated console output still yields clean names
    #[tokio::test(start_paused = true)]
    async fn colored_output_is_normalized() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        let mut notifications = manager.subscribe_notifications();
        manager.start_tracking("survival", None).unwrap();

        backend.push_line(
            "survival",
            "\u{1b}[33m[12:00:01 INFO]: \u{1b}[0mAlice\u{1b}[0m.. joined the game",
        );

        assert_eq!(notifications.recv().await.unwrap().player, "Alice");
        assert_eq!(manager.roster("survival"), vec!["Alice".to_string()]);
    }
}

/// CLASSIFICATION TESTS
mod classification_tests {
    use super::*;

    /// Tests that a family line is claimed by its family and never by the fallback
    #[test]
    fn family_exclusivity() {
        let classifier = Classifier::default();
        let cases = [
            (
                "[12:00:01] [Server thread/INFO]: Alice joined the game",
                SignalKind::Join,
                Signal::Join("Alice".to_string()),
            ),
            (
                "[12:00:09] [Server thread/INFO]: Alice left the game",
                SignalKind::Leave,
                Signal::Leave("Alice".to_string()),
            ),
        ];

        for (line, kind, expected) in cases {
            let (rule, signal) = classifier.classify_with_rule(line).unwrap();
            assert_eq!(rule.tier, RuleTier::Family(ServerFamily::Java), "{}", line);
            assert_eq!(rule.kind, kind);
            assert_eq!(signal, expected);

            // The fallback tier would claim the same line on its own.
            let fallback: Vec<_> = classifier
                .rules()
                .iter()
                .filter(|r| r.tier == RuleTier::Fallback)
                .cloned()
                .collect();
            assert_eq!(Classifier::with_rules(fallback).classify(line), expected);
        }
    }

    /// Tests each dialect against a classifier restricted to it
    #[test]
    fn dialects_by_family() {
        let cases = [
            (
                ServerFamily::Java,
                "[12:00:01] [Server thread/INFO]: Steve left the game",
                Signal::Leave("Steve".to_string()),
            ),
            (
                ServerFamily::Bedrock,
                "[2024-01-01 12:00:00:000 INFO] Player connected: Steve, xuid: 2535416409",
                Signal::Join("Steve".to_string()),
            ),
            (
                ServerFamily::Pocket,
                "[12:00:01] [Server thread/INFO]: Steve[/127.0.0.1:53412] logged out due to client disconnect",
                Signal::Leave("Steve".to_string()),
            ),
        ];

        for (family, line, expected) in cases {
            assert_eq!(Classifier::for_family(Some(family)).classify(line), expected);
        }
    }

    /// Tests that a typed chat line looking like a join is accepted as one
    #[test]
    fn chat_join_is_a_known_false_positive() {
        assert_eq!(
            tracker::classifier::classify("<Mallory> : Alice joined."),
            Signal::Join("Alice".to_string())
        );
    }
}

/// RECONCILIATION TESTS
mod reconciliation_tests {
    use super::*;

    fn list(count: usize) -> Vec<(String, String)> {
        vec![("survival".to_string(), "list".to_string()); count]
    }

    /// Tests the one-shot kick followed by the fixed interval
    #[tokio::test(start_paused = true)]
    async fn listing_requests_follow_schedule() {
        let backend = Arc::new(ChannelBackend::new());
        let config = TrackerConfig::default()
            .with_reconcile_timing(Duration::from_secs(5), Duration::from_secs(30));
        let mut manager = PresenceManager::new(backend.clone(), config);
        manager.start_tracking("survival", None).unwrap();

        sleep(Duration::from_secs(4)).await;
        assert!(backend.take_commands().is_empty());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.take_commands(), list(1));

        sleep(Duration::from_secs(90)).await;
        assert_eq!(backend.take_commands(), list(3));
    }

    /// Tests that the listing reply flows back in as an ordinary line
    #[tokio::test(start_paused = true)]
    async fn listing_reply_updates_roster() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        manager.start_tracking("survival", None).unwrap();
        let mut roster = manager.watch_roster("survival").unwrap();

        assert!(manager.request_reconcile("survival"));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.take_commands(), list(1));

        backend.push_line("survival", "[INFO] There are 2/20 players online: Alice, Bob");
        wait_for_roster(&mut roster, &["Alice", "Bob"]).await;
    }

    /// Tests that a listing whose names follow on later lines leaves the roster alone
    #[tokio::test(start_paused = true)]
    async fn multiline_listing_keeps_roster() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        let mut notifications = manager.subscribe_notifications();
        manager.start_tracking("bedrock", Some(ServerFamily::Bedrock)).unwrap();

        backend.push_line("bedrock", "[2024-01-01 12:00:00:000 INFO] Player connected: Alice, xuid: 1");
        notifications.recv().await.unwrap();

        sleep(Duration::from_secs(4)).await;
        assert_eq!(backend.take_commands(), vec![("bedrock".to_string(), "list".to_string())]);

        backend.push_line("bedrock", "[2024-01-01 12:00:04:000 INFO] There are 1/10 players online:");
        backend.push_line("bedrock", "Alice");
        backend.push_line("bedrock", "[2024-01-01 12:00:05:000 INFO] Player connected: Bob, xuid: 2");
        assert_eq!(notifications.recv().await.unwrap().player, "Bob");

        assert_eq!(
            manager.roster("bedrock"),
            vec!["Alice".to_string(), "Bob".to_string()]
        );
    }

    /// Tests that a rejected listing request leaves the roster alone
    #[tokio::test(start_paused = true)]
    async fn rejected_requests_keep_roster() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        let mut notifications = manager.subscribe_notifications();
        manager.start_tracking("survival", None).unwrap();

        backend.push_line("survival", "[Server] Alice joined the game");
        notifications.recv().await.unwrap();

        backend.set_reject_commands(true);
        sleep(Duration::from_secs(200)).await;

        assert!(manager.is_tracking("survival"));
        assert_eq!(manager.roster("survival"), vec!["Alice".to_string()]);
    }
}

/// LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Tests that servers do not see each other's players
    #[tokio::test(start_paused = true)]
    async fn servers_are_independent() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        let mut notifications = manager.subscribe_notifications();
        manager.start_tracking("survival", None).unwrap();
        manager.start_tracking("creative", None).unwrap();

        backend.push_line("survival", "[Server] Alice joined the game");
        backend.push_line("creative", "[Server] Bob joined the game");
        notifications.recv().await.unwrap();
        notifications.recv().await.unwrap();

        backend.push_line("creative", "[Server] There are 0 of a max of 10 players online:");
        let mut creative = manager.watch_roster("creative").unwrap();
        wait_for_roster(&mut creative, &[]).await;

        assert_eq!(manager.roster("survival"), vec!["Alice".to_string()]);
        assert_eq!(
            manager.tracked_servers(),
            vec!["creative".to_string(), "survival".to_string()]
        );
    }

    /// Tests that stopping cancels the subscription, the timer and the roster
    #[tokio::test(start_paused = true)]
    async fn stop_releases_session() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        let mut notifications = manager.subscribe_notifications();
        manager.start_tracking("survival", None).unwrap();

        backend.push_line("survival", "[Server] Alice joined the game");
        notifications.recv().await.unwrap();

        assert!(manager.stop_tracking("survival").await);
        assert_eq!(backend.subscriber_count("survival"), 0);
        assert!(manager.roster("survival").is_empty());

        backend.push_line("survival", "[Server] Alice left the game");
        sleep(Duration::from_secs(300)).await;
        assert!(notifications.try_recv().is_err());
        assert!(backend.take_commands().is_empty());
    }

    /// Tests that tracking restarts from an empty roster
    #[tokio::test(start_paused = true)]
    async fn restart_begins_empty() {
        let backend = Arc::new(ChannelBackend::new());
        let mut manager = tracking(&backend);
        let mut notifications = manager.subscribe_notifications();

        manager.start_tracking("survival", None).unwrap();
        backend.push_line("survival", "[Server] Alice joined the game");
        notifications.recv().await.unwrap();
        manager.stop_tracking("survival").await;

        manager.start_tracking("survival", None).unwrap();
        assert!(manager.roster("survival").is_empty());

        backend.push_line("survival", "[Server] Alice joined the game");
        assert_eq!(notifications.recv().await.unwrap().message(), "Alice joined");
    }
}
