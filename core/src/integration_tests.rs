//! End-to-end tests: turns in, replies and proactive messages out.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::command::{InboundEvent, NOTIFY_EVENT};
    use crate::config::Config;
    use crate::error::NudgeError;
    use crate::session::{Participant, SessionHandle};
    use crate::store::MemoryStore;
    use crate::transport::{InMemoryAdapter, OutboundMessage};
    use crate::turn::{InboundTurn, TurnController};

    struct Harness {
        controller: TurnController,
        adapter: Arc<InMemoryAdapter>,
        outbox: mpsc::UnboundedReceiver<OutboundMessage>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(Config::default())
        }

        fn with_config(config: Config) -> Self {
            let store = Arc::new(MemoryStore::new());
            let (adapter, outbox) = InMemoryAdapter::new("test");
            let adapter = Arc::new(adapter);
            let controller = TurnController::from_config(&config, store.clone(), adapter.clone());
            Self {
                controller,
                adapter,
                outbox,
                store,
            }
        }

        /// Open a live conversation and return its handle
        fn conversation(&self, id: &str) -> SessionHandle {
            self.adapter.open_conversation(id);
            SessionHandle::new("test", id, format!("user-{}", id))
        }

        async fn say(&self, session: &SessionHandle, text: &str) -> Option<String> {
            self.controller
                .handle_turn(&InboundTurn::message(session.clone(), text))
                .await
                .unwrap()
        }

        async fn notify(&self, session: &SessionHandle, username: &str, message: &str) -> Option<String> {
            let event = InboundEvent {
                name: NOTIFY_EVENT.to_string(),
                payload: json!({ "username": username, "message": message }),
            };
            self.controller
                .handle_turn(&InboundTurn::event(session.clone(), event))
                .await
                .unwrap()
        }

        async fn count(&self, username: &str) -> Option<u64> {
            let registry = self.controller.slot().load().await.unwrap();
            registry.lookup(username).map(|e| e.delivery_count)
        }
    }

    #[tokio::test]
    async fn test_latest_registration_receives_deliveries() {
        let mut h = Harness::new();
        let ops = h.conversation("ops");
        let h1 = h.conversation("h1");
        let h2 = h.conversation("h2");

        let reply = h.say(&h1, "reg alice").await.unwrap();
        assert!(reply.contains("'alice'"));

        let reply = h.say(&ops, "send alice hi").await.unwrap();
        assert_eq!(reply, "Delivered to 'alice' (delivery #1).");
        let sent = h.outbox.recv().await.unwrap();
        assert_eq!(sent.text, "hi");
        assert_eq!(sent.handle, h1);
        assert_eq!(h.count("alice").await, Some(1));

        h.say(&h2, "reg alice").await.unwrap();
        assert_eq!(h.count("alice").await, Some(1), "re-registering keeps the counter");

        let reply = h.say(&ops, "send alice bye").await.unwrap();
        assert_eq!(reply, "Delivered to 'alice' (delivery #2).");
        let sent = h.outbox.recv().await.unwrap();
        assert_eq!(sent.text, "bye");
        assert_eq!(sent.handle, h2);
        assert!(h.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_unknown_user_changes_nothing() {
        let mut h = Harness::new();
        let ops = h.conversation("ops");

        let reply = h.say(&ops, "send bob hello").await.unwrap();
        assert!(reply.contains("'bob' is not registered"));

        assert!(h.outbox.try_recv().is_err());
        assert_eq!(h.store.commit_count(), 0);
        assert!(h.controller.slot().load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_system_event_delivers_silently() {
        let mut h = Harness::new();
        let h1 = h.conversation("h1");
        let producer = h.conversation("ci");
        h.say(&h1, "reg Alice").await.unwrap();

        let reply = h.notify(&producer, "ALICE", "Build #7 failed").await;
        assert_eq!(reply, None);

        let sent = h.outbox.recv().await.unwrap();
        assert_eq!(sent.text, "Build #7 failed");
        assert_eq!(sent.conversation_id, "h1");
        assert_eq!(h.count("alice").await, Some(1));
    }

    #[tokio::test]
    async fn test_system_event_for_unknown_user_is_dropped() {
        let mut h = Harness::new();
        let h1 = h.conversation("h1");
        h.say(&h1, "reg alice").await.unwrap();
        let commits = h.store.commit_count();
        let before = h.controller.slot().load().await.unwrap();

        let reply = h.notify(&h1, "ghost", "boo").await;
        assert_eq!(reply, None);

        assert!(h.outbox.try_recv().is_err());
        assert_eq!(h.store.commit_count(), commits);
        assert_eq!(h.controller.slot().load().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_system_event_to_stale_conversation_is_silent() {
        let mut h = Harness::new();
        let h1 = h.conversation("h1");
        h.say(&h1, "reg alice").await.unwrap();
        h.adapter.close_conversation("h1");

        assert_eq!(h.notify(&h1, "alice", "anyone?").await, None);
        assert!(h.outbox.try_recv().is_err());
        assert_eq!(h.count("alice").await, Some(0));
    }

    #[tokio::test]
    async fn test_live_send_to_stale_conversation_reports_failure() {
        let mut h = Harness::new();
        let h1 = h.conversation("h1");
        let ops = h.conversation("ops");
        h.say(&h1, "reg alice").await.unwrap();
        h.adapter.close_conversation("h1");

        let reply = h.say(&ops, "send alice hello").await.unwrap();
        assert!(reply.starts_with("Could not deliver to 'alice'"));
        assert!(h.outbox.try_recv().is_err());
        assert_eq!(h.count("alice").await, Some(0));
    }

    #[tokio::test]
    async fn test_listing() {
        let h = Harness::new();
        let h1 = h.conversation("h1");

        let empty = h.say(&h1, "show").await.unwrap();
        assert!(empty.starts_with("No users registered"));

        h.say(&h1, "reg zoe").await.unwrap();
        h.say(&h1, "reg adam").await.unwrap();

        let first = h.say(&h1, "SHOW").await.unwrap();
        let second = h.say(&h1, "show").await.unwrap();
        assert_eq!(first, second);
        let zoe = first.find("| zoe | 0 | test/h1 |").unwrap();
        let adam = first.find("| adam | 0 | test/h1 |").unwrap();
        assert!(zoe < adam, "listing keeps registration order");
    }

    #[tokio::test]
    async fn test_malformed_commands_get_usage_hints() {
        let h = Harness::new();
        let h1 = h.conversation("h1");

        assert_eq!(h.say(&h1, "reg").await.unwrap(), "Usage: reg <username>");
        assert_eq!(
            h.say(&h1, "send alice").await.unwrap(),
            "Usage: send <username> <message>"
        );

        let bad_event = InboundEvent {
            name: NOTIFY_EVENT.to_string(),
            payload: json!({ "user": "alice" }),
        };
        let reply = h
            .controller
            .handle_turn(&InboundTurn::event(h1.clone(), bad_event))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.starts_with("Usage: notifyEvent"));
    }

    #[tokio::test]
    async fn test_info_and_help() {
        let h = Harness::new();
        let h1 = h.conversation("h1");

        let info = h.say(&h1, "info").await.unwrap();
        assert!(info.starts_with("Turn context:"));
        assert!(info.contains("\"conversation_id\": \"h1\""));

        let help = h.say(&h1, "what can you do?").await.unwrap();
        assert!(help.contains("send <username> <message>"));
    }

    #[tokio::test]
    async fn test_members_added_are_greeted() {
        let h = Harness::new();
        let h1 = h.conversation("h1");
        let turn = InboundTurn::members_added(
            h1,
            vec![Participant {
                id: "u1".to_string(),
                name: Some("Alice".to_string()),
            }],
        );

        let reply = h.controller.handle_turn(&turn).await.unwrap().unwrap();
        assert!(reply.starts_with("Welcome, Alice!"));
    }

    #[tokio::test]
    async fn test_store_outage_fails_the_turn() {
        let h = Harness::new();
        let h1 = h.conversation("h1");
        h.store.set_unavailable(true);

        let err = h
            .controller
            .handle_turn(&InboundTurn::message(h1, "reg alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, NudgeError::StoreUnavailable(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_lose_no_increments() {
        let mut config = Config::default();
        config.registry.max_commit_attempts = 1_000;
        let mut h = Harness::with_config(config);
        let ops = h.conversation("ops");

        let users = ["ann", "ben", "cat", "dan"];
        for user in users {
            let session = h.conversation(user);
            h.say(&session, &format!("reg {}", user)).await.unwrap();
        }

        let controller = Arc::new(h.controller);
        let mut tasks = Vec::new();
        for round in 0..5 {
            for user in users {
                let controller = controller.clone();
                let ops = ops.clone();
                tasks.push(tokio::spawn(async move {
                    controller
                        .handle_turn(&InboundTurn::message(ops, format!("send {} round {}", user, round)))
                        .await
                }));
            }
        }
        for task in tasks {
            let reply = task.await.unwrap().unwrap().unwrap();
            assert!(reply.starts_with("Delivered"), "{}", reply);
        }

        let registry = controller.slot().load().await.unwrap();
        for user in users {
            assert_eq!(registry.lookup(user).unwrap().delivery_count, 5);
        }

        let mut delivered = 0;
        while h.outbox.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 20);
    }
}
