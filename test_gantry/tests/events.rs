mod common;

#[cfg(test)]
mod tests {
    use crate::common::names::random_token;
    use crate::common::rpc::node_on;
    use crate::common::util::eventually;
    use gantry::{
        Broker, Dispatch, EventAddress, EventDecodeError, EventHeader, EventObserver,
        MemoryBroker, ReceiveError, HEADER_EVENT, SERIALIZER_JSON,
    };
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UserCreated {
        name: String,
    }

    fn user_address() -> EventAddress {
        EventAddress::new("domain", "user.created")
    }

    /// Collects everything an observer sees.
    #[derive(Default)]
    struct CollectingObserver {
        events: SyncMutex<Vec<UserCreated>>,
        errors: SyncMutex<Vec<String>>,
        completed: AtomicBool,
    }

    impl EventObserver<UserCreated> for CollectingObserver {
        fn on_next(&self, event: UserCreated) {
            self.events.lock().push(event);
        }

        fn on_error(&self, error: EventDecodeError) {
            self.errors.lock().push(error.to_string());
        }

        fn on_completed(&self) {
            self.completed.store(true, Ordering::SeqCst);
        }
    }

    /// Publishes a raw message with the given event header line and body.
    async fn publish_raw(
        broker: &Arc<MemoryBroker>,
        address: &EventAddress,
        header_line: &str,
        body: &[u8],
    ) {
        broker
            .publish(
                Dispatch::builder()
                    .exchange(address.namespace())
                    .routing_key(address.routing_key())
                    .header(HEADER_EVENT, header_line.as_bytes())
                    .body(body)
                    .build(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn receives_published_events() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(user_address())
            .await
            .unwrap();
        let event = UserCreated {
            name: random_token(),
        };

        // When
        node.publish_event(&user_address(), SERIALIZER_JSON, &event)
            .await
            .unwrap();
        let received = subscription
            .receive_timeout(Duration::from_secs(5))
            .await
            .unwrap();

        // Then
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn matches_topic_wildcards() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(EventAddress::new("domain", "user.*"))
            .await
            .unwrap();
        let event = UserCreated {
            name: random_token(),
        };

        // When
        node.publish_event(&user_address(), SERIALIZER_JSON, &event)
            .await
            .unwrap();
        let received = subscription
            .receive_timeout(Duration::from_secs(5))
            .await
            .unwrap();

        // Then
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn pull_receive_skips_undecodable_messages() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(user_address())
            .await
            .unwrap();
        let valid = UserCreated {
            name: random_token(),
        };

        // When: a malformed body arrives first, then a valid one
        publish_raw(
            &broker,
            &user_address(),
            &EventHeader::current(SERIALIZER_JSON).to_string(),
            b"not json at all",
        )
        .await;
        node.publish_event(&user_address(), SERIALIZER_JSON, &valid)
            .await
            .unwrap();
        let received = subscription
            .receive_timeout(Duration::from_secs(5))
            .await
            .unwrap();

        // Then: only the valid event comes out
        assert_eq!(received, valid);
    }

    #[tokio::test]
    async fn pull_receive_skips_foreign_versions_and_missing_headers() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(user_address())
            .await
            .unwrap();
        let valid = UserCreated {
            name: random_token(),
        };

        // When
        publish_raw(&broker, &user_address(), "9.9 json", b"{\"name\": \"x\"}").await;
        broker
            .publish(
                Dispatch::builder()
                    .exchange(user_address().namespace())
                    .routing_key(user_address().routing_key())
                    .body(b"{\"name\": \"headerless\"}".as_slice())
                    .build(),
            )
            .await
            .unwrap();
        node.publish_event(&user_address(), SERIALIZER_JSON, &valid)
            .await
            .unwrap();
        let received = subscription
            .receive_timeout(Duration::from_secs(5))
            .await
            .unwrap();

        // Then
        assert_eq!(received, valid);
    }

    #[tokio::test]
    async fn times_out_when_no_event_arrives() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(user_address())
            .await
            .unwrap();

        // When
        let outcome = subscription.receive_timeout(Duration::from_millis(50)).await;

        // Then
        assert_eq!(outcome.unwrap_err(), ReceiveError::Timeout);
    }

    #[tokio::test]
    async fn a_tripped_token_cancels_the_receive() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(user_address())
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        // When
        let pending = subscription.receive_cancel(&cancel);
        cancel.cancel();
        let outcome = pending.await;

        // Then
        assert_eq!(outcome.unwrap_err(), ReceiveError::Cancelled);
    }

    #[tokio::test]
    async fn observers_receive_events_and_completion() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(user_address())
            .await
            .unwrap();
        let observer = Arc::new(CollectingObserver::default());
        subscription.observe(Arc::clone(&observer) as Arc<dyn EventObserver<UserCreated>>);

        // When
        for name in ["ada", "grace"] {
            node.publish_event(
                &user_address(),
                SERIALIZER_JSON,
                &UserCreated {
                    name: name.to_string(),
                },
            )
            .await
            .unwrap();
        }
        eventually(|| observer.events.lock().len() == 2).await;
        subscription.dispose().await;
        eventually(|| observer.completed.load(Ordering::SeqCst)).await;

        // Then
        assert_eq!(observer.events.lock().len(), 2);
        assert!(observer.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn observers_are_told_about_decode_failures() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(user_address())
            .await
            .unwrap();
        let observer = Arc::new(CollectingObserver::default());
        subscription.observe(Arc::clone(&observer) as Arc<dyn EventObserver<UserCreated>>);

        // When
        publish_raw(
            &broker,
            &user_address(),
            &EventHeader::current(SERIALIZER_JSON).to_string(),
            b"gibberish",
        )
        .await;
        eventually(|| !observer.errors.lock().is_empty()).await;

        // Then
        assert_eq!(observer.errors.lock().len(), 1);
        assert!(observer.events.lock().is_empty());
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let subscription = node
            .subscribe::<UserCreated>(user_address())
            .await
            .unwrap();

        // When
        subscription.dispose().await;
        subscription.dispose().await;
        let outcome = subscription.receive().await;

        // Then
        assert_eq!(outcome.unwrap_err(), ReceiveError::Cancelled);
    }
}
