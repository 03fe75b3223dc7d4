mod common;

#[cfg(test)]
mod tests {
    use crate::common::behaviours::{
        FailingBehaviour, GatedBehaviour, PacedBehaviour, RecordingBehaviour,
    };
    use crate::common::rpc::node_on;
    use crate::common::util::eventually;
    use gantry::{
        Broker, BrokerError, Dispatch, Execution, MemoryBroker, ServiceAddress, ServiceError,
        ServiceKind,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn work_address() -> ServiceAddress {
        ServiceAddress::new("jobs", "resize")
    }

    async fn publish(broker: &Arc<MemoryBroker>, address: &ServiceAddress, body: &str) {
        broker
            .publish(
                Dispatch::builder()
                    .exchange(address.namespace())
                    .routing_key(address.routing_key())
                    .body(body.as_bytes())
                    .build(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn serial_execution_completes_each_handler_before_the_next() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let (behaviour, log) = PacedBehaviour::new();
        node.host(
            work_address(),
            ServiceKind::Balanced,
            Execution::Serial,
            behaviour,
        )
        .await
        .unwrap();

        // When
        for n in 1..=5 {
            publish(&broker, &work_address(), &n.to_string()).await;
        }
        eventually(|| log.lock().len() == 10).await;

        // Then: strictly start/end pairs in delivery order
        let expected: Vec<String> = (1..=5)
            .flat_map(|n| [format!("start:{}", n), format!("end:{}", n)])
            .collect();
        assert_eq!(*log.lock(), expected);
    }

    #[tokio::test]
    async fn parallel_execution_overlaps_handlers() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let (behaviour, log) = GatedBehaviour::new();
        node.host(
            work_address(),
            ServiceKind::Balanced,
            Execution::Parallel,
            behaviour,
        )
        .await
        .unwrap();

        // When: four handlers block on the gate until the fifth message opens it
        for body in ["1", "2", "3", "4", "release"] {
            publish(&broker, &work_address(), body).await;
        }
        eventually(|| log.lock().len() == 10).await;

        // Then: every blocked handler finished only after the gate opener started
        let entries = log.lock().clone();
        let release_start = entries
            .iter()
            .position(|entry| entry == "start:release")
            .unwrap();
        for n in 1..=4 {
            let end = entries
                .iter()
                .position(|entry| entry == &format!("end:{}", n))
                .unwrap();
            assert!(end > release_start);
        }
    }

    #[tokio::test]
    async fn fanout_services_each_receive_a_copy() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let (first, first_log) = RecordingBehaviour::new();
        let (second, second_log) = RecordingBehaviour::new();
        node.host(
            work_address(),
            ServiceKind::Fanout,
            Execution::Serial,
            first,
        )
        .await
        .unwrap();
        node.host(
            work_address(),
            ServiceKind::Fanout,
            Execution::Serial,
            second,
        )
        .await
        .unwrap();

        // When
        publish(&broker, &work_address(), "announcement").await;
        eventually(|| first_log.lock().len() == 1 && second_log.lock().len() == 1).await;

        // Then
        assert_eq!(*first_log.lock(), vec!["announcement".to_string()]);
        assert_eq!(*second_log.lock(), vec!["announcement".to_string()]);
    }

    #[tokio::test]
    async fn balanced_services_share_the_work() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let (first, first_log) = RecordingBehaviour::new();
        let (second, second_log) = RecordingBehaviour::new();
        node.host(
            work_address(),
            ServiceKind::Balanced,
            Execution::Serial,
            first,
        )
        .await
        .unwrap();
        node.host(
            work_address(),
            ServiceKind::Balanced,
            Execution::Serial,
            second,
        )
        .await
        .unwrap();

        // When
        for n in 1..=4 {
            publish(&broker, &work_address(), &n.to_string()).await;
        }
        eventually(|| first_log.lock().len() + second_log.lock().len() == 4).await;

        // Then: every message was handled exactly once across the pair
        let mut seen: Vec<String> = first_log.lock().clone();
        seen.extend(second_log.lock().clone());
        seen.sort();
        assert_eq!(seen, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn singleton_uniqueness_is_broker_enforced() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let (first, _first_log) = RecordingBehaviour::new();
        let (second, _second_log) = RecordingBehaviour::new();
        node.host(
            work_address(),
            ServiceKind::Singleton,
            Execution::Serial,
            first,
        )
        .await
        .unwrap();

        // When
        let outcome = node
            .host(
                work_address(),
                ServiceKind::Singleton,
                Execution::Serial,
                second,
            )
            .await;

        // Then
        assert!(matches!(
            outcome,
            Err(ServiceError::Declaration {
                source: BrokerError::ResourceLocked(_),
                ..
            }),
        ));
    }

    #[tokio::test]
    async fn setting_up_twice_is_refused() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let (behaviour, _log) = RecordingBehaviour::new();
        let service = node
            .host(
                work_address(),
                ServiceKind::Balanced,
                Execution::Serial,
                behaviour,
            )
            .await
            .unwrap();

        // When
        let outcome = service.setup(&node.broker()).await;

        // Then
        assert!(matches!(outcome, Err(ServiceError::AlreadySetup(_))));
    }

    #[tokio::test]
    async fn dispose_stops_consumption_and_is_idempotent() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let (behaviour, log) = RecordingBehaviour::new();
        let service = node
            .host(
                work_address(),
                ServiceKind::Balanced,
                Execution::Serial,
                behaviour,
            )
            .await
            .unwrap();

        // When
        service.dispose().await;
        service.dispose().await;
        publish(&broker, &work_address(), "late").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Then
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn a_disposed_service_can_be_set_up_again() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let (behaviour, log) = RecordingBehaviour::new();
        let service = node
            .host(
                work_address(),
                ServiceKind::Singleton,
                Execution::Serial,
                behaviour,
            )
            .await
            .unwrap();

        // When
        service.dispose().await;
        service.setup(&node.broker()).await.unwrap();
        publish(&broker, &work_address(), "second-life").await;
        eventually(|| log.lock().len() == 1).await;

        // Then
        assert_eq!(*log.lock(), vec!["second-life".to_string()]);
    }

    #[tokio::test]
    async fn failover_moves_services_to_a_new_broker() {
        // Given
        let old_broker = Arc::new(MemoryBroker::new());
        let new_broker = Arc::new(MemoryBroker::new());
        let node = node_on(&old_broker);
        let (behaviour, log) = RecordingBehaviour::new();
        node.host(
            work_address(),
            ServiceKind::Balanced,
            Execution::Serial,
            behaviour,
        )
        .await
        .unwrap();
        publish(&old_broker, &work_address(), "before").await;
        eventually(|| log.lock().len() == 1).await;

        // When
        node.failover(Arc::clone(&new_broker) as Arc<dyn Broker>)
            .await
            .unwrap();
        publish(&new_broker, &work_address(), "after").await;
        eventually(|| log.lock().len() == 2).await;

        // And: traffic on the abandoned broker goes nowhere
        publish(&old_broker, &work_address(), "stray").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Then
        assert_eq!(*log.lock(), vec!["before".to_string(), "after".to_string()]);
    }

    #[tokio::test]
    async fn behaviour_errors_surface_as_faults_and_do_not_stop_the_loop() {
        // Given
        let broker = Arc::new(MemoryBroker::new());
        let node = node_on(&broker);
        let mut faults = node.faults();
        let behaviour = Arc::new(FailingBehaviour {
            error: "boom".to_string(),
        });
        node.host(
            work_address(),
            ServiceKind::Balanced,
            Execution::Serial,
            behaviour,
        )
        .await
        .unwrap();

        // When
        publish(&broker, &work_address(), "first").await;
        publish(&broker, &work_address(), "second").await;
        let first_fault = tokio::time::timeout(Duration::from_secs(5), faults.recv())
            .await
            .unwrap()
            .unwrap();
        let second_fault = tokio::time::timeout(Duration::from_secs(5), faults.recv())
            .await
            .unwrap()
            .unwrap();

        // Then
        assert_eq!(first_fault.message(), "boom");
        assert_eq!(first_fault.behaviour(), "failing");
        assert_eq!(second_fault.message(), "boom");
    }
}
