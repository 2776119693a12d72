//! Integration tests for the transport router
//!
//! Exercises path priority, every routing strategy, escalation for
//! high-value classes, bounded sends, offline queueing and reliability.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use cord_core::{
    ConnectivityEvent, ConnectivityState, EntryClass, Envelope, LogEntry, RouterConfig,
    RoutingStrategy, TransportPath,
};
use cord_runtime::{AppendRequest, DeliveryHealth};
use test_utils::{shared_keys, test_ledger, MockTransports};
use tokio::sync::mpsc;

async fn entry(class: EntryClass, payload: &str) -> LogEntry {
    let keys = shared_keys(&["A1"]);
    test_ledger(&keys)
        .append(AppendRequest::new("A1", "Ana", class, payload))
        .await
        .unwrap()
}

async fn envelope(class: EntryClass, payload: &str) -> Envelope {
    Envelope::new(entry(class, payload).await, TransportPath::None)
}

fn config() -> RouterConfig {
    RouterConfig {
        escalate_critical_classes: false,
        ..RouterConfig::testing()
    }
}

#[tokio::test]
async fn test_best_available_uses_single_highest_priority_path() {
    let mocks = MockTransports::new();
    let router = mocks.router(config(), ConnectivityState::all_up());

    let outcome = router.send(envelope(EntryClass::Chat, "hi").await).await;
    assert_eq!(outcome.path, TransportPath::PrimaryOnline);
    assert_eq!(outcome.legs.len(), 1);
    assert!(outcome.delivered());
    assert!(!outcome.queued);
    assert_eq!(mocks.primary.attempts(), 1);
    assert_eq!(mocks.bridge.attempts(), 0);
    assert_eq!(mocks.mesh.attempts(), 0);
}

#[tokio::test]
async fn test_path_follows_connectivity_events() {
    let mocks = MockTransports::new();
    let router = mocks.router(config(), ConnectivityState::all_up());
    let mut watcher = router.subscribe_path();
    assert_eq!(router.current_path(), TransportPath::PrimaryOnline);

    router.on_connectivity(ConnectivityEvent::TransportConnected {
        path: TransportPath::PrimaryOnline,
        connected: false,
    });
    assert!(watcher.has_changed().unwrap());
    assert_eq!(*watcher.borrow_and_update(), TransportPath::BridgeOnline);

    router.on_connectivity(ConnectivityEvent::InternetReachable(false));
    assert_eq!(router.current_path(), TransportPath::LocalMesh);

    router.on_connectivity(ConnectivityEvent::RadioAvailable(false));
    assert_eq!(router.current_path(), TransportPath::None);

    router.on_connectivity(ConnectivityEvent::InternetReachable(true));
    assert_eq!(router.current_path(), TransportPath::BridgeOnline);
}

#[tokio::test]
async fn test_connectivity_listener_task() {
    let mocks = MockTransports::new();
    let router = Arc::new(mocks.router(config(), ConnectivityState::default()));
    assert_eq!(router.current_path(), TransportPath::None);

    let mut watcher = router.subscribe_path();
    let (events, receiver) = mpsc::unbounded_channel();
    let listener = router.spawn_connectivity_listener(receiver);

    events.send(ConnectivityEvent::RadioAvailable(true)).unwrap();
    tokio::time::timeout(Duration::from_secs(1), watcher.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*watcher.borrow(), TransportPath::LocalMesh);

    drop(events);
    listener.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_leave_path_consistent() {
    let mocks = MockTransports::new();
    let router = Arc::new(mocks.router(config(), ConnectivityState::all_up()));

    for round in 0..20u64 {
        let mut tasks = Vec::new();
        for worker in 0..8u64 {
            let router = router.clone();
            tasks.push(tokio::spawn(async move {
                for step in 0..50u64 {
                    let up = (round + worker + step) % 3 != 0;
                    let event = match (worker + step) % 4 {
                        0 => ConnectivityEvent::InternetReachable(up),
                        1 => ConnectivityEvent::RadioAvailable(up),
                        2 => ConnectivityEvent::TransportConnected {
                            path: TransportPath::PrimaryOnline,
                            connected: up,
                        },
                        _ => ConnectivityEvent::TransportConnected {
                            path: TransportPath::BridgeOnline,
                            connected: up,
                        },
                    };
                    router.on_connectivity(event);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(router.current_path(), router.connectivity().best_path());
    }
}

#[tokio::test]
async fn test_failed_send_is_queued_not_retried_elsewhere() {
    let mocks = MockTransports::new();
    mocks.primary.set_delivering(false);
    let router = mocks.router(config(), ConnectivityState::all_up());

    let outcome = router.send(envelope(EntryClass::Chat, "lost").await).await;
    assert!(!outcome.delivered());
    assert!(outcome.queued);
    assert_eq!(mocks.bridge.attempts(), 0);
    assert_eq!(router.offline_queue().len().await, 1);
    assert_eq!(router.reliability_score(TransportPath::PrimaryOnline).await, 0.0);
}

#[tokio::test]
async fn test_transport_error_counts_as_failure() {
    let mocks = MockTransports::new();
    mocks.primary.set_erroring(true);
    let router = mocks.router(config(), ConnectivityState::all_up());

    let outcome = router.send(envelope(EntryClass::Chat, "boom").await).await;
    assert!(outcome.queued);
    assert!(outcome.legs[0].failure.is_some());
}

#[tokio::test]
async fn test_no_path_goes_straight_to_queue() {
    let mocks = MockTransports::new();
    let router = mocks.router(config(), ConnectivityState::default());

    let outcome = router.send(envelope(EntryClass::Chat, "nobody").await).await;
    assert_eq!(outcome.path, TransportPath::None);
    assert!(outcome.legs.is_empty());
    assert!(outcome.queued);
    assert_eq!(router.delivery_health().await, DeliveryHealth::Offline);
}

#[tokio::test]
async fn test_dual_path_succeeds_if_either_leg_does() {
    let mocks = MockTransports::new();
    mocks.primary.set_delivering(false);
    let router = mocks.router(
        RouterConfig {
            strategy: RoutingStrategy::DualPath,
            ..config()
        },
        ConnectivityState::all_up(),
    );

    let outcome = router.send(envelope(EntryClass::Chat, "both").await).await;
    assert_eq!(outcome.legs.len(), 2);
    assert!(outcome.delivered());
    assert!(!outcome.queued);
    assert_eq!(
        outcome.delivered_paths().collect::<Vec<_>>(),
        vec![TransportPath::LocalMesh]
    );
    assert_eq!(mocks.primary.attempts(), 1);
    assert_eq!(mocks.mesh.attempts(), 1);
}

#[tokio::test]
async fn test_dual_path_legs_run_concurrently() {
    let mocks = MockTransports::new();
    mocks.primary.set_delay(150);
    mocks.mesh.set_delay(150);
    let router = mocks.router(
        RouterConfig {
            strategy: RoutingStrategy::DualPath,
            send_timeout_ms: 1_000,
            ..config()
        },
        ConnectivityState::all_up(),
    );

    let started = tokio::time::Instant::now();
    let outcome = router.send(envelope(EntryClass::Chat, "parallel").await).await;
    assert!(outcome.legs.iter().all(|leg| leg.delivered));
    assert!(started.elapsed() < Duration::from_millis(290));
}

#[tokio::test]
async fn test_critical_classes_escalate_to_dual_path() {
    let mocks = MockTransports::new();
    let router = mocks.router(RouterConfig::testing(), ConnectivityState::all_up());

    let outcome = router.send(envelope(EntryClass::Alert, "fire").await).await;
    assert_eq!(outcome.strategy, RoutingStrategy::DualPath);
    assert_eq!(outcome.legs.len(), 2);

    let outcome = router.send(envelope(EntryClass::Chat, "lunch?").await).await;
    assert_eq!(outcome.strategy, RoutingStrategy::BestAvailable);
    assert_eq!(outcome.legs.len(), 1);
}

#[tokio::test]
async fn test_online_only_and_mesh_only() {
    let mocks = MockTransports::new();
    let router = mocks.router(
        config(),
        ConnectivityState {
            internet_reachable: false,
            radio_available: true,
            primary_connected: true,
            bridge_connected: true,
        },
    );

    let online = router
        .send_with_strategy(envelope(EntryClass::Chat, "up?").await, RoutingStrategy::OnlineOnly)
        .await;
    assert_eq!(online.path, TransportPath::None);
    assert!(online.queued);

    let mesh = router
        .send_with_strategy(envelope(EntryClass::Chat, "near").await, RoutingStrategy::MeshOnly)
        .await;
    assert_eq!(mesh.path, TransportPath::LocalMesh);
    assert!(mesh.delivered());
}

#[tokio::test]
async fn test_slow_transport_times_out() {
    let mocks = MockTransports::new();
    mocks.primary.set_delay(2_000);
    let router = mocks.router(
        RouterConfig {
            send_timeout_ms: 50,
            ..config()
        },
        ConnectivityState::all_up(),
    );

    let started = tokio::time::Instant::now();
    let outcome = router.send(envelope(EntryClass::Chat, "slow").await).await;
    assert!(started.elapsed() < Duration::from_millis(1_000));
    assert!(outcome.queued);
    assert!(outcome.legs[0]
        .failure
        .as_deref()
        .unwrap_or_default()
        .contains("timed out"));
}

#[tokio::test]
async fn test_retry_after_reconnect_drains_queue() {
    let mocks = MockTransports::new();
    let router = mocks.router(config(), ConnectivityState::default());

    router.send(envelope(EntryClass::Chat, "one").await).await;
    router.send(envelope(EntryClass::Chat, "two").await).await;
    assert_eq!(router.offline_queue().len().await, 2);

    router.on_connectivity(ConnectivityEvent::RadioAvailable(true));
    assert_eq!(router.retry_queued().await, 2);
    assert!(router.offline_queue().is_empty().await);
    assert_eq!(mocks.mesh.sent().await.len(), 2);
}

#[tokio::test]
async fn test_reliability_and_health() {
    let mocks = MockTransports::new();
    let router = mocks.router(config(), ConnectivityState::all_up());
    assert_eq!(router.reliability_score(TransportPath::LocalMesh).await, 0.5);

    for i in 0..3 {
        router
            .send(envelope(EntryClass::Chat, &format!("ok {}", i)).await)
            .await;
    }
    assert_eq!(router.reliability_score(TransportPath::PrimaryOnline).await, 1.0);
    assert_eq!(router.delivery_health().await, DeliveryHealth::Healthy);

    mocks.primary.set_delivering(false);
    for i in 0..4 {
        router
            .send(envelope(EntryClass::Chat, &format!("bad {}", i)).await)
            .await;
    }
    assert!(router.reliability_score(TransportPath::PrimaryOnline).await < 0.5);
    assert_eq!(router.delivery_health().await, DeliveryHealth::Degraded);
}
