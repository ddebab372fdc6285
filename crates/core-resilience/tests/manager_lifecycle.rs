//! Integration tests for the per-node connection manager

mod support;

use riaktive_core_resilience::prelude::*;
use std::time::Duration;
use support::{fast_backoff, node, TestCluster, TestConnection};
use tokio::sync::mpsc::UnboundedReceiver;

fn manager(
    cluster: &std::sync::Arc<TestCluster>,
    retry_limit: u32,
) -> (
    ConnectionManager<TestConnection>,
    UnboundedReceiver<ManagerEvent<TestConnection>>,
) {
    let config = ManagerConfig {
        retry_limit,
        backoff: fast_backoff(),
    };
    ConnectionManager::standalone(node(8087), config, cluster.factory())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_after_retry_limit_plus_one_attempts() {
    let cluster = TestCluster::new();
    cluster.set_down(8087, true);
    let (manager, mut events) = manager(&cluster, 5);

    manager.connect();

    let mut disconnects = 0;
    loop {
        match events.recv().await {
            Some(ManagerEvent::Disconnected { failures, .. }) => {
                disconnects += 1;
                assert_eq!(failures, disconnects);
            }
            Some(ManagerEvent::Shutdown { failures, .. }) => {
                assert_eq!(failures, 6);
                break;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    assert_eq!(disconnects, 6);
    assert_eq!(cluster.calls(), 6);
    assert_eq!(manager.state(), ManagerState::Shutdown);

    // No further attempts once shut down
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(cluster.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_connected() {
    let cluster = TestCluster::new();
    cluster.script(&[false, false]);
    let (manager, mut events) = manager(&cluster, 5);

    manager.connect();

    assert!(matches!(
        events.recv().await,
        Some(ManagerEvent::Disconnected { failures: 1, .. })
    ));
    assert!(matches!(
        events.recv().await,
        Some(ManagerEvent::Disconnected { failures: 2, .. })
    ));
    match events.recv().await {
        Some(ManagerEvent::Connected { connection, .. }) => assert_eq!(connection.id, 1),
        other => panic!("expected connected, got {:?}", other),
    }

    assert_eq!(manager.state(), ManagerState::Connected);
    assert_eq!(manager.failures(), 0);
    assert_eq!(manager.attempts(), 3);
    assert!(manager.live_epoch().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_reconnects() {
    let cluster = TestCluster::new();
    let (manager, mut events) = manager(&cluster, 5);

    manager.connect();
    let first_epoch = match events.recv().await {
        Some(ManagerEvent::Connected { epoch, .. }) => epoch,
        other => panic!("expected connected, got {:?}", other),
    };

    cluster.drop_connection(1);

    match events.recv().await {
        Some(ManagerEvent::Disconnected {
            failures, reason, ..
        }) => {
            assert_eq!(failures, 1);
            assert_eq!(reason, "connection ended");
        }
        other => panic!("expected disconnected, got {:?}", other),
    }
    match events.recv().await {
        Some(ManagerEvent::Connected {
            epoch, connection, ..
        }) => {
            assert!(epoch > first_epoch);
            assert_eq!(connection.id, 2);
        }
        other => panic!("expected reconnect, got {:?}", other),
    }
    assert_eq!(manager.failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_reconnect() {
    let cluster = TestCluster::new();
    cluster.set_down(8087, true);
    let (manager, mut events) = manager(&cluster, 5);

    manager.connect();
    assert!(matches!(
        events.recv().await,
        Some(ManagerEvent::Disconnected { .. })
    ));

    manager.close();
    assert!(matches!(events.recv().await, Some(ManagerEvent::Closed { .. })));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(cluster.calls(), 1);
    assert_eq!(manager.state(), ManagerState::Closed);
    assert!(manager.connection().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_shutdown_starts_fresh_budget() {
    let cluster = TestCluster::new();
    cluster.set_down(8087, true);
    let (manager, mut events) = manager(&cluster, 0);

    manager.connect();
    assert!(matches!(
        events.recv().await,
        Some(ManagerEvent::Disconnected { .. })
    ));
    assert!(matches!(
        events.recv().await,
        Some(ManagerEvent::Shutdown { .. })
    ));

    cluster.set_down(8087, false);
    manager.connect();
    assert!(matches!(
        events.recv().await,
        Some(ManagerEvent::Connected { .. })
    ));
    assert_eq!(manager.failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_close_reconnects() {
    let cluster = TestCluster::new();
    let (manager, mut events) = manager(&cluster, 5);

    manager.close();
    assert!(manager.state().is_terminal());
    assert!(matches!(events.recv().await, Some(ManagerEvent::Closed { .. })));

    manager.connect();
    assert!(matches!(
        events.recv().await,
        Some(ManagerEvent::Connected { .. })
    ));
    assert_eq!(manager.state(), ManagerState::Connected);
    assert!(!manager.state().is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_detached_manager_is_silent() {
    let cluster = TestCluster::new();
    let (manager, mut events) = manager(&cluster, 5);

    manager.detach();
    manager.detach();
    manager.connect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.state(), ManagerState::Connected);
    assert!(events.recv().await.is_none());
}
