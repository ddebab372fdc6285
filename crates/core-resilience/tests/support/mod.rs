//! Scripted connection factory shared by the resilience integration tests

#![allow(dead_code)]

use riaktive_core_resilience::prelude::*;
use riaktive_core_resilience::PoolStats;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Test connection: a serial number and the port it was opened against
#[derive(Debug)]
pub struct TestConnection {
    pub id: u32,
    pub port: u16,
}

/// Factory whose behaviour is driven by the test
///
/// Scripted outcomes are consumed first; once the script is empty a node is
/// reachable unless its port was marked down.
#[derive(Default)]
pub struct TestCluster {
    script: Mutex<VecDeque<bool>>,
    down: Mutex<HashSet<u16>>,
    calls: AtomicU32,
    next_id: AtomicU32,
    notifiers: Mutex<Vec<(u32, LossNotifier)>>,
}

impl TestCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn ConnectionFactory<TestConnection>> {
        self.clone()
    }

    /// Queue outcomes for the next attempts (true = connect)
    pub fn script(&self, outcomes: &[bool]) {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn set_down(&self, port: u16, down: bool) {
        let mut ports = self.down.lock().unwrap();
        if down {
            ports.insert(port);
        } else {
            ports.remove(&port);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Simulate the remote side closing connection `id`
    pub fn drop_connection(&self, id: u32) {
        let mut notifiers = self.notifiers.lock().unwrap();
        if let Some(pos) = notifiers.iter().position(|(conn, _)| *conn == id) {
            let (_, notifier) = notifiers.remove(pos);
            notifier.end();
        }
    }
}

#[async_trait::async_trait]
impl ConnectionFactory<TestConnection> for TestCluster {
    async fn connect(&self, node: &NodeConfig) -> Result<Link<TestConnection>, ResilienceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.script.lock().unwrap().pop_front();
        let reachable =
            scripted.unwrap_or_else(|| !self.down.lock().unwrap().contains(&node.port));
        if !reachable {
            return Err(ResilienceError::connection_failed(
                node.address(),
                "connection refused",
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (link, notifier) = Link::new(TestConnection {
            id,
            port: node.port,
        });
        self.notifiers.lock().unwrap().push((id, notifier));
        Ok(link)
    }
}

pub fn node(port: u16) -> NodeConfig {
    NodeConfig::new("127.0.0.1", port)
}

pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy::fixed(Duration::from_millis(10))
}

/// Poll pool statistics until `predicate` holds
pub async fn eventually<F>(pool: &ConnectionPool<TestConnection>, predicate: F) -> PoolStats
where
    F: Fn(&PoolStats) -> bool,
{
    for _ in 0..1000 {
        let stats = pool.stats().await;
        if predicate(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pool never reached the expected state: {:?}", pool.stats().await);
}
