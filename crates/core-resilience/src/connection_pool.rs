//! Multi-node connection pool with FIFO waiters and failover
//!
//! The pool runs one or more [`ConnectionManager`]s per node and keeps every
//! connected-but-unused connection in a per-node idle queue. Callers
//! [`acquire`](ConnectionPool::acquire) a [`Lease`] and hand it back with
//! [`release`](ConnectionPool::release). When nothing is idle the caller is
//! queued; waiters are served strictly in arrival order as connections come up
//! or are released.
//!
//! Once every manager of every node has exceeded its retry budget the pool is
//! exhausted: all waiters and all later acquisitions fail with
//! [`PoolError::AllNodesUnreachable`] until [`restart`](ConnectionPool::restart)
//! or [`add_node`](ConnectionPool::add_node).

use crate::backoff::BackoffPolicy;
use crate::error::PoolError;
use crate::link::{ConnectionFactory, NodeConfig};
use crate::manager::{ConnectionManager, ManagerConfig, ManagerEvent, ManagerId, ManagerState};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// Callback invoked with the node whose manager exhausted its retries
#[derive(Clone)]
pub struct FailureHook(Arc<dyn Fn(&NodeConfig) + Send + Sync>);

impl FailureHook {
    pub fn new(hook: impl Fn(&NodeConfig) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    fn call(&self, node: &NodeConfig) {
        (self.0)(node)
    }
}

impl fmt::Debug for FailureHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailureHook(..)")
    }
}

/// Configuration for connection pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Consecutive failures each manager tolerates before shutting down
    pub retry_limit: u32,
    /// Delay schedule between reconnect attempts
    pub backoff: BackoffPolicy,
    /// Called once per manager that shuts down
    pub on_node_failed: Option<FailureHook>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            backoff: BackoffPolicy::default(),
            on_node_failed: None,
        }
    }
}

impl PoolConfig {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            retry_limit: self.retry_limit,
            backoff: self.backoff.clone(),
        }
    }
}

/// Takes back leases that were dropped instead of released
trait Reclaim<C>: Send + Sync {
    fn reclaim(self: Arc<Self>, lease: Lease<C>);
}

/// Exclusive use of one pooled connection
///
/// Dereferences to the connection. Hand it back with
/// [`ConnectionPool::release`]. A lease dropped without being released, e.g.
/// because the call using it was cancelled, returns to the pool on its own.
pub struct Lease<C> {
    manager: ManagerId,
    epoch: u64,
    connection: Arc<C>,
    /// Set only while the lease is out with a caller
    home: Option<Weak<dyn Reclaim<C>>>,
}

impl<C> Lease<C> {
    /// Index of the node this connection belongs to
    pub fn node(&self) -> usize {
        self.manager.node
    }

    pub fn manager(&self) -> ManagerId {
        self.manager
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }
}

impl<C> Lease<C> {
    fn new(manager: ManagerId, epoch: u64, connection: Arc<C>) -> Self {
        Self {
            manager,
            epoch,
            connection,
            home: None,
        }
    }

    fn key(&self) -> (ManagerId, u64) {
        (self.manager, self.epoch)
    }
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        let Some(home) = self.home.take().and_then(|home| home.upgrade()) else {
            return;
        };
        debug!(manager = %self.manager, "Lease dropped without release, returning it");
        home.reclaim(Lease::new(
            self.manager,
            self.epoch,
            Arc::clone(&self.connection),
        ));
    }
}

impl<C> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("manager", &self.manager)
            .field("epoch", &self.epoch)
            .finish()
    }
}

type Waiter<C> = oneshot::Sender<Result<Lease<C>, PoolError>>;

struct NodeSlot<C> {
    config: NodeConfig,
    managers: HashMap<ManagerId, ConnectionManager<C>>,
    idle: VecDeque<Lease<C>>,
    down: bool,
}

/// Internal pool state
struct PoolState<C> {
    home: Weak<dyn Reclaim<C>>,
    nodes: Vec<NodeSlot<C>>,
    leased: HashSet<(ManagerId, u64)>,
    waiters: VecDeque<Waiter<C>>,
    shutdown_count: usize,
    exhausted: bool,
    closed: bool,
}

impl<C> PoolState<C> {
    fn take_idle(&mut self) -> Option<Lease<C>> {
        let mut lease = self.nodes.iter_mut().find_map(|node| node.idle.pop_front())?;
        self.leased.insert(lease.key());
        lease.home = Some(self.home.clone());
        Some(lease)
    }

    /// Give `lease` to the oldest waiter still listening, or park it as idle
    fn hand_off(&mut self, mut lease: Lease<C>) {
        while let Some(waiter) = self.waiters.pop_front() {
            let key = lease.key();
            self.leased.insert(key);
            lease.home = Some(self.home.clone());
            match waiter.send(Ok(lease)) {
                Ok(()) => return,
                Err(returned) => {
                    self.leased.remove(&key);
                    match returned {
                        Ok(mut back) => {
                            back.home = None;
                            lease = back;
                        }
                        Err(_) => return,
                    }
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(lease.manager.node) {
            node.idle.push_back(lease);
        }
    }

    /// Take back a lease: re-offer it if its connection is still current
    fn check_in(&mut self, lease: Lease<C>) {
        self.leased.remove(&lease.key());
        if self.closed {
            return;
        }
        if !self.is_live(lease.manager, lease.epoch) {
            debug!(manager = %lease.manager, "Dropping stale connection on release");
            return;
        }
        self.hand_off(lease);
    }

    fn reject_waiters(&mut self, err: PoolError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    fn is_live(&self, manager: ManagerId, epoch: u64) -> bool {
        self.nodes
            .get(manager.node)
            .and_then(|node| node.managers.get(&manager))
            .and_then(|m| m.live_epoch())
            == Some(epoch)
    }
}

/// Creates managers wired to the pool's event channel
struct Spawner<C> {
    config: ManagerConfig,
    factory: Arc<dyn ConnectionFactory<C>>,
    events: mpsc::UnboundedSender<ManagerEvent<C>>,
    serial: AtomicU64,
}

impl<C: Send + Sync + 'static> Spawner<C> {
    fn push_node(&self, state: &mut PoolState<C>, config: NodeConfig) {
        state.nodes.push(NodeSlot {
            config,
            managers: HashMap::new(),
            idle: VecDeque::new(),
            down: false,
        });
        let index = state.nodes.len() - 1;
        self.fill_node(state, index);
    }

    /// Start managers until the node has its configured connection count
    fn fill_node(&self, state: &mut PoolState<C>, index: usize) {
        let Some(node) = state.nodes.get_mut(index) else {
            return;
        };
        let wanted = node.config.connections.max(1);

        while node.managers.len() < wanted {
            let id = ManagerId {
                node: index,
                serial: self.serial.fetch_add(1, Ordering::Relaxed),
            };
            let manager = ConnectionManager::new(
                id,
                node.config.clone(),
                self.config.clone(),
                Arc::clone(&self.factory),
                self.events.clone(),
            );
            manager.connect();
            node.managers.insert(id, manager);
        }
    }
}

struct Shared<C> {
    spawner: Spawner<C>,
    on_node_failed: Option<FailureHook>,
    state: Mutex<PoolState<C>>,
}

impl<C: Send + Sync + 'static> Reclaim<C> for Shared<C> {
    fn reclaim(self: Arc<Self>, lease: Lease<C>) {
        if let Ok(mut state) = self.state.try_lock() {
            state.check_in(lease);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    self.state.lock().await.check_in(lease);
                });
            }
            Err(_) => warn!(manager = %lease.manager, "No runtime to return a dropped lease"),
        }
    }
}

impl<C> Drop for Shared<C> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for node in &mut state.nodes {
            for manager in node.managers.values() {
                manager.detach();
                manager.close();
            }
        }
    }
}

/// Failover-aware connection pool over a list of nodes
///
/// # Example
/// ```no_run
/// use riaktive_core_resilience::{ConnectionFactory, ConnectionPool, Link, NodeConfig, PoolConfig, ResilienceError};
/// use std::sync::Arc;
///
/// struct Socket;
/// struct SocketFactory;
///
/// #[async_trait::async_trait]
/// impl ConnectionFactory<Socket> for SocketFactory {
///     async fn connect(&self, _node: &NodeConfig) -> Result<Link<Socket>, ResilienceError> {
///         Ok(Link::detached(Socket))
///     }
/// }
///
/// # async fn example() -> Result<(), riaktive_core_resilience::PoolError> {
/// let factory: Arc<dyn ConnectionFactory<Socket>> = Arc::new(SocketFactory);
/// let pool = ConnectionPool::new(
///     vec![NodeConfig::new("10.0.0.1", 8087), NodeConfig::new("10.0.0.2", 8087)],
///     factory,
///     PoolConfig::default(),
/// );
///
/// let lease = pool.acquire().await?;
/// // Use connection...
/// pool.release(lease).await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Send + Sync + 'static> ConnectionPool<C> {
    /// Create the pool and start connecting to every node.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn new(
        nodes: Vec<NodeConfig>,
        factory: Arc<dyn ConnectionFactory<C>>,
        config: PoolConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawner = Spawner {
            config: config.manager_config(),
            factory,
            events: tx,
            serial: AtomicU64::new(0),
        };

        let shared = Arc::new_cyclic(|home: &Weak<Shared<C>>| {
            let mut state = PoolState {
                home: home.clone(),
                nodes: Vec::new(),
                leased: HashSet::new(),
                waiters: VecDeque::new(),
                shutdown_count: 0,
                exhausted: false,
                closed: false,
            };
            for node in nodes {
                spawner.push_node(&mut state, node);
            }
            if state.nodes.is_empty() {
                warn!("Connection pool created without nodes");
                state.exhausted = true;
            }

            Shared {
                spawner,
                on_node_failed: config.on_node_failed,
                state: Mutex::new(state),
            }
        });
        tokio::spawn(run_events(Arc::downgrade(&shared), rx));
        Self { shared }
    }

    /// Create a pool with default configuration
    pub fn new_default(nodes: Vec<NodeConfig>, factory: Arc<dyn ConnectionFactory<C>>) -> Self {
        Self::new(nodes, factory, PoolConfig::default())
    }

    /// Obtain a connection, waiting in FIFO order when none is idle
    pub async fn acquire(&self) -> Result<Lease<C>, PoolError> {
        let rx = {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(PoolError::Closed);
            }
            if state.exhausted {
                return Err(PoolError::AllNodesUnreachable);
            }
            if let Some(lease) = state.take_idle() {
                return Ok(lease);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(waiting = state.waiters.len(), "No idle connection, queueing");
            rx
        };

        rx.await.unwrap_or(Err(PoolError::Closed))
    }

    /// Return a leased connection.
    ///
    /// A connection whose manager has since disconnected, shut down or been
    /// replaced is dropped instead of being handed out again.
    pub async fn release(&self, mut lease: Lease<C>) {
        let mut state = self.shared.state.lock().await;
        // Disarm only once the lock is held; cancelled before that, the drop returns it
        lease.home = None;
        state.check_in(lease);
    }

    /// Clear exhaustion and bring every node back to full strength.
    ///
    /// Surviving managers get a fresh retry budget; shut-down ones are replaced.
    pub async fn restart(&self) {
        let mut state = self.shared.state.lock().await;
        state.closed = false;
        state.exhausted = false;
        state.shutdown_count = 0;

        for index in 0..state.nodes.len() {
            let node = &mut state.nodes[index];
            node.down = false;
            for manager in node.managers.values() {
                manager.connect();
            }
            self.shared.spawner.fill_node(&mut state, index);
        }
        info!(nodes = state.nodes.len(), "Connection pool restarted");
    }

    /// Add a node at runtime; clears exhaustion since the new node is not down
    pub async fn add_node(&self, node: NodeConfig) {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            warn!(node = %node, "Ignoring add_node on a closed pool");
            return;
        }
        info!(node = %node, "Adding node to connection pool");
        self.shared.spawner.push_node(&mut state, node);
        state.exhausted = state.shutdown_count >= state.nodes.len();
    }

    /// Close every manager, drop idle connections and fail all waiters
    pub async fn close(&self) {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        for node in &mut state.nodes {
            for (_, manager) in node.managers.drain() {
                manager.detach();
                manager.close();
            }
            node.idle.clear();
        }
        state.reject_waiters(PoolError::Closed);
        info!("Connection pool closed");
    }

    /// First node with a manager that is connected or trying to connect
    pub async fn current_node(&self) -> Option<NodeConfig> {
        let state = self.shared.state.lock().await;
        state
            .nodes
            .iter()
            .find(|node| {
                node.managers.values().any(|m| {
                    matches!(
                        m.state(),
                        ManagerState::Connected | ManagerState::Connecting
                    )
                })
            })
            .map(|node| node.config.clone())
    }

    /// Get current pool statistics
    pub async fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().await;
        let mut stats = PoolStats {
            nodes: state.nodes.len(),
            down_nodes: state.shutdown_count,
            managers: 0,
            connected: 0,
            idle: 0,
            leased: state.leased.len(),
            waiting: state.waiters.len(),
            exhausted: state.exhausted,
            closed: state.closed,
        };
        for node in &state.nodes {
            stats.managers += node.managers.len();
            stats.connected += node
                .managers
                .values()
                .filter(|m| m.state() == ManagerState::Connected)
                .count();
            stats.idle += node.idle.len();
        }
        stats
    }
}

impl<C: Send + Sync + 'static> Shared<C> {
    async fn handle(&self, event: ManagerEvent<C>) {
        let mut failed_node = None;
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            let id = event.manager();
            let Some(node) = state.nodes.get_mut(id.node) else {
                return;
            };
            if !node.managers.contains_key(&id) {
                debug!(manager = %id, "Ignoring event from detached manager");
                return;
            }

            match event {
                ManagerEvent::Connected {
                    manager,
                    epoch,
                    connection,
                } => {
                    state.hand_off(Lease::new(manager, epoch, connection));
                }
                ManagerEvent::Disconnected { manager, .. } => {
                    node.idle.retain(|lease| lease.manager != manager);
                }
                ManagerEvent::Shutdown { manager, failures } => {
                    node.idle.retain(|lease| lease.manager != manager);
                    if let Some(m) = node.managers.remove(&manager) {
                        m.detach();
                    }
                    failed_node = Some(node.config.clone());

                    if node.managers.is_empty() && !node.down {
                        node.down = true;
                        state.shutdown_count += 1;
                        warn!(
                            node = %id.node,
                            failures,
                            down = state.shutdown_count,
                            total = state.nodes.len(),
                            "Node unreachable"
                        );
                    }

                    if state.shutdown_count >= state.nodes.len() && !state.exhausted {
                        state.exhausted = true;
                        error!(
                            waiting = state.waiters.len(),
                            "All nodes were unreachable, rejecting pending requests"
                        );
                        state.reject_waiters(PoolError::AllNodesUnreachable);
                    }
                }
                // The pool detaches its managers before closing them
                ManagerEvent::Closed { .. } => {}
            }
        }

        if let (Some(hook), Some(node)) = (&self.on_node_failed, failed_node) {
            hook.call(&node);
        }
    }
}

async fn run_events<C: Send + Sync + 'static>(
    shared: Weak<Shared<C>>,
    mut events: mpsc::UnboundedReceiver<ManagerEvent<C>>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle(event).await;
    }
    debug!("Connection pool event loop finished");
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured nodes
    pub nodes: usize,
    /// Nodes whose managers have all shut down
    pub down_nodes: usize,
    /// Managers still owned by the pool
    pub managers: usize,
    /// Managers holding a live connection
    pub connected: usize,
    /// Connections ready to be leased
    pub idle: usize,
    /// Connections currently leased out
    pub leased: usize,
    /// Callers queued for a connection
    pub waiting: usize,
    pub exhausted: bool,
    pub closed: bool,
}

impl PoolStats {
    /// Share of live connections currently leased, as a percentage
    pub fn utilization(&self) -> f64 {
        let live = self.idle + self.leased;
        if live == 0 {
            0.0
        } else {
            (self.leased as f64 / live as f64) * 100.0
        }
    }
}
