//! Per-node connection manager
//!
//! A [`ConnectionManager`] owns at most one live connection to one node and
//! drives it through a small state machine:
//!
//! ```text
//!            connect()                 factory Ok
//!   Idle ──────────────► Connecting ─────────────► Connected
//!                          ▲    │                     │
//!             backoff      │    │ factory Err         │ loss signal
//!             elapsed      │    ▼                     │
//!                        Disconnected ◄───────────────┘
//!                              │
//!                              │ failures > retry_limit,
//!                              │ or a permanent factory error
//!                              ▼
//!                           Shutdown
//!
//!   close() from any state ──► Closed
//! ```
//!
//! Every transition is reported on the event channel handed to the manager.
//! Attempts, backoff timers and loss watchers run as spawned tasks tagged with
//! an epoch; a task whose epoch no longer matches the manager's is ignored, so
//! a late completion can never revive a closed or superseded connection.

use crate::backoff::BackoffPolicy;
use crate::link::{ConnectionFactory, Link, NodeConfig};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Shutdown,
    Closed,
}

impl ManagerState {
    /// Shutdown and Closed stay put until `connect()` starts a new retry budget
    pub fn is_terminal(self) -> bool {
        matches!(self, ManagerState::Shutdown | ManagerState::Closed)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Idle => "idle",
            ManagerState::Connecting => "connecting",
            ManagerState::Connected => "connected",
            ManagerState::Disconnected => "disconnected",
            ManagerState::Shutdown => "shutdown",
            ManagerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Identity of a manager inside a pool: node index plus a unique serial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerId {
    pub node: usize,
    pub serial: u64,
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}#{}", self.node, self.serial)
    }
}

/// Lifecycle notification emitted by a manager
#[derive(Debug)]
pub enum ManagerEvent<C> {
    Connected {
        manager: ManagerId,
        epoch: u64,
        connection: Arc<C>,
    },
    Disconnected {
        manager: ManagerId,
        failures: u32,
        reason: String,
    },
    Shutdown {
        manager: ManagerId,
        failures: u32,
    },
    Closed {
        manager: ManagerId,
    },
}

impl<C> ManagerEvent<C> {
    pub fn manager(&self) -> ManagerId {
        match self {
            ManagerEvent::Connected { manager, .. }
            | ManagerEvent::Disconnected { manager, .. }
            | ManagerEvent::Shutdown { manager, .. }
            | ManagerEvent::Closed { manager } => *manager,
        }
    }
}

/// Retry budget and backoff for one manager
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Consecutive failures tolerated before shutting down
    pub retry_limit: u32,
    pub backoff: BackoffPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

struct Core<C> {
    state: ManagerState,
    failures: u32,
    attempts: u64,
    epoch: u64,
    connection: Option<Arc<C>>,
    task: Option<AbortHandle>,
    events: Option<mpsc::UnboundedSender<ManagerEvent<C>>>,
}

impl<C> Core<C> {
    fn emit(&self, event: ManagerEvent<C>) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Inner<C> {
    id: ManagerId,
    node: NodeConfig,
    config: ManagerConfig,
    factory: Arc<dyn ConnectionFactory<C>>,
    core: Mutex<Core<C>>,
}

/// Connection state machine for a single node
///
/// Cloning yields another handle to the same manager. Methods that start
/// work (`connect`) must be called from inside a Tokio runtime.
pub struct ConnectionManager<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Send + Sync + 'static> ConnectionManager<C> {
    /// Create an idle manager that reports to `events`
    pub fn new(
        id: ManagerId,
        node: NodeConfig,
        config: ManagerConfig,
        factory: Arc<dyn ConnectionFactory<C>>,
        events: mpsc::UnboundedSender<ManagerEvent<C>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                node,
                config,
                factory,
                core: Mutex::new(Core {
                    state: ManagerState::Idle,
                    failures: 0,
                    attempts: 0,
                    epoch: 0,
                    connection: None,
                    task: None,
                    events: Some(events),
                }),
            }),
        }
    }

    /// Create a manager with its own event channel
    pub fn standalone(
        node: NodeConfig,
        config: ManagerConfig,
        factory: Arc<dyn ConnectionFactory<C>>,
    ) -> (Self, mpsc::UnboundedReceiver<ManagerEvent<C>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ManagerId { node: 0, serial: 0 };
        (Self::new(id, node, config, factory, tx), rx)
    }

    /// Start connecting.
    ///
    /// Resets the failure counter. A no-op while an attempt is in flight or a
    /// connection is live; from Shutdown or Closed it starts a fresh retry budget.
    pub fn connect(&self) {
        let mut core = self.inner.lock();
        match core.state {
            ManagerState::Connecting | ManagerState::Connected => {
                debug!(manager = %self.inner.id, state = %core.state, "connect() ignored");
            }
            _ => {
                core.failures = 0;
                core.cancel_task();
                Inner::begin_attempt(&self.inner, &mut core);
            }
        }
    }
}

impl<C> ConnectionManager<C> {
    pub fn id(&self) -> ManagerId {
        self.inner.id
    }

    pub fn node(&self) -> &NodeConfig {
        &self.inner.node
    }

    pub fn state(&self) -> ManagerState {
        self.inner.lock().state
    }

    /// Consecutive failures since the last successful connect
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Connection attempts started over the manager's lifetime
    pub fn attempts(&self) -> u64 {
        self.inner.lock().attempts
    }

    /// The live connection, if any
    pub fn connection(&self) -> Option<Arc<C>> {
        self.inner.lock().connection.clone()
    }

    /// Epoch of the live connection; `None` unless connected
    pub fn live_epoch(&self) -> Option<u64> {
        let core = self.inner.lock();
        (core.state == ManagerState::Connected).then_some(core.epoch)
    }

    /// Cancel pending work, drop the connection and move to Closed.
    ///
    /// Idempotent: closing a closed manager emits nothing.
    pub fn close(&self) {
        let mut core = self.inner.lock();
        if core.state == ManagerState::Closed {
            return;
        }
        core.cancel_task();
        core.epoch += 1;
        core.connection = None;
        core.state = ManagerState::Closed;
        debug!(manager = %self.inner.id, node = %self.inner.node, "Connection manager closed");
        core.emit(ManagerEvent::Closed {
            manager: self.inner.id,
        });
    }

    /// Stop reporting events; repeated calls are harmless
    pub fn detach(&self) {
        self.inner.lock().events = None;
    }
}

impl<C> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, Core<C>> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<C: Send + Sync + 'static> Inner<C> {
    fn begin_attempt(this: &Arc<Self>, core: &mut Core<C>) {
        core.epoch += 1;
        core.attempts += 1;
        core.state = ManagerState::Connecting;
        let epoch = core.epoch;

        debug!(
            manager = %this.id,
            node = %this.node,
            attempt = core.attempts,
            "Connecting"
        );

        let inner = Arc::clone(this);
        let handle = tokio::spawn(async move {
            let result = inner.factory.connect(&inner.node).await;
            Inner::on_attempt(&inner, epoch, result);
        });
        core.task = Some(handle.abort_handle());
    }

    fn on_attempt(
        this: &Arc<Self>,
        epoch: u64,
        result: Result<Link<C>, crate::error::ResilienceError>,
    ) {
        let mut core = this.lock();
        if core.epoch != epoch || core.state != ManagerState::Connecting {
            debug!(manager = %this.id, epoch, "Discarding stale connection attempt");
            return;
        }

        match result {
            Ok(link) => {
                let connection = Arc::new(link.connection);
                core.failures = 0;
                core.state = ManagerState::Connected;
                core.connection = Some(Arc::clone(&connection));
                info!(manager = %this.id, node = %this.node, "Connection established");

                let inner = Arc::clone(this);
                let loss = link.loss;
                let handle = tokio::spawn(async move {
                    let loss = loss.lost().await;
                    Inner::on_loss(&inner, epoch, loss.to_string());
                });
                core.task = Some(handle.abort_handle());

                core.emit(ManagerEvent::Connected {
                    manager: this.id,
                    epoch,
                    connection,
                });
            }
            Err(e) => {
                core.task = None;
                let retry = !e.is_permanent();
                Inner::fail(this, &mut core, e.to_string(), retry);
            }
        }
    }

    fn on_loss(this: &Arc<Self>, epoch: u64, reason: String) {
        let mut core = this.lock();
        if core.epoch != epoch || core.state != ManagerState::Connected {
            return;
        }
        core.connection = None;
        core.task = None;
        Inner::fail(this, &mut core, reason, true);
    }

    fn on_backoff_elapsed(this: &Arc<Self>, epoch: u64) {
        let mut core = this.lock();
        if core.epoch != epoch || core.state != ManagerState::Disconnected {
            return;
        }
        Inner::begin_attempt(this, &mut core);
    }

    fn fail(this: &Arc<Self>, core: &mut Core<C>, reason: String, retry: bool) {
        core.failures += 1;
        core.state = ManagerState::Disconnected;
        let failures = core.failures;

        warn!(
            manager = %this.id,
            node = %this.node,
            failures,
            reason = %reason,
            "Connection lost"
        );
        core.emit(ManagerEvent::Disconnected {
            manager: this.id,
            failures,
            reason,
        });

        if retry && failures <= this.config.retry_limit {
            core.epoch += 1;
            let epoch = core.epoch;
            let delay = this.config.backoff.delay(failures);
            debug!(manager = %this.id, ?delay, "Scheduling reconnect");

            let inner = Arc::clone(this);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                Inner::on_backoff_elapsed(&inner, epoch);
            });
            core.task = Some(handle.abort_handle());
        } else {
            core.state = ManagerState::Shutdown;
            core.cancel_task();
            if retry {
                error!(
                    manager = %this.id,
                    node = %this.node,
                    failures,
                    "Retry limit exceeded, shutting down connection manager"
                );
            } else {
                error!(
                    manager = %this.id,
                    node = %this.node,
                    "Permanent connection error, shutting down connection manager"
                );
            }
            core.emit(ManagerEvent::Shutdown {
                manager: this.id,
                failures,
            });
        }
    }
}
