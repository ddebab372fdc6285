//! Riaktive Core Resilience: connection lifecycle and failover for storage nodes
//!
//! # Overview
//!
//! This crate keeps a set of connections to a cluster of storage nodes alive
//! and hands them out to callers. It includes:
//!
//! - **Connection Manager**: per-node state machine with bounded, backed-off reconnects
//! - **Connection Pool**: multi-node pool with FIFO waiters and failover
//! - **Backoff Policy**: fixed or exponential reconnect delays with optional jitter
//! - **Links**: an established connection paired with its loss signal
//!
//! # Key Principles
//!
//! This crate is **transport agnostic**. It never opens a socket itself; a
//! [`ConnectionFactory`] supplied by the caller does, and reports loss of an
//! established connection through the [`LossNotifier`] it hands back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ acquire / release
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Connection Pool                   │  ← FIFO waiters, failover
//! │  (idle queues per node, exhaustion)     │
//! └──────┬──────────────┬──────────────┬────┘
//!        │ events       │              │
//!        ▼              ▼              ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │ Manager A  │ │ Manager B  │ │ Manager C  │  ← connect, backoff, shutdown
//! └─────┬──────┘ └─────┬──────┘ └─────┬──────┘
//!       │              │              │
//!       ▼              ▼              ▼
//!    Node A         Node B         Node C
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use riaktive_core_resilience::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Socket;
//! struct SocketFactory;
//!
//! #[async_trait::async_trait]
//! impl ConnectionFactory<Socket> for SocketFactory {
//!     async fn connect(&self, node: &NodeConfig) -> Result<Link<Socket>, ResilienceError> {
//!         // Open the transport here
//! #       let _ = node;
//!         Ok(Link::detached(Socket))
//!     }
//! }
//!
//! # async fn example() -> Result<(), PoolError> {
//! let config = PoolConfig {
//!     retry_limit: 3,
//!     backoff: BackoffPolicy::exponential(Duration::from_millis(200), Duration::from_secs(5)),
//!     on_node_failed: Some(FailureHook::new(|node| eprintln!("{} is down", node))),
//! };
//! let factory: Arc<dyn ConnectionFactory<Socket>> = Arc::new(SocketFactory);
//! let pool = ConnectionPool::new(vec![NodeConfig::new("127.0.0.1", 8087)], factory, config);
//!
//! let lease = pool.acquire().await?;
//! pool.release(lease).await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod connection_pool;
pub mod error;
pub mod link;
pub mod manager;

// Re-export main types for convenience
pub use backoff::BackoffPolicy;
pub use connection_pool::{ConnectionPool, FailureHook, Lease, PoolConfig, PoolStats};
pub use error::{PoolError, ResilienceError};
pub use link::{ConnectionFactory, Link, Loss, LossNotifier, LossSignal, NodeConfig};
pub use manager::{ConnectionManager, ManagerConfig, ManagerEvent, ManagerId, ManagerState};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use riaktive_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::backoff::BackoffPolicy;
    pub use super::connection_pool::{ConnectionPool, FailureHook, Lease, PoolConfig};
    pub use super::error::{PoolError, ResilienceError};
    pub use super::link::{ConnectionFactory, Link, LossNotifier, NodeConfig};
    pub use super::manager::{ConnectionManager, ManagerConfig, ManagerEvent, ManagerState};
}
