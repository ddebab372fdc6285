//! Node addressing, connection factories and connection-loss signalling

use crate::error::ResilienceError;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Address and sizing for one storage node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Host name or IP address
    pub host: String,
    /// Protocol port
    pub port: u16,
    /// Upper bound for a single connection attempt
    pub connect_timeout: Duration,
    /// Number of connection managers the pool keeps for this node
    pub connections: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8087,
            connect_timeout: Duration::from_secs(2),
            connections: 1,
        }
    }
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Why an established connection went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loss {
    /// Remote side closed the connection
    Ended,
    /// Transport error
    Error(String),
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loss::Ended => f.write_str("connection ended"),
            Loss::Error(reason) => write!(f, "connection error: {}", reason),
        }
    }
}

/// Sending half: held by the transport, fired once when the connection dies
#[derive(Debug)]
pub struct LossNotifier {
    tx: oneshot::Sender<Loss>,
}

impl LossNotifier {
    pub fn end(self) {
        let _ = self.tx.send(Loss::Ended);
    }

    pub fn error(self, reason: impl Into<String>) {
        let _ = self.tx.send(Loss::Error(reason.into()));
    }
}

/// Receiving half: watched by the connection manager
#[derive(Debug)]
pub struct LossSignal {
    rx: Option<oneshot::Receiver<Loss>>,
}

impl LossSignal {
    pub fn pair() -> (LossNotifier, LossSignal) {
        let (tx, rx) = oneshot::channel();
        (LossNotifier { tx }, LossSignal { rx: Some(rx) })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Resolve when the connection is lost.
    ///
    /// Dropping the notifier without firing it is not treated as a loss; the
    /// future then stays pending until the manager cancels the watch.
    pub async fn lost(self) -> Loss {
        if let Some(rx) = self.rx {
            if let Ok(loss) = rx.await {
                return loss;
            }
        }
        futures::future::pending().await
    }
}

/// An established connection together with its loss signal
#[derive(Debug)]
pub struct Link<C> {
    pub connection: C,
    pub loss: LossSignal,
}

impl<C> Link<C> {
    /// Wrap `connection` and return the notifier the transport fires on loss
    pub fn new(connection: C) -> (Self, LossNotifier) {
        let (notifier, loss) = LossSignal::pair();
        (Self { connection, loss }, notifier)
    }

    /// Wrap a connection whose loss is never reported
    pub fn detached(connection: C) -> Self {
        Self {
            connection,
            loss: LossSignal::never(),
        }
    }
}

/// Opens connections to a node
///
/// Implementations should honour `node.connect_timeout` and report a
/// [`ResilienceError`] when the attempt fails; the manager owns retries.
/// A [`ResilienceError::Permanent`] error (bad credentials, say) shuts the
/// manager down without spending the rest of its retry budget.
#[async_trait::async_trait]
pub trait ConnectionFactory<C>: Send + Sync + 'static {
    async fn connect(&self, node: &NodeConfig) -> Result<Link<C>, ResilienceError>;
}
