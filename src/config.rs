/*!
 * Configuration types for riaktive
 */

use crate::error::{Result, RiaktiveError};
use riaktive_core_resilience::{BackoffPolicy, NodeConfig, PoolConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One storage node as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(default = "default_host")]
    pub host: String,

    /// Protocol buffers port
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP port of the node, used by search tooling only
    #[serde(default = "default_http")]
    pub http: u16,

    /// Connect timeout in milliseconds
    #[serde(default = "default_timeout", alias = "connectTimeout")]
    pub timeout: u64,

    /// Connections kept open to this node
    #[serde(default = "default_connections")]
    pub connections: usize,
}

impl Default for NodeEntry {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            http: default_http(),
            timeout: default_timeout(),
            connections: default_connections(),
        }
    }
}

impl NodeEntry {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn to_node_config(&self) -> NodeConfig {
        NodeConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: Duration::from_millis(self.timeout),
            connections: self.connections.max(1),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging section of the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Shorthand for level = debug
    #[serde(default)]
    pub verbose: bool,
}

/// Client configuration
///
/// `nodes` may be written as an array of tables or as a single table. A file
/// with no `nodes` but a top-level `host`/`port` describes one node.
///
/// ```
/// use riaktive::config::ClientConfig;
///
/// let config = ClientConfig::from_toml_str(r#"
///     limit = 3
///     wait = 250
///
///     [[nodes]]
///     host = "riak-1"
///
///     [[nodes]]
///     host = "riak-2"
///     connections = 4
/// "#).unwrap();
///
/// assert_eq!(config.nodes.len(), 2);
/// assert_eq!(config.retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawConfig")]
pub struct ClientConfig {
    /// Consecutive failures tolerated per connection before it shuts down
    pub retries: u32,

    /// Reconnect delay in milliseconds
    pub wait: u64,

    /// Growth factor of the reconnect delay (1.0 = fixed)
    pub backoff_multiplier: f64,

    /// Reconnect delay cap in milliseconds
    pub max_wait: Option<u64>,

    /// Random extra delay as a fraction of the computed one
    pub jitter: f64,

    /// Pause after creating a search index, in milliseconds
    pub index_grace: u64,

    /// Identifier used as the owner of version vectors written by this client
    pub node_id: Option<String>,

    pub nodes: Vec<NodeEntry>,

    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum NodeList {
    Many(Vec<NodeEntry>),
    One(NodeEntry),
    #[default]
    #[serde(skip)]
    Missing,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    nodes: NodeList,

    // single-node shorthand
    host: Option<String>,
    port: Option<u16>,
    http: Option<u16>,
    timeout: Option<u64>,
    connections: Option<usize>,

    retries: Option<u32>,
    limit: Option<u32>,

    #[serde(default = "default_wait")]
    wait: u64,

    #[serde(default = "default_multiplier")]
    backoff_multiplier: f64,

    #[serde(default)]
    max_wait: Option<u64>,

    #[serde(default)]
    jitter: f64,

    #[serde(default = "default_index_grace")]
    index_grace: u64,

    #[serde(default)]
    node_id: Option<String>,

    #[serde(default)]
    log: LogConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            nodes: NodeList::Missing,
            host: None,
            port: None,
            http: None,
            timeout: None,
            connections: None,
            retries: None,
            limit: None,
            wait: default_wait(),
            backoff_multiplier: default_multiplier(),
            max_wait: None,
            jitter: 0.0,
            index_grace: default_index_grace(),
            node_id: None,
            log: LogConfig::default(),
        }
    }
}

impl From<RawConfig> for ClientConfig {
    fn from(raw: RawConfig) -> Self {
        let nodes = match raw.nodes {
            NodeList::Many(nodes) => nodes,
            NodeList::One(node) => vec![node],
            NodeList::Missing => {
                let defaults = NodeEntry::default();
                vec![NodeEntry {
                    host: raw.host.unwrap_or(defaults.host),
                    port: raw.port.unwrap_or(defaults.port),
                    http: raw.http.unwrap_or(defaults.http),
                    timeout: raw.timeout.unwrap_or(defaults.timeout),
                    connections: raw.connections.unwrap_or(defaults.connections),
                }]
            }
        };

        ClientConfig {
            nodes,
            retries: raw.limit.or(raw.retries).unwrap_or_else(default_retries),
            wait: raw.wait,
            backoff_multiplier: raw.backoff_multiplier,
            max_wait: raw.max_wait,
            jitter: raw.jitter,
            index_grace: raw.index_grace,
            node_id: raw.node_id,
            log: raw.log,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8087
}

fn default_http() -> u16 {
    8098
}

fn default_timeout() -> u64 {
    2000
}

fn default_connections() -> usize {
    1
}

fn default_retries() -> u32 {
    5
}

fn default_wait() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_index_grace() -> u64 {
    10_000
}

impl ClientConfig {
    /// Configuration for the given nodes with every other setting defaulted
    pub fn with_nodes(nodes: Vec<NodeEntry>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| RiaktiveError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RiaktiveError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RiaktiveError::Config(e.to_string()))
    }

    /// Check that the configuration can drive a client
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(RiaktiveError::Config(
                "at least one node must be configured".to_string(),
            ));
        }
        for node in &self.nodes {
            if node.host.trim().is_empty() {
                return Err(RiaktiveError::Config("node host cannot be empty".to_string()));
            }
            if node.port == 0 {
                return Err(RiaktiveError::Config(format!(
                    "node {} has port 0",
                    node.host
                )));
            }
            if node.connections == 0 {
                return Err(RiaktiveError::Config(format!(
                    "node {}:{} must keep at least one connection",
                    node.host, node.port
                )));
            }
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RiaktiveError::Config(format!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(RiaktiveError::Config(format!(
                "jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        if let Some(max_wait) = self.max_wait {
            if max_wait < self.wait {
                return Err(RiaktiveError::Config(format!(
                    "max_wait ({max_wait}ms) is shorter than wait ({}ms)",
                    self.wait
                )));
            }
        }
        if matches!(&self.node_id, Some(id) if id.trim().is_empty()) {
            return Err(RiaktiveError::Config("node_id cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn node_configs(&self) -> Vec<NodeConfig> {
        self.nodes.iter().map(NodeEntry::to_node_config).collect()
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            wait: Duration::from_millis(self.wait),
            multiplier: self.backoff_multiplier,
            max_wait: self.max_wait.map(Duration::from_millis),
            jitter_factor: self.jitter,
        }
    }

    /// Pool settings derived from this configuration, without a failure hook
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            retry_limit: self.retries,
            backoff: self.backoff(),
            on_node_failed: None,
        }
    }

    pub fn index_grace(&self) -> Duration {
        Duration::from_millis(self.index_grace)
    }
}
