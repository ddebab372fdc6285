/*!
 * Riaktive - resilient client layer for a clustered document store
 *
 * - Connection pool across many nodes with bounded reconnects and failover
 * - Buckets provisioned (search schema, search index, properties) before use,
 *   with operations queued until they are ready
 * - JSON documents with secondary indexes and vclock round-tripping
 * - Sibling reconciliation through version vectors
 *
 * ```no_run
 * use riaktive::prelude::*;
 * use serde_json::json;
 *
 * # async fn example(connector: Connector) -> riaktive::Result<()> {
 * let config = ClientConfig::load("riaktive.toml")?;
 * riaktive::logging::init_logging(&config.log)?;
 *
 * let client = Client::builder(config)
 *     .on_node_failed(|node| eprintln!("{} is unreachable", node))
 *     .connect(connector)?;
 *
 * let users = client.bucket("users", BucketOptions::new().schema("user_schema").schema_path("user.xml"));
 * let stored = users.put(Document::new(json!({"name": "ada"}))?.with_index("age", 36)).await?;
 * let fetched = users.get(&stored.key).await?;
 * # let _ = fetched;
 * # Ok(())
 * # }
 * ```
 */

pub mod bucket;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod indexes;
pub mod logging;
pub mod protocol;
pub mod siblings;

pub use riaktive_core_causality as causality;
pub use riaktive_core_readiness as readiness;
pub use riaktive_core_resilience as resilience;

pub use bucket::{Bucket, BucketOptions, DeleteTarget, IndexResults, IndexScan, Stored};
pub use client::{Client, ClientBuilder, IdStrategy};
pub use config::{ClientConfig, LogConfig, LogLevel, NodeEntry};
pub use document::{Document, Fetched};
pub use error::{Result, RiaktiveError};
pub use indexes::{IndexLookup, Indexes};
pub use protocol::{Connection, Connector, NodeConnection, Request, Response, RpcError};
pub use siblings::Resolution;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bucket::{Bucket, BucketOptions, Stored};
    pub use crate::client::{Client, ClientBuilder};
    pub use crate::config::ClientConfig;
    pub use crate::document::{Document, Fetched};
    pub use crate::error::RiaktiveError;
    pub use crate::indexes::IndexLookup;
    pub use crate::protocol::{
        Connection, Connector, NodeConnection, Request, Response, RpcError,
    };
    pub use riaktive_core_causality::VersionVector;
    pub use riaktive_core_resilience::{ConnectionFactory, Link, LossNotifier, NodeConfig};
}
