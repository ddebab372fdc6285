/*!
 * Pooled client and bucket registry
 *
 * Every request borrows a connection from the pool for exactly one call and
 * hands it back afterwards, whether the call succeeded or not. The transport
 * half is shared with the buckets' readiness controllers; the registry half
 * stays with the [`Client`] handles.
 */

use crate::bucket::{bucket_name, Bucket, BucketOptions};
use crate::config::ClientConfig;
use crate::document::Fetched;
use crate::error::{Result, RiaktiveError};
use crate::protocol::{Connection, Connector, Request, Response};
use async_trait::async_trait;
use futures::future::try_join_all;
use riaktive_core_readiness::{Properties, ProvisionCaches, Provisioner};
use riaktive_core_resilience::{ConnectionPool, FailureHook, NodeConfig, PoolStats};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// Generates keys for documents stored without one
pub type IdStrategy = Arc<dyn Fn() -> String + Send + Sync>;

fn uuid_ids() -> IdStrategy {
    Arc::new(|| Uuid::new_v4().to_string())
}

/// Connection pool plus request/response plumbing
pub(crate) struct Transport {
    pool: ConnectionPool<Connection>,
}

impl Transport {
    pub(crate) async fn call(&self, request: Request) -> Result<Response> {
        let name = request.name();
        let lease = self.pool.acquire().await?;
        let outcome = lease.call(request).await;
        let node = lease.node();
        self.pool.release(lease).await;

        match outcome {
            Ok(response) => Ok(response),
            Err(e) => {
                debug!(request = name, node, error = %e, "Request failed");
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Provisioner for Transport {
    async fn fetch_schema(&self, name: &str) -> anyhow::Result<Option<String>> {
        match self
            .call(Request::GetSchema {
                name: name.to_string(),
            })
            .await?
        {
            Response::Schema(content) => Ok(content),
            other => Err(unexpected("get_schema", &other)),
        }
    }

    async fn store_schema(&self, name: &str, content: &str) -> anyhow::Result<()> {
        match self
            .call(Request::PutSchema {
                name: name.to_string(),
                content: content.to_string(),
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(unexpected("put_schema", &other)),
        }
    }

    async fn fetch_index(&self, name: &str) -> anyhow::Result<Option<String>> {
        match self
            .call(Request::GetSearchIndex {
                name: name.to_string(),
            })
            .await?
        {
            Response::SearchIndex(schema) => Ok(schema),
            other => Err(unexpected("get_search_index", &other)),
        }
    }

    async fn store_index(&self, name: &str, schema: &str) -> anyhow::Result<()> {
        match self
            .call(Request::PutSearchIndex {
                name: name.to_string(),
                schema: schema.to_string(),
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(unexpected("put_search_index", &other)),
        }
    }

    /// A node-reported failure reads as "no properties yet"; transport
    /// failures are returned.
    async fn read_properties(&self, bucket: &str) -> anyhow::Result<Properties> {
        let request = Request::GetBucketProps {
            bucket: bucket.to_string(),
        };
        match self.call(request).await {
            Ok(Response::Properties(props)) => Ok(props),
            Ok(other) => Err(unexpected("get_bucket_props", &other)),
            Err(RiaktiveError::Rpc(e)) if !e.is_transient() => {
                debug!(bucket, error = %e, "Failed to read bucket properties, assuming none");
                Ok(Properties::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_properties(&self, bucket: &str, changes: &Properties) -> anyhow::Result<()> {
        match self
            .call(Request::SetBucketProps {
                bucket: bucket.to_string(),
                props: changes.clone(),
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(unexpected("set_bucket_props", &other)),
        }
    }
}

fn unexpected(request: &'static str, response: &Response) -> anyhow::Error {
    crate::protocol::RpcError::unexpected(request, response).into()
}

/// Builds a [`Client`] from configuration plus code-only settings
pub struct ClientBuilder {
    config: ClientConfig,
    on_node_failed: Option<FailureHook>,
    ids: IdStrategy,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            on_node_failed: None,
            ids: uuid_ids(),
        }
    }

    /// Called with the node's address each time one of its connections gives up
    pub fn on_node_failed(mut self, hook: impl Fn(&NodeConfig) + Send + Sync + 'static) -> Self {
        self.on_node_failed = Some(FailureHook::new(hook));
        self
    }

    /// Replace the UUID v4 key generator
    pub fn id_strategy(mut self, ids: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Validate the configuration and start connecting.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn connect(self, connector: Connector) -> Result<Client> {
        self.config.validate()?;

        let mut pool_config = self.config.pool_config();
        pool_config.on_node_failed = self.on_node_failed;
        let nodes = self.config.node_configs();
        info!(
            nodes = nodes.len(),
            retries = pool_config.retry_limit,
            "Connecting to cluster"
        );
        let pool = ConnectionPool::new(nodes, connector, pool_config);

        let node_id = self
            .config
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport: Arc::new(Transport { pool }),
                caches: ProvisionCaches::new(self.config.index_grace()),
                buckets: Mutex::new(HashMap::new()),
                ids: self.ids,
                node_id,
                config: self.config,
            }),
        })
    }
}

struct ClientInner {
    transport: Arc<Transport>,
    caches: ProvisionCaches,
    /// Keyed by bucket name and by alias
    buckets: Mutex<HashMap<String, Bucket>>,
    ids: IdStrategy,
    node_id: String,
    config: ClientConfig,
}

/// Handle to a connected cluster
///
/// Cheap to clone; all clones share the pool, the provisioning caches and the
/// bucket registry.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("node_id", &self.inner.node_id)
            .field("nodes", &self.inner.config.nodes.len())
            .finish()
    }
}

impl Client {
    /// Connect with default code-only settings
    pub fn connect(config: ClientConfig, connector: Connector) -> Result<Self> {
        ClientBuilder::new(config).connect(connector)
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Owner id for version vectors written through this client
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Generate a document key with the configured strategy
    pub fn next_id(&self) -> String {
        (self.inner.ids)()
    }

    /// Send one raw request over a pooled connection
    pub async fn call(&self, request: Request) -> Result<Response> {
        self.inner.transport.call(request).await
    }

    pub async fn ping(&self) -> Result<()> {
        match self.call(Request::Ping).await? {
            Response::Pong | Response::Done => Ok(()),
            other => Err(crate::protocol::RpcError::unexpected("ping", &other).into()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.inner
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Bucket handle for `name`, provisioning it on first use.
    ///
    /// Later calls with the same name return the existing handle (options are
    /// only applied the first time); a new alias is still registered. Must be
    /// called from inside a Tokio runtime.
    pub fn bucket(&self, name: impl AsRef<str>, options: BucketOptions) -> Bucket {
        let name = name.as_ref();
        let mut buckets = self.registry();

        let bucket = match buckets.get(name) {
            Some(existing) => existing.clone(),
            None => {
                let bucket = Bucket::spawn(
                    name,
                    &options,
                    Arc::clone(&self.inner.transport),
                    self.inner.caches.clone(),
                    Arc::clone(&self.inner.ids),
                    self.inner.node_id.clone(),
                );
                buckets.insert(name.to_string(), bucket.clone());
                bucket
            }
        };

        if let Some(alias) = options.alias.as_deref() {
            if alias != name {
                buckets.insert(alias.to_string(), bucket.clone());
            }
        }
        bucket
    }

    /// Bucket named by joining the non-empty `parts` with `_`
    pub fn bucket_from_parts<S: AsRef<str>>(&self, parts: &[S], options: BucketOptions) -> Bucket {
        self.bucket(bucket_name(parts), options)
    }

    /// Previously created bucket, by name or alias
    pub fn get_bucket(&self, name_or_alias: &str) -> Option<Bucket> {
        self.registry().get(name_or_alias).cloned()
    }

    /// Fetch `(bucket, key)` pairs without waiting for bucket provisioning
    pub async fn get_by_keys(&self, ids: &[(String, String)]) -> Result<Vec<Option<Fetched>>> {
        try_join_all(ids.iter().map(|(bucket, key)| async move {
            crate::bucket::fetch(&self.inner.transport, bucket, key).await
        }))
        .await
    }

    /// Node currently serving connections, if any
    pub async fn current_node(&self) -> Option<NodeConfig> {
        self.inner.transport.pool.current_node().await
    }

    pub async fn stats(&self) -> PoolStats {
        self.inner.transport.pool.stats().await
    }

    /// Add a node to the pool at runtime
    pub async fn add_node(&self, node: NodeConfig) {
        self.inner.transport.pool.add_node(node).await;
    }

    /// Restart the pool after all nodes were declared unreachable
    pub async fn reset(&self) {
        self.inner.transport.pool.restart().await;
    }

    /// Close every connection; pending and later requests fail
    pub async fn close(&self) {
        self.inner.transport.pool.close().await;
    }
}
