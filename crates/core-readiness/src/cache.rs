//! Memoizing front-ends for search schema and index provisioning
//!
//! Both caches are owned by a client instance and shared by every readiness
//! controller it spawns. Each holds an async lock across fetch, compare and
//! store, so two controllers asserting the same name never both upload it.

use crate::plan::Properties;
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default pause after creating a search index before it is usable
pub const DEFAULT_INDEX_GRACE: Duration = Duration::from_millis(10_000);

/// Store operations needed to provision a resource
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync + 'static {
    /// Content of schema `name`, `None` when it does not exist
    async fn fetch_schema(&self, name: &str) -> anyhow::Result<Option<String>>;

    async fn store_schema(&self, name: &str, content: &str) -> anyhow::Result<()>;

    /// Schema bound to index `name`, `None` when the index does not exist
    async fn fetch_index(&self, name: &str) -> anyhow::Result<Option<String>>;

    async fn store_index(&self, name: &str, schema: &str) -> anyhow::Result<()>;

    async fn read_properties(&self, bucket: &str) -> anyhow::Result<Properties>;

    async fn write_properties(&self, bucket: &str, changes: &Properties) -> anyhow::Result<()>;
}

/// Schema name → content known to be stored
#[derive(Debug, Default)]
pub struct SchemaCache {
    known: Mutex<HashMap<String, String>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure schema `name` holds the content of the file at `path`.
    ///
    /// Returns `true` when the store already had identical content and
    /// `false` when it was uploaded. A failed lookup counts as missing.
    pub async fn create(
        &self,
        store: &dyn Provisioner,
        name: &str,
        path: &Path,
    ) -> anyhow::Result<bool> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading schema file {}", path.display()))?;

        let mut known = self.known.lock().await;
        if known.get(name) == Some(&content) {
            return Ok(true);
        }

        let stored = match store.fetch_schema(name).await {
            Ok(stored) => stored,
            Err(e) => {
                debug!(schema = name, error = %e, "Schema lookup failed, treating as missing");
                None
            }
        };
        if stored.as_deref() == Some(content.as_str()) {
            known.insert(name.to_string(), content);
            return Ok(true);
        }

        info!(schema = name, path = %path.display(), "Creating schema");
        store
            .store_schema(name, &content)
            .await
            .with_context(|| format!("storing schema {}", name))?;
        known.insert(name.to_string(), content);
        Ok(false)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.known.lock().await.contains_key(name)
    }
}

/// Index name → schema name known to be stored
#[derive(Debug)]
pub struct IndexCache {
    known: Mutex<HashMap<String, String>>,
    grace: Duration,
}

impl Default for IndexCache {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_GRACE)
    }
}

impl IndexCache {
    pub fn new(grace: Duration) -> Self {
        Self {
            known: Mutex::new(HashMap::new()),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Make sure index `name` exists and is bound to `schema`.
    ///
    /// Returns how long to wait before the index can be used: zero when it
    /// already existed, the grace period when it was just created.
    pub async fn create(
        &self,
        store: &dyn Provisioner,
        name: &str,
        schema: &str,
    ) -> anyhow::Result<Duration> {
        let mut known = self.known.lock().await;
        if known.get(name).map(String::as_str) == Some(schema) {
            return Ok(Duration::ZERO);
        }

        let bound = match store.fetch_index(name).await {
            Ok(bound) => bound,
            Err(e) => {
                debug!(index = name, error = %e, "Index lookup failed, treating as missing");
                None
            }
        };
        if bound.as_deref() == Some(schema) {
            known.insert(name.to_string(), schema.to_string());
            return Ok(Duration::ZERO);
        }

        info!(index = name, schema, "Creating search index");
        store
            .store_index(name, schema)
            .await
            .with_context(|| format!("creating index {}", name))?;
        known.insert(name.to_string(), schema.to_string());
        Ok(self.grace)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.known.lock().await.contains_key(name)
    }
}
