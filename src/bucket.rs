/*!
 * Bucket handles
 *
 * A [`Bucket`] is provisioned by its own readiness controller (schema, search
 * index, bucket properties). Every operation is wrapped into a [`BucketOp`]
 * and submitted to that controller: it runs right away once the bucket is
 * ready and waits in the controller's queue until then. Each operation has
 * its own reply channel, so a failure only rejects the call that caused it.
 */

use crate::client::{IdStrategy, Transport};
use crate::document::{Document, Fetched};
use crate::error::{Result, RiaktiveError};
use crate::indexes::{IndexLookup, Indexes};
use crate::protocol::{Page, Request, Response, RpcError, VClock};
use crate::siblings::{self, Resolution};
use futures::future::{try_join_all, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use riaktive_core_readiness::{
    Properties, ProvisionCaches, ReadinessController, ReadinessPlan, ReadinessState, Status,
};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Join the non-empty `parts` with `_`
pub fn bucket_name<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// How a bucket should be provisioned
#[derive(Debug, Clone, PartialEq)]
pub struct BucketOptions {
    /// Second registry name for the same bucket
    pub alias: Option<String>,
    pub schema: Option<String>,
    /// Local schema file; without it the schema is assumed to exist
    pub schema_path: Option<PathBuf>,
    pub search_index: Option<String>,
    /// Desired bucket properties (`allow_mult = true` unless overridden)
    pub properties: Properties,
}

impl Default for BucketOptions {
    fn default() -> Self {
        let mut properties = Properties::new();
        properties.insert("allow_mult".to_string(), Value::Bool(true));
        Self {
            alias: None,
            schema: None,
            schema_path: None,
            search_index: None,
            properties,
        }
    }
}

impl BucketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn schema(mut self, name: impl Into<String>) -> Self {
        self.schema = Some(name.into());
        self
    }

    pub fn schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    pub fn search_index(mut self, name: impl Into<String>) -> Self {
        self.search_index = Some(name.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Use `<bucket>_index` as the search index unless one is set
    pub fn with_default_index(mut self, bucket: &str) -> Self {
        if self.search_index.is_none() {
            self.search_index = Some(format!("{bucket}_index"));
        }
        self
    }

    /// Read options from a JSON object.
    ///
    /// `alias`, `schema`, `schemaPath`/`schema_path` and `search_index` are
    /// recognised; every other key is a bucket property.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(RiaktiveError::Config(
                "bucket options must be a JSON object".to_string(),
            ));
        };
        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "alias" => options.alias = Some(string_option(&key, value)?),
                "schema" => options.schema = Some(string_option(&key, value)?),
                "schemaPath" | "schema_path" => {
                    options.schema_path = Some(PathBuf::from(string_option(&key, value)?))
                }
                "search_index" => options.search_index = Some(string_option(&key, value)?),
                _ => {
                    options.properties.insert(key, value);
                }
            }
        }
        Ok(options)
    }

    pub fn plan(&self) -> ReadinessPlan {
        ReadinessPlan {
            schema: self.schema.clone(),
            schema_path: self.schema_path.clone(),
            search_index: self.search_index.clone(),
            properties: self.properties.clone(),
        }
    }
}

fn string_option(key: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(RiaktiveError::Config(format!(
            "bucket option {key} must be a string, got {other}"
        ))),
    }
}

/// Outcome of a successful put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub key: String,
    pub vclock: Option<VClock>,
}

/// What to delete: a key, or a document carrying its key in `id`
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Key(String),
    Document(Option<String>),
    /// Several keys at once, which is rejected
    Many,
}

impl DeleteTarget {
    fn into_key(self) -> Result<String> {
        match self {
            DeleteTarget::Key(key) => Ok(key),
            DeleteTarget::Document(Some(key)) => Ok(key),
            DeleteTarget::Document(None) => Err(RiaktiveError::MissingKey),
            DeleteTarget::Many => Err(RiaktiveError::MultiDelete),
        }
    }
}

impl From<&str> for DeleteTarget {
    fn from(key: &str) -> Self {
        DeleteTarget::Key(key.to_string())
    }
}

impl From<String> for DeleteTarget {
    fn from(key: String) -> Self {
        DeleteTarget::Key(key)
    }
}

impl From<&Document> for DeleteTarget {
    fn from(doc: &Document) -> Self {
        DeleteTarget::Document(doc.id())
    }
}

impl From<Value> for DeleteTarget {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(_) => DeleteTarget::Many,
            Value::String(key) => DeleteTarget::Key(key),
            Value::Object(_) => {
                DeleteTarget::Document(Document::new(value).ok().and_then(|d| d.id()))
            }
            Value::Null => DeleteTarget::Document(None),
            other => DeleteTarget::Key(other.to_string()),
        }
    }
}

impl<S: Into<String>> From<Vec<S>> for DeleteTarget {
    fn from(_keys: Vec<S>) -> Self {
        DeleteTarget::Many
    }
}

/// Documents found through a secondary index, plus the next page token
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexResults {
    pub documents: Vec<Fetched>,
    pub continuation: Option<String>,
}

/// Read one key through the transport.
///
/// A node-reported error reads as a missing document.
pub(crate) async fn fetch(transport: &Transport, bucket: &str, key: &str) -> Result<Option<Fetched>> {
    let request = Request::Get {
        bucket: bucket.to_string(),
        key: key.to_string(),
    };
    match transport.call(request).await {
        Ok(Response::Object { vclock, contents }) => Fetched::from_reply(vclock, &contents),
        Ok(other) => Err(RpcError::unexpected("get", &other).into()),
        Err(RiaktiveError::Rpc(e)) if !e.is_transient() => {
            debug!(bucket, key, error = %e, "Get failed, treating as missing");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Operations run once the bucket is ready
pub(crate) struct BucketApi {
    name: Arc<str>,
    transport: Arc<Transport>,
    ids: IdStrategy,
}

impl BucketApi {
    async fn get(&self, key: &str) -> Result<Option<Fetched>> {
        fetch(&self.transport, &self.name, key).await
    }

    async fn put(&self, key: Option<String>, mut doc: Document, indexes: Option<Indexes>) -> Result<Stored> {
        let key = match key.or_else(|| doc.id()) {
            Some(key) => key,
            None => (self.ids)(),
        };
        if doc.id().is_none() {
            doc.set_id(key.clone());
        }

        let request = Request::Put {
            bucket: self.name.to_string(),
            key: key.clone(),
            vclock: doc.vclock().cloned(),
            content: doc.to_content(indexes.as_ref().filter(|i| !i.is_empty())),
            return_body: true,
        };
        debug!(bucket = %self.name, key = %key, "Putting document");
        match self.transport.call(request).await? {
            Response::Stored { vclock } => Ok(Stored { key, vclock }),
            other => Err(RpcError::unexpected("put", &other).into()),
        }
    }

    async fn del(&self, key: String) -> Result<()> {
        let request = Request::Delete {
            bucket: self.name.to_string(),
            key,
            vclock: None,
        };
        match self.transport.call(request).await? {
            Response::Done => Ok(()),
            other => Err(RpcError::unexpected("delete", &other).into()),
        }
    }

    async fn mutate<F>(&self, key: String, mutation: F) -> Result<Stored>
    where
        F: FnOnce(Document) -> Document,
    {
        let original = match self.get(&key).await {
            Ok(Some(Fetched::Document(doc))) => doc,
            Ok(Some(Fetched::Siblings(_))) => {
                return Err(RiaktiveError::SiblingMutation {
                    bucket: self.name.to_string(),
                    key,
                })
            }
            Ok(None) => {
                return Err(RiaktiveError::MissingDocument {
                    bucket: self.name.to_string(),
                    key,
                })
            }
            Err(e) => return Err(self.mutation_failed(key, e)),
        };

        let vclock = original.vclock().cloned();
        let mut mutated = mutation(original);
        mutated.set_vclock(vclock);
        match self.put(Some(key.clone()), mutated, None).await {
            Ok(stored) => Ok(stored),
            Err(e) => Err(self.mutation_failed(key, e)),
        }
    }

    fn mutation_failed(&self, key: String, source: RiaktiveError) -> RiaktiveError {
        RiaktiveError::MutationFailed {
            bucket: self.name.to_string(),
            key,
            source: Box::new(source),
        }
    }

    async fn keys_page(&self, continuation: Option<String>) -> Result<Page> {
        let request = Request::ListKeys {
            bucket: self.name.to_string(),
            continuation,
        };
        match self.transport.call(request).await? {
            Response::Keys(page) => Ok(page),
            other => Err(RpcError::unexpected("list_keys", &other).into()),
        }
    }

    async fn get_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.keys_page(continuation).await?;
            keys.extend(page.keys);
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => return Ok(keys),
            }
        }
    }

    async fn get_by_keys(&self, keys: Vec<String>) -> Result<Vec<Option<Fetched>>> {
        try_join_all(keys.iter().map(|key| self.get(key))).await
    }

    async fn get_keys_by_index(&self, lookup: &IndexLookup) -> Result<Page> {
        let query = lookup.to_query(&self.name);
        debug!(bucket = %self.name, index = %query.index, "Requesting keys by index");
        match self.transport.call(Request::IndexQuery(query)).await? {
            Response::Keys(page) => Ok(page),
            other => Err(RpcError::unexpected("index_query", &other).into()),
        }
    }

    async fn get_by_index(&self, lookup: &IndexLookup) -> Result<IndexResults> {
        let page = self.get_keys_by_index(lookup).await?;
        let documents = try_join_all(page.keys.iter().map(|key| self.get(key)))
            .await?
            .into_iter()
            .flatten()
            .collect();
        Ok(IndexResults {
            documents,
            continuation: page.continuation,
        })
    }
}

type OpFuture = BoxFuture<'static, ()>;

/// One operation submitted to a bucket's controller
pub struct BucketOp {
    kind: &'static str,
    run: Box<dyn FnOnce(Arc<BucketApi>) -> OpFuture + Send>,
}

impl BucketOp {
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Handle to one provisioned bucket
#[derive(Clone)]
pub struct Bucket {
    name: Arc<str>,
    alias: Option<Arc<str>>,
    node_id: Arc<str>,
    controller: ReadinessController<BucketOp>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("state", &self.state())
            .finish()
    }
}

/// Start one task that polls every dispatched operation of a bucket.
///
/// Operations are first polled in the order they were sent, so they reach the
/// pool (and through it the store) in dispatch order, then run concurrently.
fn run_in_order(bucket: Arc<str>) -> mpsc::UnboundedSender<BoxFuture<'static, ()>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
    tokio::spawn(async move {
        let mut running = FuturesUnordered::new();
        loop {
            tokio::select! {
                biased;
                op = rx.recv() => match op {
                    Some(op) => running.push(op),
                    None => break,
                },
                Some(()) = running.next(), if !running.is_empty() => {}
            }
        }
        while running.next().await.is_some() {}
        debug!(bucket = %bucket, "Operation executor stopped");
    });
    tx
}

impl Bucket {
    pub(crate) fn spawn(
        name: &str,
        options: &BucketOptions,
        transport: Arc<Transport>,
        caches: ProvisionCaches,
        ids: IdStrategy,
        node_id: String,
    ) -> Self {
        let name: Arc<str> = Arc::from(name);
        let api = Arc::new(BucketApi {
            name: Arc::clone(&name),
            transport: Arc::clone(&transport),
            ids,
        });

        let executor = run_in_order(Arc::clone(&name));
        let dispatcher = move |op: BucketOp| {
            debug!(bucket = %api.name, op = op.kind, "Dispatching operation");
            if executor.send((op.run)(Arc::clone(&api))).is_err() {
                warn!(bucket = %api.name, op = op.kind, "Executor stopped, dropping operation");
            }
        };
        let controller =
            ReadinessController::spawn(name.to_string(), options.plan(), transport, caches, dispatcher);

        Self {
            name,
            alias: options.alias.as_deref().map(Arc::from),
            node_id: Arc::from(node_id),
            controller,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn state(&self) -> ReadinessState {
        self.controller.state()
    }

    pub fn status(&self) -> Status {
        self.controller.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.controller.subscribe()
    }

    /// Resolve once provisioned, or with the first provisioning failure
    pub async fn wait_ready(&self) -> Result<()> {
        Ok(self.controller.wait_ready().await?)
    }

    /// Rerun the provisioning step that last failed
    pub fn retry(&self) {
        self.controller.retry();
    }

    async fn submit<T, F, Fut>(&self, kind: &'static str, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<BucketApi>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let op = BucketOp {
            kind,
            run: Box::new(move |api| {
                async move {
                    let _ = tx.send(operation(api).await);
                }
                .boxed()
            }),
        };
        self.controller.operate(op)?;
        rx.await
            .map_err(|_| RiaktiveError::Abandoned(self.name.to_string()))?
    }

    /// Read one key; siblings come back as [`Fetched::Siblings`]
    pub async fn get(&self, key: impl Into<String>) -> Result<Option<Fetched>> {
        let key = key.into();
        self.submit("get", move |api| async move { api.get(&key).await })
            .await
    }

    /// Store a document under its `id`, or under a generated key
    pub async fn put(&self, doc: Document) -> Result<Stored> {
        self.submit("put", move |api| async move { api.put(None, doc, None).await })
            .await
    }

    pub async fn put_with_key(&self, key: impl Into<String>, doc: Document) -> Result<Stored> {
        let key = key.into();
        self.submit("put", move |api| async move {
            api.put(Some(key), doc, None).await
        })
        .await
    }

    /// Store a document with `indexes` instead of the document's own
    pub async fn put_with_indexes(&self, doc: Document, indexes: Indexes) -> Result<Stored> {
        self.submit("put", move |api| async move {
            api.put(None, doc, Some(indexes)).await
        })
        .await
    }

    pub async fn del(&self, target: impl Into<DeleteTarget>) -> Result<()> {
        let key = target.into().into_key()?;
        self.submit("del", move |api| async move { api.del(key).await })
            .await
    }

    /// Read, transform and write back one document, keeping its vclock
    pub async fn mutate<F>(&self, key: impl Into<String>, mutation: F) -> Result<Stored>
    where
        F: FnOnce(Document) -> Document + Send + 'static,
    {
        let key = key.into();
        self.submit("mutate", move |api| async move {
            api.mutate(key, mutation).await
        })
        .await
    }

    /// Every key in the bucket, following continuations to the end
    pub async fn get_keys(&self) -> Result<Vec<String>> {
        self.submit("get_keys", |api| async move { api.get_keys().await })
            .await
    }

    pub async fn get_by_keys<I, S>(&self, keys: I) -> Result<Vec<Option<Fetched>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.submit("get_by_keys", move |api| async move {
            api.get_by_keys(keys).await
        })
        .await
    }

    /// One page of keys matching `lookup`
    pub async fn get_keys_by_index(&self, lookup: IndexLookup) -> Result<Page> {
        self.submit("get_keys_by_index", move |api| async move {
            api.get_keys_by_index(&lookup).await
        })
        .await
    }

    /// One page of documents matching `lookup`; missing keys are skipped
    pub async fn get_by_index(&self, lookup: IndexLookup) -> Result<IndexResults> {
        self.submit("get_by_index", move |api| async move {
            api.get_by_index(&lookup).await
        })
        .await
    }

    /// Resumable cursor over every page matching `lookup`
    pub fn index_scan(&self, lookup: IndexLookup) -> IndexScan {
        IndexScan {
            bucket: self.clone(),
            lookup,
            done: false,
        }
    }

    /// Read `key` and settle siblings by their embedded version vectors
    pub async fn reconcile(&self, key: impl Into<String>) -> Result<Option<Resolution>> {
        let owner = self.node_id.to_string();
        match self.get(key).await? {
            None => Ok(None),
            Some(Fetched::Document(doc)) => Ok(Some(Resolution::Winner(doc))),
            Some(Fetched::Siblings(docs)) => siblings::reconcile(docs, &owner).map(Some),
        }
    }
}

/// Cursor over index query pages
///
/// Each call to [`IndexScan::next_page`] resumes from the continuation token
/// of the previous page. [`IndexScan::continuation`] can be stored and later
/// fed back through [`IndexLookup::after`].
#[derive(Debug, Clone)]
pub struct IndexScan {
    bucket: Bucket,
    lookup: IndexLookup,
    done: bool,
}

impl IndexScan {
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.done {
            return Ok(None);
        }
        let page = self.bucket.get_keys_by_index(self.lookup.clone()).await?;
        match &page.continuation {
            Some(next) => self.lookup.continuation = Some(next.clone()),
            None => self.done = true,
        }
        Ok(Some(page))
    }

    /// Token to resume after the last page read
    pub fn continuation(&self) -> Option<&str> {
        self.lookup.continuation.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Drain the remaining pages into one key list
    pub async fn collect_keys(mut self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        while let Some(page) = self.next_page().await? {
            keys.extend(page.keys);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bucket_name_from_parts() {
        assert_eq!(bucket_name(&["app", "", "users"]), "app_users");
        assert_eq!(bucket_name(&["users"]), "users");
        assert_eq!(bucket_name::<&str>(&[]), "");
    }

    #[test]
    fn test_default_options_allow_siblings() {
        let options = BucketOptions::new();
        assert_eq!(options.properties.get("allow_mult"), Some(&json!(true)));
        assert_eq!(options.plan().schema, None);
    }

    #[test]
    fn test_default_index_is_opt_in() {
        let options = BucketOptions::new().schema("foo");
        assert_eq!(options.search_index, None);
        let options = options.with_default_index("users");
        assert_eq!(options.search_index.as_deref(), Some("users_index"));
        let options = options.with_default_index("other");
        assert_eq!(options.search_index.as_deref(), Some("users_index"));
    }

    #[test]
    fn test_options_from_json() {
        let options = BucketOptions::from_value(json!({
            "alias": "people",
            "schema": "user_schema",
            "schemaPath": "/etc/schemas/user.xml",
            "search_index": "user_index",
            "n_val": 3,
            "allow_mult": false,
        }))
        .unwrap();
        assert_eq!(options.alias.as_deref(), Some("people"));
        assert_eq!(options.schema_path, Some(PathBuf::from("/etc/schemas/user.xml")));
        let plan = options.plan();
        assert_eq!(plan.properties.get("n_val"), Some(&json!(3)));
        assert_eq!(plan.properties.get("allow_mult"), Some(&json!(false)));
        assert!(!plan.properties.contains_key("alias"));
        assert!(!plan.properties.contains_key("schemaPath"));
    }

    #[test]
    fn test_options_reject_non_string_schema() {
        assert!(BucketOptions::from_value(json!({"schema": 7})).is_err());
        assert!(BucketOptions::from_value(json!("users")).is_err());
    }

    #[test]
    fn test_delete_targets() {
        assert_eq!(DeleteTarget::from("k").into_key().unwrap(), "k");
        assert_eq!(
            DeleteTarget::from(json!({"id": "k", "name": "x"})).into_key().unwrap(),
            "k"
        );
        assert!(matches!(
            DeleteTarget::from(json!(["a", "b"])).into_key(),
            Err(RiaktiveError::MultiDelete)
        ));
        assert!(matches!(
            DeleteTarget::from(vec!["a", "b"]).into_key(),
            Err(RiaktiveError::MultiDelete)
        ));
        assert!(matches!(
            DeleteTarget::from(json!({"name": "x"})).into_key(),
            Err(RiaktiveError::MissingKey)
        ));
    }
}
