//! In-memory cluster shared by the client integration tests

#![allow(dead_code)]

use riaktive::prelude::*;
use riaktive::protocol::{Content, IndexRange, Page, VClock};
use riaktive::readiness::Properties;
use riaktive::resilience::ResilienceError;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stored value of one key: current vclock plus live contents (siblings)
#[derive(Debug, Clone, Default)]
struct Object {
    vclock: u64,
    contents: Vec<Content>,
}

/// Store state behind every connection of a [`MemoryCluster`]
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), Object>>,
    props: Mutex<HashMap<String, Properties>>,
    schemas: Mutex<HashMap<String, String>>,
    indexes: Mutex<HashMap<String, String>>,
    log: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<(&'static str, RpcError)>>,
    clock: AtomicU64,
    page_size: Mutex<Option<usize>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn next_vclock(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn injected(&self, request: &Request) -> Option<RpcError> {
        let mut failures = self.failures.lock().unwrap();
        let pos = failures.iter().position(|(name, _)| *name == request.name())?;
        failures.remove(pos).map(|(_, err)| err)
    }

    fn paginate(&self, keys: Vec<String>, limit: Option<u32>, continuation: Option<String>) -> Page {
        let start: usize = continuation.and_then(|c| c.parse().ok()).unwrap_or(0);
        let size = limit
            .map(|l| l as usize)
            .or(*self.page_size.lock().unwrap())
            .unwrap_or(usize::MAX);
        let end = start.saturating_add(size).min(keys.len());
        Page {
            keys: keys[start.min(keys.len())..end].to_vec(),
            continuation: (end < keys.len()).then(|| end.to_string()),
        }
    }

    fn handle(&self, request: Request) -> Result<Response, RpcError> {
        if let Some(err) = self.injected(&request) {
            self.record(format!("{}:failed", request.name()));
            return Err(err);
        }

        match request {
            Request::Ping => Ok(Response::Pong),
            Request::GetBucketProps { bucket } => {
                self.record(format!("get_bucket_props:{bucket}"));
                let props = self.props.lock().unwrap().get(&bucket).cloned();
                Ok(Response::Properties(props.unwrap_or_default()))
            }
            Request::SetBucketProps { bucket, props } => {
                let keys: Vec<_> = props.keys().cloned().collect();
                self.record(format!("set_bucket_props:{bucket}:{}", keys.join(",")));
                self.props
                    .lock()
                    .unwrap()
                    .entry(bucket)
                    .or_default()
                    .extend(props);
                Ok(Response::Done)
            }
            Request::GetSchema { name } => {
                Ok(Response::Schema(self.schemas.lock().unwrap().get(&name).cloned()))
            }
            Request::PutSchema { name, content } => {
                self.record(format!("put_schema:{name}"));
                self.schemas.lock().unwrap().insert(name, content);
                Ok(Response::Done)
            }
            Request::GetSearchIndex { name } => Ok(Response::SearchIndex(
                self.indexes.lock().unwrap().get(&name).cloned(),
            )),
            Request::PutSearchIndex { name, schema } => {
                self.record(format!("put_search_index:{name}"));
                self.indexes.lock().unwrap().insert(name, schema);
                Ok(Response::Done)
            }
            Request::Get { bucket, key } => {
                self.record(format!("get:{bucket}/{key}"));
                let objects = self.objects.lock().unwrap();
                Ok(match objects.get(&(bucket, key)) {
                    Some(object) => Response::Object {
                        vclock: Some(VClock::from(object.vclock.to_string().as_str())),
                        contents: object.contents.clone(),
                    },
                    None => Response::Object {
                        vclock: None,
                        contents: Vec::new(),
                    },
                })
            }
            Request::Put {
                bucket,
                key,
                vclock,
                content,
                ..
            } => {
                self.record(format!("put:{bucket}/{key}"));
                let next = self.next_vclock();
                let mut objects = self.objects.lock().unwrap();
                let object = objects.entry((bucket, key)).or_default();
                let current = VClock::from(object.vclock.to_string().as_str());
                if object.contents.is_empty() || vclock.as_ref() == Some(&current) {
                    object.contents = vec![content];
                } else {
                    object.contents.push(content);
                }
                object.vclock = next;
                Ok(Response::Stored {
                    vclock: Some(VClock::from(next.to_string().as_str())),
                })
            }
            Request::Delete { bucket, key, .. } => {
                self.record(format!("delete:{bucket}/{key}"));
                self.objects.lock().unwrap().remove(&(bucket, key));
                Ok(Response::Done)
            }
            Request::ListKeys {
                bucket,
                continuation,
            } => {
                self.record(format!("list_keys:{bucket}"));
                let keys = self
                    .objects
                    .lock()
                    .unwrap()
                    .keys()
                    .filter(|(b, _)| *b == bucket)
                    .map(|(_, k)| k.clone())
                    .collect();
                Ok(Response::Keys(self.paginate(keys, None, continuation)))
            }
            Request::IndexQuery(query) => {
                self.record(format!("index_query:{}/{}", query.bucket, query.index));
                let numeric = query.index.ends_with("_int");
                let matches = |value: &str| match &query.range {
                    IndexRange::Key(expected) => value == expected,
                    IndexRange::Range { min, max } if numeric => {
                        let parse = |s: &str| s.parse::<i64>().unwrap_or_default();
                        (parse(min.as_str())..=parse(max.as_str())).contains(&parse(value))
                    }
                    IndexRange::Range { min, max } => {
                        min.as_str() <= value && value <= max.as_str()
                    }
                };
                let keys = self
                    .objects
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|((b, _), _)| *b == query.bucket)
                    .filter(|((_, key), object)| {
                        if query.index == "$key" {
                            return matches(key.as_str());
                        }
                        object.contents.iter().any(|c| {
                            c.indexes
                                .iter()
                                .any(|e| e.key == query.index && matches(e.value.as_str()))
                        })
                    })
                    .map(|((_, k), _)| k.clone())
                    .collect();
                Ok(Response::Keys(self.paginate(
                    keys,
                    query.max_results,
                    query.continuation,
                )))
            }
        }
    }
}

/// Connection double; every call goes straight to the shared store
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
}

#[async_trait::async_trait]
impl NodeConnection for MemoryConnection {
    async fn call(&self, request: Request) -> Result<Response, RpcError> {
        let delay = *self.store.delay.lock().unwrap();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.store.handle(request)
    }
}

/// Cluster double: ports marked down refuse to connect
#[derive(Default)]
pub struct MemoryCluster {
    pub store: Arc<MemoryStore>,
    down: Mutex<HashSet<u16>>,
    connects: AtomicU32,
}

impl MemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Connector {
        self.clone()
    }

    pub fn set_down(&self, port: u16) {
        self.down.lock().unwrap().insert(port);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Recorded requests, in the order the store saw them
    pub fn log(&self) -> Vec<String> {
        self.store.log.lock().unwrap().clone()
    }

    /// Position of the first log entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.log().iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Fail the next request named `request` with `err`
    pub fn fail_next(&self, request: &'static str, err: RpcError) {
        self.store.failures.lock().unwrap().push_back((request, err));
    }

    /// Make every later call take `delay` before the store answers
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.store.delay.lock().unwrap() = delay;
    }

    pub fn set_page_size(&self, size: usize) {
        *self.store.page_size.lock().unwrap() = Some(size);
    }

    pub fn set_props(&self, bucket: &str, props: serde_json::Value) {
        self.store
            .props
            .lock()
            .unwrap()
            .insert(bucket.to_string(), serde_json::from_value(props).unwrap());
    }

    pub fn props(&self, bucket: &str) -> Properties {
        self.store
            .props
            .lock()
            .unwrap()
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }

    /// Store a raw value directly, bypassing any client
    pub fn insert(&self, bucket: &str, key: &str, contents: Vec<Content>) {
        let vclock = self.store.next_vclock();
        self.store.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            Object { vclock, contents },
        );
    }
}

#[async_trait::async_trait]
impl ConnectionFactory<Connection> for MemoryCluster {
    async fn connect(&self, node: &NodeConfig) -> Result<Link<Connection>, ResilienceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.down.lock().unwrap().contains(&node.port) {
            return Err(ResilienceError::connection_failed(
                node.address(),
                "connection refused",
            ));
        }
        let connection: Connection = Box::new(MemoryConnection {
            store: Arc::clone(&self.store),
        });
        Ok(Link::detached(connection))
    }
}

/// Configuration for one in-memory node with quick reconnects
pub fn config(ports: &[u16]) -> ClientConfig {
    let mut config = ClientConfig::with_nodes(
        ports
            .iter()
            .map(|port| riaktive::NodeEntry::new("127.0.0.1", *port))
            .collect(),
    );
    config.wait = 10;
    config.index_grace = 10_000;
    config.node_id = Some("test-node".to_string());
    config
}

pub fn schema_file(content: &str) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}
