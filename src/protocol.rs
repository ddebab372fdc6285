/*!
 * Request/response surface of a storage node connection
 *
 * The wire encoding lives behind [`NodeConnection`]: one request in, one
 * response out. Streaming replies (key listings, index scans) are modelled as
 * pages carrying a continuation token.
 */

use async_trait::async_trait;
use riaktive_core_readiness::Properties;
use riaktive_core_resilience::ConnectionFactory;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Content type used for every document body
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Opaque causality token issued by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VClock(Vec<u8>);

impl VClock {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        VClock(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for VClock {
    fn from(bytes: Vec<u8>) -> Self {
        VClock(bytes)
    }
}

impl From<&str> for VClock {
    fn from(s: &str) -> Self {
        VClock(s.as_bytes().to_vec())
    }
}

/// One secondary index term in wire form (`name_bin` / `name_int`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub key: String,
    pub value: String,
}

impl IndexEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One stored value (a sibling when there are several)
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub value: Value,
    pub content_type: String,
    pub indexes: Vec<IndexEntry>,
    /// Tombstone marker
    pub deleted: bool,
}

impl Content {
    pub fn json(value: Value) -> Self {
        Self {
            value,
            content_type: JSON_CONTENT_TYPE.to_string(),
            indexes: Vec::new(),
            deleted: false,
        }
    }

    pub fn with_indexes(mut self, indexes: Vec<IndexEntry>) -> Self {
        self.indexes = indexes;
        self
    }

    pub fn tombstone() -> Self {
        Self {
            deleted: true,
            ..Self::json(Value::Null)
        }
    }
}

/// Exact match or inclusive range over one secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRange {
    Key(String),
    Range { min: String, max: String },
}

/// Secondary index query against one bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub bucket: String,
    pub index: String,
    pub range: IndexRange,
    pub max_results: Option<u32>,
    pub continuation: Option<String>,
}

/// One page of keys and the token to fetch the next one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub keys: Vec<String>,
    pub continuation: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    GetBucketProps {
        bucket: String,
    },
    SetBucketProps {
        bucket: String,
        props: Properties,
    },
    GetSchema {
        name: String,
    },
    PutSchema {
        name: String,
        content: String,
    },
    GetSearchIndex {
        name: String,
    },
    PutSearchIndex {
        name: String,
        schema: String,
    },
    Get {
        bucket: String,
        key: String,
    },
    Put {
        bucket: String,
        key: String,
        vclock: Option<VClock>,
        content: Content,
        return_body: bool,
    },
    Delete {
        bucket: String,
        key: String,
        vclock: Option<VClock>,
    },
    ListKeys {
        bucket: String,
        continuation: Option<String>,
    },
    IndexQuery(IndexQuery),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::GetBucketProps { .. } => "get_bucket_props",
            Request::SetBucketProps { .. } => "set_bucket_props",
            Request::GetSchema { .. } => "get_schema",
            Request::PutSchema { .. } => "put_schema",
            Request::GetSearchIndex { .. } => "get_search_index",
            Request::PutSearchIndex { .. } => "put_search_index",
            Request::Get { .. } => "get",
            Request::Put { .. } => "put",
            Request::Delete { .. } => "delete",
            Request::ListKeys { .. } => "list_keys",
            Request::IndexQuery(_) => "index_query",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pong,
    /// Acknowledgement without a payload
    Done,
    Properties(Properties),
    /// Schema content, `None` when not found
    Schema(Option<String>),
    /// Schema bound to the index, `None` when not found
    SearchIndex(Option<String>),
    Object {
        vclock: Option<VClock>,
        contents: Vec<Content>,
    },
    Stored {
        vclock: Option<VClock>,
    },
    Keys(Page),
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Response::Pong => "pong",
            Response::Done => "done",
            Response::Properties(_) => "properties",
            Response::Schema(_) => "schema",
            Response::SearchIndex(_) => "search_index",
            Response::Object { .. } => "object",
            Response::Stored { .. } => "stored",
            Response::Keys(_) => "keys",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure of a single node request
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Error reported by the node itself
    #[error("Node error: {0}")]
    Node(String),

    #[error("Unexpected '{response}' response to '{request}'")]
    Unexpected {
        request: &'static str,
        response: &'static str,
    },
}

impl RpcError {
    pub fn unexpected(request: &'static str, response: &Response) -> Self {
        RpcError::Unexpected {
            request,
            response: response.name(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Disconnected(_) | RpcError::Timeout(_))
    }
}

/// An open connection to one storage node
#[async_trait]
pub trait NodeConnection: Send + Sync + 'static {
    async fn call(&self, request: Request) -> Result<Response, RpcError>;
}

/// Pooled connection type
pub type Connection = Box<dyn NodeConnection>;

/// Opens connections for the pool and reports their loss
pub type Connector = Arc<dyn ConnectionFactory<Connection>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_names_both_sides() {
        let err = RpcError::unexpected("get", &Response::Pong);
        assert_eq!(err.to_string(), "Unexpected 'pong' response to 'get'");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transport_errors_are_transient() {
        assert!(RpcError::Disconnected("reset".into()).is_transient());
        assert!(RpcError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!RpcError::Node("not found".into()).is_transient());
    }

    #[test]
    fn test_tombstone_is_deleted_json() {
        let content = Content::tombstone();
        assert!(content.deleted);
        assert_eq!(content.content_type, JSON_CONTENT_TYPE);
    }
}
