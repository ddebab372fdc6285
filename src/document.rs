/*!
 * JSON documents as stored in a bucket
 */

use crate::error::{Result, RiaktiveError};
use crate::indexes::{self, Indexes};
use crate::protocol::{Content, VClock};
use riaktive_core_causality::VersionVector;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Body field holding the document key
pub const ID_FIELD: &str = "id";
/// Body field accepted on input as the document's secondary indexes
pub const INDEXES_FIELD: &str = "_indexes";
/// Body field holding an embedded version vector
pub const VECTOR_FIELD: &str = "_vector";

/// A JSON object body plus the store metadata that travels with it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    body: Map<String, Value>,
    vclock: Option<VClock>,
    indexes: Indexes,
}

impl Document {
    /// Wrap a JSON object.
    ///
    /// An `_indexes` object in the body is moved out into the document's
    /// indexes.
    pub fn new(value: Value) -> Result<Self> {
        let Value::Object(mut body) = value else {
            return Err(RiaktiveError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                kind(&value)
            )));
        };
        let indexes = match body.remove(INDEXES_FIELD) {
            Some(Value::Object(map)) => map.into_iter().collect(),
            Some(other) => {
                return Err(RiaktiveError::InvalidDocument(format!(
                    "{INDEXES_FIELD} must be an object, got {}",
                    kind(&other)
                )))
            }
            None => Indexes::new(),
        };
        Ok(Self {
            body,
            vclock: None,
            indexes,
        })
    }

    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        Self::new(serde_json::to_value(value)?)
    }

    /// Build from a stored value and the reply's vclock
    pub fn from_content(vclock: Option<VClock>, content: &Content) -> Result<Self> {
        let mut doc = Self::new(content.value.clone())?;
        doc.vclock = vclock;
        if !content.indexes.is_empty() {
            doc.indexes = indexes::decode(&content.indexes);
        }
        Ok(doc)
    }

    /// Stored form of the body; `indexes` overrides the document's own
    pub fn to_content(&self, indexes: Option<&Indexes>) -> Content {
        let indexes = indexes.unwrap_or(&self.indexes);
        Content::json(Value::Object(self.body.clone())).with_indexes(indexes::encode(indexes))
    }

    /// Document key, from the `id` field
    pub fn id(&self) -> Option<String> {
        match self.body.get(ID_FIELD)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn set_id(&mut self, key: impl Into<String>) {
        self.body
            .insert(ID_FIELD.to_string(), Value::String(key.into()));
    }

    pub fn with_id(mut self, key: impl Into<String>) -> Self {
        self.set_id(key);
        self
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.body
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.body.insert(field.into(), value.into())
    }

    pub fn vclock(&self) -> Option<&VClock> {
        self.vclock.as_ref()
    }

    pub fn set_vclock(&mut self, vclock: Option<VClock>) {
        self.vclock = vclock;
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    pub fn indexes_mut(&mut self) -> &mut Indexes {
        &mut self.indexes
    }

    pub fn with_index(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.indexes.insert(name.into(), value.into());
        self
    }

    /// Deserialize the body into a typed value
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.body.clone()))?)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    /// Embedded version vector owned by `owner`, if the body carries one
    pub fn vector(&self, owner: &str) -> Result<Option<VersionVector>> {
        match self.body.get(VECTOR_FIELD) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(encoded)) => VersionVector::parse(owner, encoded)
                .map(Some)
                .map_err(|e| RiaktiveError::InvalidDocument(e.to_string())),
            Some(other) => Err(RiaktiveError::InvalidDocument(format!(
                "{VECTOR_FIELD} must be a string, got {}",
                kind(other)
            ))),
        }
    }

    pub fn set_vector(&mut self, vector: &VersionVector) {
        self.body
            .insert(VECTOR_FIELD.to_string(), Value::String(vector.to_string()));
    }

    /// Increment `owner`'s counter in the embedded vector, creating it if needed
    pub fn touch_vector(&mut self, owner: &str) -> Result<VersionVector> {
        let mut vector = self
            .vector(owner)?
            .unwrap_or_else(|| VersionVector::new(owner));
        vector.increment();
        self.set_vector(&vector);
        Ok(vector)
    }
}

impl TryFrom<Value> for Document {
    type Error = RiaktiveError;

    fn try_from(value: Value) -> Result<Self> {
        Document::new(value)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Result of reading one key
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Document(Document),
    /// Concurrent writes the store kept side by side
    Siblings(Vec<Document>),
}

impl Fetched {
    /// Build from a get reply; tombstones are dropped and `None` means nothing is left
    pub fn from_reply(vclock: Option<VClock>, contents: &[Content]) -> Result<Option<Self>> {
        let mut docs = contents
            .iter()
            .filter(|c| !c.deleted)
            .map(|c| Document::from_content(vclock.clone(), c))
            .collect::<Result<Vec<_>>>()?;

        Ok(match docs.len() {
            0 => None,
            1 => docs.pop().map(Fetched::Document),
            _ => Some(Fetched::Siblings(docs)),
        })
    }

    pub fn is_siblings(&self) -> bool {
        matches!(self, Fetched::Siblings(_))
    }

    /// The single document, `None` when there are siblings
    pub fn into_document(self) -> Option<Document> {
        match self {
            Fetched::Document(doc) => Some(doc),
            Fetched::Siblings(_) => None,
        }
    }

    pub fn documents(&self) -> &[Document] {
        match self {
            Fetched::Document(doc) => std::slice::from_ref(doc),
            Fetched::Siblings(docs) => docs,
        }
    }
}
