/*!
 * Secondary index encoding and index query building
 *
 * Documents carry indexes as plain names mapped to a value or a list of
 * values. On the wire every name carries a type suffix: `_int` for numbers,
 * `_bin` for everything else. Names that already end in a suffix are sent
 * untouched.
 */

use crate::protocol::{IndexEntry, IndexQuery, IndexRange};
use serde_json::Value;
use std::collections::BTreeMap;

/// Index name → value (or array of values)
pub type Indexes = BTreeMap<String, Value>;

const INT_SUFFIX: &str = "_int";
const BIN_SUFFIX: &str = "_bin";

/// Built-in indexes that never take a suffix
const SPECIAL_INDEXES: &[&str] = &["$key", "$bucket"];

fn has_suffix(name: &str) -> bool {
    name.ends_with(INT_SUFFIX) || name.ends_with(BIN_SUFFIX)
}

fn suffixed(name: &str, sample: &Value) -> String {
    if has_suffix(name) {
        name.to_string()
    } else if sample.is_number() {
        format!("{name}{INT_SUFFIX}")
    } else {
        format!("{name}{BIN_SUFFIX}")
    }
}

fn term(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn document indexes into wire entries.
///
/// The suffix for a list is chosen from its first element. `null` values are
/// skipped.
pub fn encode(indexes: &Indexes) -> Vec<IndexEntry> {
    let mut entries = Vec::new();
    for (name, value) in indexes {
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let Some(sample) = values.first() else {
            continue;
        };
        let key = suffixed(name, sample);
        entries.extend(
            values
                .into_iter()
                .filter(|v| !v.is_null())
                .map(|v| IndexEntry::new(key.clone(), term(v))),
        );
    }
    entries
}

/// Turn wire entries back into document indexes.
///
/// Suffixes are stripped, `_int` terms become integers and repeated names are
/// collected into arrays in the order received.
pub fn decode(entries: &[IndexEntry]) -> Indexes {
    let mut indexes = Indexes::new();
    for entry in entries {
        let (name, value) = if let Some(name) = entry.key.strip_suffix(INT_SUFFIX) {
            let value = entry
                .value
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(entry.value.clone()));
            (name, value)
        } else if let Some(name) = entry.key.strip_suffix(BIN_SUFFIX) {
            (name, Value::String(entry.value.clone()))
        } else {
            (entry.key.as_str(), Value::String(entry.value.clone()))
        };

        match indexes.get_mut(name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                indexes.insert(name.to_string(), value);
            }
        }
    }
    indexes
}

/// A secondary index lookup, before it is bound to a bucket
///
/// ```
/// use riaktive::indexes::IndexLookup;
///
/// let lookup = IndexLookup::between("age", 21, 35).limit(100);
/// let query = lookup.to_query("users");
/// assert_eq!(query.index, "age_int");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IndexLookup {
    pub index: String,
    pub start: Value,
    pub finish: Option<Value>,
    pub limit: Option<u32>,
    pub continuation: Option<String>,
}

impl IndexLookup {
    /// Exact match on `value`
    pub fn matching(index: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            index: index.into(),
            start: value.into(),
            finish: None,
            limit: None,
            continuation: None,
        }
    }

    /// Inclusive range `start..=finish`
    pub fn between(
        index: impl Into<String>,
        start: impl Into<Value>,
        finish: impl Into<Value>,
    ) -> Self {
        Self {
            finish: Some(finish.into()),
            ..Self::matching(index, start)
        }
    }

    pub fn limit(mut self, max_results: u32) -> Self {
        self.limit = Some(max_results);
        self
    }

    /// Resume after a page previously returned
    pub fn after(mut self, continuation: impl Into<String>) -> Self {
        self.continuation = Some(continuation.into());
        self
    }

    /// Wire name of the index; the suffix is inferred from the start value
    pub fn wire_index(&self) -> String {
        if SPECIAL_INDEXES.contains(&self.index.as_str()) {
            self.index.clone()
        } else {
            suffixed(&self.index, &self.start)
        }
    }

    pub fn to_query(&self, bucket: &str) -> IndexQuery {
        let range = match &self.finish {
            Some(finish) => IndexRange::Range {
                min: term(&self.start),
                max: term(finish),
            },
            None => IndexRange::Key(term(&self.start)),
        };
        IndexQuery {
            bucket: bucket.to_string(),
            index: self.wire_index(),
            range,
            max_results: self.limit,
            continuation: self.continuation.clone(),
        }
    }
}
