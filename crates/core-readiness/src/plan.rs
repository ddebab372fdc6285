//! What a resource needs before it is ready, and the property diff

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Bucket properties keyed by property name
pub type Properties = BTreeMap<String, Value>;

/// Keys that describe provisioning inputs rather than bucket properties
pub const NON_PROPERTY_KEYS: &[&str] = &["schema", "schemaPath", "schema_path"];

/// Provisioning inputs for one resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadinessPlan {
    /// Search schema name
    pub schema: Option<String>,
    /// Local file holding the schema content
    pub schema_path: Option<PathBuf>,
    /// Search index bound to `schema`
    pub search_index: Option<String>,
    /// Desired bucket properties
    pub properties: Properties,
}

impl ReadinessPlan {
    /// Properties to assert on the bucket, including the search index binding
    pub fn desired_properties(&self) -> Properties {
        let mut desired = self.properties.clone();
        if let Some(index) = &self.search_index {
            desired.insert("search_index".to_string(), Value::String(index.clone()));
        }
        desired
    }
}

/// Desired entries whose current value differs or is missing.
///
/// Keys present only in `current` are left alone, as are the provisioning
/// inputs in [`NON_PROPERTY_KEYS`].
pub fn diff(current: &Properties, desired: &Properties) -> Properties {
    desired
        .iter()
        .filter(|(key, _)| !NON_PROPERTY_KEYS.contains(&key.as_str()))
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
