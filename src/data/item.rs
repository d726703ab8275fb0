//! Data items: the opaque payloads carried by data rows.

use crate::cache::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::data::types::DataTypeId;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A payload flowing through the graph.
///
/// The engine never looks inside an item. It only needs the type tag for
/// slot compatibility and a content fingerprint for the result cache.
pub trait Data: Any + Send + Sync + fmt::Debug {
    fn data_type(&self) -> DataTypeId;

    /// Content fingerprint. Equal content must produce equal fingerprints.
    fn fingerprint(&self) -> Fingerprint;

    /// JSON form used when cached rows are persisted. `None` = not persistable.
    fn to_json(&self) -> Option<serde_json::Value> {
        None
    }

    /// Short human-readable rendering for logs and the CLI.
    fn display(&self) -> String {
        format!("{:?}", self)
    }

    fn as_any(&self) -> &dyn Any;
}

/// Items are shared by reference between tables; annotations are not.
pub type DataItem = Arc<dyn Data>;

impl dyn Data {
    pub fn downcast_ref<T: Data>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Built-in item: a JSON value tagged with a data type.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonData {
    pub data_type: DataTypeId,
    pub value: serde_json::Value,
}

impl JsonData {
    pub fn new(data_type: impl Into<DataTypeId>, value: serde_json::Value) -> Self {
        Self {
            data_type: data_type.into(),
            value,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text", serde_json::Value::String(text.into()))
    }

    pub fn number(number: f64) -> Self {
        Self::new("number", serde_json::json!(number))
    }

    pub fn list(values: Vec<serde_json::Value>) -> Self {
        Self::new("list", serde_json::Value::Array(values))
    }

    pub fn into_item(self) -> DataItem {
        Arc::new(self)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

impl Data for JsonData {
    fn data_type(&self) -> DataTypeId {
        self.data_type.clone()
    }

    fn fingerprint(&self) -> Fingerprint {
        // serde_json maps are ordered by key, so this rendering is canonical
        FingerprintBuilder::new()
            .field("type", self.data_type.as_str())
            .field("value", &self.value.to_string())
            .finish()
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        Some(self.value.clone())
    }

    fn display(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_content_equal_fingerprint() {
        let a = JsonData::new("json", serde_json::json!({"b": 1, "a": 2}));
        let b = JsonData::new("json", serde_json::json!({"a": 2, "b": 1}));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_type_is_part_of_fingerprint() {
        let a = JsonData::new("json", serde_json::json!("x"));
        let b = JsonData::text("x");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_downcast() {
        let item = JsonData::number(2.0).into_item();
        let json = item.downcast_ref::<JsonData>().unwrap();
        assert_eq!(json.value, serde_json::json!(2.0));
    }
}
