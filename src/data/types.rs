//! Data type tags and the registry that decides slot compatibility.
//!
//! Every data item carries a nominal [`DataTypeId`]. Slots declare the type
//! they accept; edges are ranked by [`Compatibility`]:
//!
//! 1. **Exact**: same type, an ancestor type, or the universal `any` type.
//! 2. **Trivial**: a registered lossless conversion.
//! 3. **Explicit**: a registered conversion the user opted into.
//!
//! Converters run while rows are copied across an edge into the target input slot.

use crate::data::item::{Data, DataItem, JsonData};
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Nominal data type tag.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DataTypeId(pub String);

impl DataTypeId {
    /// The universal type every item is assignable to.
    pub const ANY: &'static str = "any";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        self.0 == Self::ANY
    }
}

impl fmt::Debug for DataTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataTypeId({})", self.0)
    }
}

impl fmt::Display for DataTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataTypeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Compatibility tier between a source type and a target type.
///
/// Ordered from best to worst so candidates can be sorted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Compatibility {
    Exact,
    Trivial,
    Explicit,
    Incompatible,
}

impl Compatibility {
    pub fn is_compatible(self) -> bool {
        self != Compatibility::Incompatible
    }

    pub fn needs_conversion(self) -> bool {
        matches!(self, Compatibility::Trivial | Compatibility::Explicit)
    }
}

/// Converts an item into another data type.
pub type Converter = Arc<dyn Fn(&DataItem) -> Result<DataItem> + Send + Sync>;

/// Restores a persisted item from its JSON payload.
pub type Decoder = Arc<dyn Fn(&serde_json::Value) -> Result<DataItem> + Send + Sync>;

/// Metadata about a registered data type.
#[derive(Debug, Clone)]
pub struct DataTypeInfo {
    pub id: DataTypeId,
    pub name: String,
    pub parent: Option<DataTypeId>,
}

/// Registry of data types, their hierarchy and conversions.
#[derive(Default, Clone)]
pub struct DataTypeRegistry {
    types: HashMap<DataTypeId, DataTypeInfo>,
    trivial: HashMap<(DataTypeId, DataTypeId), Converter>,
    explicit: HashMap<(DataTypeId, DataTypeId), Converter>,
    decoders: HashMap<DataTypeId, Decoder>,
}

impl fmt::Debug for DataTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTypeRegistry")
            .field("types", &self.types.len())
            .field("trivial_conversions", &self.trivial.len())
            .field("explicit_conversions", &self.explicit.len())
            .finish()
    }
}

impl DataTypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register(DataTypeId::any(), "Any data", None);
        registry
    }

    /// Registry with the types used by the built-in node catalog.
    ///
    /// `text` and `number` both derive from `json`; a number converts trivially
    /// to text, text converts explicitly to a number when it parses.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry.register("json", "JSON value", Some(DataTypeId::any()));
        registry.register("text", "Text", Some("json".into()));
        registry.register("number", "Number", Some("json".into()));
        registry.register("list", "List", Some("json".into()));

        registry.register_trivial_conversion(
            "number",
            "text",
            Arc::new(|item: &DataItem| {
                let value = json_payload(item)?;
                Ok(JsonData::text(value.to_string()).into_item())
            }),
        );
        registry.register_explicit_conversion(
            "text",
            "number",
            Arc::new(|item: &DataItem| {
                let value = json_payload(item)?;
                let text = value.as_str().unwrap_or_default();
                let number: f64 = text.trim().parse().map_err(|_| {
                    EngineError::Conversion(format!("'{}' is not a number", text))
                })?;
                Ok(JsonData::number(number).into_item())
            }),
        );
        registry
    }

    pub fn register(
        &mut self,
        id: impl Into<DataTypeId>,
        name: impl Into<String>,
        parent: Option<DataTypeId>,
    ) {
        let id = id.into();
        self.types.insert(
            id.clone(),
            DataTypeInfo {
                id,
                name: name.into(),
                parent,
            },
        );
    }

    pub fn register_trivial_conversion(
        &mut self,
        from: impl Into<DataTypeId>,
        to: impl Into<DataTypeId>,
        converter: Converter,
    ) {
        self.trivial.insert((from.into(), to.into()), converter);
    }

    pub fn register_explicit_conversion(
        &mut self,
        from: impl Into<DataTypeId>,
        to: impl Into<DataTypeId>,
        converter: Converter,
    ) {
        self.explicit.insert((from.into(), to.into()), converter);
    }

    pub fn register_decoder(&mut self, id: impl Into<DataTypeId>, decoder: Decoder) {
        self.decoders.insert(id.into(), decoder);
    }

    pub fn contains(&self, id: &DataTypeId) -> bool {
        id.is_any() || self.types.contains_key(id)
    }

    pub fn info(&self, id: &DataTypeId) -> Option<&DataTypeInfo> {
        self.types.get(id)
    }

    pub fn types(&self) -> impl Iterator<Item = &DataTypeInfo> {
        self.types.values()
    }

    /// True if an item of type `from` may be stored in a slot of type `to`.
    pub fn is_assignable(&self, from: &DataTypeId, to: &DataTypeId) -> bool {
        if to.is_any() || from == to {
            return true;
        }
        let mut current = self.types.get(from).and_then(|info| info.parent.clone());
        // Parent chains are short; the depth bound guards against a misregistered loop.
        let mut depth = 0;
        while let Some(parent) = current {
            if &parent == to {
                return true;
            }
            depth += 1;
            if depth > 64 {
                break;
            }
            current = self.types.get(&parent).and_then(|info| info.parent.clone());
        }
        false
    }

    pub fn compatibility(&self, from: &DataTypeId, to: &DataTypeId) -> Compatibility {
        if self.is_assignable(from, to) {
            Compatibility::Exact
        } else if self.trivial.contains_key(&(from.clone(), to.clone())) {
            Compatibility::Trivial
        } else if self.explicit.contains_key(&(from.clone(), to.clone())) {
            Compatibility::Explicit
        } else {
            Compatibility::Incompatible
        }
    }

    /// Convert `item` so it is assignable to `to`. Assignable items are returned as-is.
    pub fn convert(&self, item: &DataItem, to: &DataTypeId) -> Result<DataItem> {
        let from = item.data_type();
        if self.is_assignable(&from, to) {
            return Ok(item.clone());
        }
        let key = (from.clone(), to.clone());
        let converter = self
            .trivial
            .get(&key)
            .or_else(|| self.explicit.get(&key))
            .ok_or_else(|| EngineError::TypeIncompatible {
                source_type: from.to_string(),
                target_type: to.to_string(),
            })?;
        let converted = converter(item)?;
        if !self.is_assignable(&converted.data_type(), to) {
            return Err(EngineError::TypeMismatch {
                expected: to.to_string(),
                found: converted.data_type().to_string(),
                context: format!("conversion from '{}'", from),
            });
        }
        Ok(converted)
    }

    /// Restore a persisted item. Types without a registered decoder become [`JsonData`].
    pub fn decode(&self, id: &DataTypeId, value: &serde_json::Value) -> Result<DataItem> {
        match self.decoders.get(id) {
            Some(decoder) => decoder(value),
            None => Ok(JsonData::new(id.clone(), value.clone()).into_item()),
        }
    }
}

fn json_payload(item: &DataItem) -> Result<serde_json::Value> {
    item.to_json().ok_or_else(|| {
        EngineError::Conversion(format!(
            "item of type '{}' has no JSON representation",
            item.data_type()
        ))
    })
}
