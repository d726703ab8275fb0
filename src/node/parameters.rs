//! Explicit parameter access for nodes.
//!
//! Every node type lists its parameters through [`ParameterHolder`]. The engine
//! reads them for persistence and cache keys and writes them for edits; it never
//! inspects node internals beyond this interface.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value kind of a parameter, used by the CLI listing and for coercion checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Bool,
    Integer,
    Number,
    Text,
    /// Structured value (lists, objects).
    Json,
}

impl ParameterKind {
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        match self {
            ParameterKind::Bool => value.is_boolean(),
            ParameterKind::Integer => value.is_i64() || value.is_u64(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Text => value.is_string(),
            ParameterKind::Json => true,
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterKind::Bool => "bool",
            ParameterKind::Integer => "integer",
            ParameterKind::Number => "number",
            ParameterKind::Text => "text",
            ParameterKind::Json => "json",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub key: String,
    pub name: String,
    pub description: String,
    pub kind: ParameterKind,
    pub default: serde_json::Value,
}

impl ParameterDescriptor {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        kind: ParameterKind,
        default: serde_json::Value,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            description: String::new(),
            kind,
            default,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Reject values of the wrong kind before they reach the node.
    pub fn check(&self, value: &serde_json::Value) -> Result<()> {
        if self.kind.accepts(value) {
            Ok(())
        } else {
            Err(EngineError::parameter(
                &self.key,
                format!("expected {}, got {}", self.kind, value),
            ))
        }
    }
}

/// Parameter access implemented per node type.
pub trait ParameterHolder {
    fn list_parameters(&self) -> BTreeMap<String, ParameterDescriptor>;

    fn get_parameter(&self, key: &str) -> Option<serde_json::Value>;

    fn set_parameter(&mut self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Current value of every listed parameter.
    fn parameters(&self) -> BTreeMap<String, serde_json::Value> {
        self.list_parameters()
            .into_keys()
            .filter_map(|key| self.get_parameter(&key).map(|value| (key, value)))
            .collect()
    }
}

/// Canonical rendering of a node's parameter values.
///
/// Keys are sorted at every nesting level, so equal parameter values always
/// produce the same snapshot string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSnapshot(String);

impl ParameterSnapshot {
    pub fn of<H: ParameterHolder + ?Sized>(holder: &H) -> Self {
        let map: serde_json::Map<String, serde_json::Value> =
            holder.parameters().into_iter().collect();
        Self(serde_json::Value::Object(map).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ParameterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParameterSnapshot({})", self.0)
    }
}
