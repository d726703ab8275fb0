//! Built-in reference nodes.
//!
//! - `core:constant-source`: emits configured rows, no inputs.
//! - `core:annotate`: adds one annotation to every row (parallelizable).
//! - `core:join-text`: joins two text rows matched by annotation.
//! - `core:collect`: collects grouped rows into one list item.

mod annotate;
mod collect;
mod constant_source;
mod join_text;

pub use annotate::AnnotateNode;
pub use collect::CollectNode;
pub use constant_source::{ConstantRow, ConstantSourceNode};
pub use join_text::JoinTextNode;

use crate::error::{EngineError, Result};
use crate::iteration::IterationSettings;
use crate::node::parameters::{ParameterDescriptor, ParameterKind};

/// Parameter key holding a node's [`IterationSettings`].
pub const ITERATION_PARAMETER: &str = "iteration";

fn iteration_descriptor(default: &IterationSettings) -> ParameterDescriptor {
    ParameterDescriptor::new(
        ITERATION_PARAMETER,
        "Iteration",
        ParameterKind::Json,
        serde_json::to_value(default).unwrap_or(serde_json::Value::Null),
    )
    .with_description("How input rows are matched into iteration steps")
}

fn iteration_value(settings: &IterationSettings) -> Option<serde_json::Value> {
    serde_json::to_value(settings).ok()
}

fn parse_iteration(value: serde_json::Value) -> Result<IterationSettings> {
    serde_json::from_value(value)
        .map_err(|e| EngineError::parameter(ITERATION_PARAMETER, e.to_string()))
}

fn text_parameter(key: &str, value: serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(text) => Ok(text),
        other => Err(EngineError::parameter(
            key,
            format!("expected text, got {}", other),
        )),
    }
}

fn unknown_parameter(key: &str) -> EngineError {
    EngineError::parameter(key, "unknown parameter")
}

/// Text content of an item: the string itself for text, the JSON rendering otherwise.
fn item_text(item: &crate::data::DataItem) -> String {
    match item.to_json() {
        Some(serde_json::Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => item.display(),
    }
}

/// JSON form of an item, falling back to its display string.
fn item_json(item: &crate::data::DataItem) -> serde_json::Value {
    item.to_json()
        .unwrap_or_else(|| serde_json::Value::String(item.display()))
}
