//! Error handling for the slotflow engine
//!
//! This module defines the engine error type and a Result alias for use
//! throughout the crate. Node implementations report their own failures
//! through `anyhow`; the engine wraps those into [`EngineError::NodeExecution`].

use crate::graph::NodeId;
use crate::validation::ValidationReport;
use thiserror::Error;

/// Main error type for slotflow operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// A data item was inserted into a slot that does not accept its type
    #[error("Type mismatch in {context}: expected '{expected}', found '{found}'")]
    TypeMismatch {
        expected: String,
        found: String,
        context: String,
    },

    /// An edge was requested between slots with no compatibility tier
    #[error("Cannot connect '{source_type}' output to '{target_type}' input")]
    TypeIncompatible {
        source_type: String,
        target_type: String,
    },

    /// Adding an edge would introduce a cycle (or a self-loop)
    #[error("Connecting {source_node} to {target_node} would create a cycle")]
    CycleDetected {
        source_node: NodeId,
        target_node: NodeId,
    },

    /// A graph loaded in bulk turned out to contain a cycle
    #[error("Graph contains a cycle through {0} node(s)")]
    CyclicGraph(usize),

    /// More than one candidate row matched where exactly one was required
    #[error("Reference row {reference_row} matches {candidates} rows in slot '{slot}'")]
    AmbiguousDataMatch {
        slot: String,
        reference_row: usize,
        candidates: usize,
    },

    /// A required slot has no matching row
    #[error("No matching data for required slot '{slot}': {detail}")]
    IncompleteMatch { slot: String, detail: String },

    /// Pre-run validation found errors
    #[error("Validation failed with {} error(s)", .0.error_count())]
    Validation(ValidationReport),

    /// A node failed while running
    #[error("Node '{node_name}' ({node}) failed: {message}")]
    NodeExecution {
        node: NodeId,
        node_name: String,
        message: String,
    },

    /// The run was cancelled
    #[error("Run was cancelled")]
    Cancelled,

    /// The scheduler wait queue is at capacity
    #[error("Run queue is full ({0} waiting)")]
    QueueFull(usize),

    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("Node {node} has no {direction} slot named '{slot}'")]
    SlotNotFound {
        node: NodeId,
        slot: String,
        direction: &'static str,
    },

    #[error("Edge {0} already exists")]
    DuplicateEdge(String),

    #[error("Annotation key '{0}' appears more than once in a row")]
    DuplicateAnnotationKey(String),

    #[error("Unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("Unknown data type '{0}'")]
    UnknownDataType(String),

    /// Errors related to node parameters
    #[error("Parameter '{key}': {message}")]
    Parameter { key: String, message: String },

    /// Errors raised by a data type converter
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error.
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn parameter(key: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Parameter {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Result type alias for slotflow operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
