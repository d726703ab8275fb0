//! Graph documents
//!
//! A graph is saved as one JSON document:
//!
//! ```text
//! GraphDocument
//! ├── version
//! ├── nodes[]   id, type_id, name, enabled, pass_through, parameters,
//! │             inputs[] / outputs[] (slot name, data type, optional)
//! ├── edges[]   source {node, slot} -> target {node, slot}, insertion order
//! └── cache[]   node, parameter snapshot, input fingerprint,
//!               slots[] of rows (data type, JSON value, annotations, index)
//! ```
//!
//! Loading recreates nodes through a [`NodeCatalog`] and re-checks the graph
//! for cycles, since edges are restored without the per-edge cycle check.

use crate::cache::{CacheEntry, CachedOutput, Fingerprint, ResultCache};
use crate::data::annotation::AnnotationSet;
use crate::data::slot::SlotInfo;
use crate::data::table::{DataRow, DataTable};
use crate::data::types::{DataTypeId, DataTypeRegistry};
use crate::error::{EngineError, Result};
use crate::graph::{Edge, Graph, NodeEntry, NodeId};
use crate::node::catalog::NodeCatalog;
use crate::node::parameters::{ParameterHolder, ParameterSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Current document format version
pub const DOCUMENT_VERSION: u32 = 1;

/// Graph document file extension
pub const GRAPH_FILE_EXTENSION: &str = "json";

fn default_document_version() -> u32 {
    DOCUMENT_VERSION
}

fn default_true() -> bool {
    true
}

// ==================== Document Types ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDocument {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub optional: bool,
}

impl From<&SlotInfo> for SlotDocument {
    fn from(info: &SlotInfo) -> Self {
        Self {
            name: info.name.clone(),
            data_type: info.data_type.to_string(),
            optional: info.optional,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: NodeId,
    pub type_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub pass_through: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub inputs: Vec<SlotDocument>,
    #[serde(default)]
    pub outputs: Vec<SlotDocument>,
}

impl NodeDocument {
    fn from_entry(entry: &NodeEntry) -> Self {
        Self {
            id: entry.id(),
            type_id: entry.node_type().to_string(),
            name: entry.name().to_string(),
            enabled: entry.is_enabled(),
            pass_through: entry.is_pass_through(),
            parameters: entry.node().parameters(),
            inputs: entry.input_slots().iter().map(SlotDocument::from).collect(),
            outputs: entry.output_slots().iter().map(SlotDocument::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDocument {
    pub data_type: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub annotations: AnnotationSet,
    #[serde(default)]
    pub original_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSlotDocument {
    pub slot: String,
    pub rows: Vec<RowDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryDocument {
    pub node: NodeId,
    pub parameters: ParameterSnapshot,
    pub inputs: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub slots: Vec<CachedSlotDocument>,
}

impl CacheEntryDocument {
    /// `None` if some cached item has no JSON form.
    fn from_entry(node: NodeId, entry: &CacheEntry) -> Option<Self> {
        let mut slots = Vec::with_capacity(entry.output.slots.len());
        for (slot, table) in &entry.output.slots {
            let mut rows = Vec::with_capacity(table.len());
            for row in table.rows() {
                rows.push(RowDocument {
                    data_type: row.item.data_type().to_string(),
                    value: row.item.to_json()?,
                    annotations: row.annotations.clone(),
                    original_index: row.original_index,
                });
            }
            slots.push(CachedSlotDocument {
                slot: slot.clone(),
                rows,
            });
        }
        Some(Self {
            node,
            parameters: entry.parameters.clone(),
            inputs: entry.inputs.clone(),
            created_at: entry.output.created_at,
            slots,
        })
    }

    fn to_entry(&self, registry: &DataTypeRegistry) -> Result<CacheEntry> {
        let mut slots = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let mut table = DataTable::new();
            for row in &slot.rows {
                let item = registry.decode(&DataTypeId::new(row.data_type.as_str()), &row.value)?;
                table.push_row(DataRow {
                    item,
                    annotations: row.annotations.clone(),
                    original_index: row.original_index,
                });
            }
            slots.push((slot.slot.clone(), table));
        }
        Ok(CacheEntry {
            parameters: self.parameters.clone(),
            inputs: self.inputs.clone(),
            output: Arc::new(CachedOutput {
                slots,
                created_at: self.created_at,
            }),
        })
    }
}

// ==================== Graph Document ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default = "default_document_version")]
    pub version: u32,
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache: Vec<CacheEntryDocument>,
}

impl Default for GraphDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            nodes: Vec::new(),
            edges: Vec::new(),
            cache: Vec::new(),
        }
    }
}

impl GraphDocument {
    /// Describe `graph`, with the cached outputs of its nodes when `cache` is given.
    pub fn from_graph(graph: &Graph, cache: Option<&ResultCache>) -> Self {
        let nodes: Vec<NodeDocument> = graph.nodes().map(NodeDocument::from_entry).collect();

        let mut cached = Vec::new();
        if let Some(cache) = cache {
            for node in graph.node_ids() {
                for entry in cache.entries_for(node) {
                    match CacheEntryDocument::from_entry(node, &entry) {
                        Some(document) => cached.push(document),
                        None => tracing::warn!(
                            "Skipping cached output of {:?}: an item has no JSON form",
                            node
                        ),
                    }
                }
            }
        }

        Self {
            version: DOCUMENT_VERSION,
            nodes,
            edges: graph.edges().to_vec(),
            cache: cached,
        }
    }

    /// Rebuild the graph. Fails on unknown node types, bad parameters,
    /// dangling edges or a cycle.
    pub fn to_graph(&self, catalog: &NodeCatalog, registry: Arc<DataTypeRegistry>) -> Result<Graph> {
        if self.version > DOCUMENT_VERSION {
            return Err(EngineError::Serialization(format!(
                "Unsupported graph document version {} (newest known is {})",
                self.version, DOCUMENT_VERSION
            )));
        }

        let mut graph = Graph::new(registry);
        for document in &self.nodes {
            let mut node = catalog
                .create(&document.type_id)
                .map_err(|e| e.with_context(format!("node '{}'", document.name)))?;
            for (key, value) in &document.parameters {
                node.set_parameter(key, value.clone())
                    .map_err(|e| e.with_context(format!("node '{}'", document.name)))?;
            }

            let inputs: Vec<SlotDocument> =
                node.input_slots().iter().map(SlotDocument::from).collect();
            let outputs: Vec<SlotDocument> =
                node.output_slots().iter().map(SlotDocument::from).collect();
            if inputs != document.inputs || outputs != document.outputs {
                tracing::warn!(
                    "Slots of '{}' differ from the saved definition; using the node's own",
                    document.name
                );
            }

            graph.insert_node(document.id, document.name.clone(), node)?;
            graph.set_enabled(document.id, document.enabled)?;
            graph.set_pass_through(document.id, document.pass_through)?;
        }

        for edge in &self.edges {
            graph.insert_edge_unchecked(edge.clone())?;
        }
        graph.topological_order()?;

        tracing::debug!(
            "Loaded graph with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Import the cached outputs into `cache`. Returns the number of entries.
    pub fn restore_cache(&self, cache: &ResultCache, registry: &DataTypeRegistry) -> Result<usize> {
        for document in &self.cache {
            let entry = document.to_entry(registry)?;
            cache.import(document.node, [entry]);
        }
        Ok(self.cache.len())
    }

    /// Load a graph document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Io(e).with_context(format!("reading {:?}", path)))?;

        serde_json::from_str(&content).map_err(|e| {
            EngineError::Serialization(format!("Failed to parse graph file {:?}: {}", path, e))
        })
    }

    /// Save as pretty JSON, creating the parent directory if needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| EngineError::Io(e).with_context(format!("writing {:?}", path)))
    }
}
