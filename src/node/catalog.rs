//! Node type catalog for creating nodes by type id.
//!
//! Persistence and the CLI only know node types by string id; the catalog
//! maps each id to a factory producing a node with default parameters.

use crate::error::{EngineError, Result};
use crate::node::contract::GraphNode;
use crate::node::nodes::{AnnotateNode, CollectNode, ConstantSourceNode, JoinTextNode};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type NodeFactory = Arc<dyn Fn() -> Box<dyn GraphNode> + Send + Sync>;

/// Display information for a registered node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTypeInfo {
    pub type_id: String,
    pub display_name: String,
    pub description: String,
}

struct CatalogEntry {
    info: NodeTypeInfo,
    factory: NodeFactory,
}

/// Registry of node factories keyed by type id.
#[derive(Default)]
pub struct NodeCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl fmt::Debug for NodeCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCatalog")
            .field("types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the `core:*` nodes registered.
    pub fn with_builtin_nodes() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            "core:constant-source",
            "Constant Source",
            "Emits a configured list of rows",
            || Box::new(ConstantSourceNode::default()),
        );
        catalog.register(
            "core:annotate",
            "Annotate",
            "Sets an annotation on every row",
            || Box::new(AnnotateNode::default()),
        );
        catalog.register(
            "core:join-text",
            "Join Text",
            "Joins matched left and right text rows",
            || Box::new(JoinTextNode::default()),
        );
        catalog.register(
            "core:collect",
            "Collect",
            "Collects each annotation group into a list",
            || Box::new(CollectNode::default()),
        );
        catalog
    }

    /// Register a factory. A later registration under the same id replaces the earlier one.
    pub fn register<F>(
        &mut self,
        type_id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        factory: F,
    ) where
        F: Fn() -> Box<dyn GraphNode> + Send + Sync + 'static,
    {
        let type_id = type_id.into();
        let info = NodeTypeInfo {
            type_id: type_id.clone(),
            display_name: display_name.into(),
            description: description.into(),
        };
        self.entries.insert(
            type_id,
            CatalogEntry {
                info,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.entries.contains_key(type_id)
    }

    /// New node of `type_id` with default parameters.
    pub fn create(&self, type_id: &str) -> Result<Box<dyn GraphNode>> {
        self.entries
            .get(type_id)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| EngineError::UnknownNodeType(type_id.to_string()))
    }

    /// Registered types, sorted by id.
    pub fn types(&self) -> impl Iterator<Item = &NodeTypeInfo> {
        self.entries.values().map(|entry| &entry.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_factories_match_type_ids() {
        let catalog = NodeCatalog::with_builtin_nodes();
        assert_eq!(catalog.types().count(), 4);
        for info in catalog.types() {
            let node = catalog.create(&info.type_id).unwrap();
            assert_eq!(node.node_type(), info.type_id);
        }
    }

    #[test]
    fn test_unknown_type() {
        let catalog = NodeCatalog::with_builtin_nodes();
        assert!(matches!(
            catalog.create("core:nope"),
            Err(EngineError::UnknownNodeType(id)) if id == "core:nope"
        ));
    }
}
