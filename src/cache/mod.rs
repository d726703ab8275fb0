//! Result cache keyed by node, parameters and input content.
//!
//! ```text
//! CacheKey = (NodeId, ParameterSnapshot, Fingerprint(inputs))
//!
//! ResultCache
//!   └─ NodeId ─► { (ParameterSnapshot, Fingerprint) ─► CachedOutput }
//! ```
//!
//! Editing a parameter changes the node's snapshot, so older entries stop
//! matching without being evicted. `clear` drops every entry of one node.

pub mod fingerprint;

pub use fingerprint::{Fingerprint, FingerprintBuilder};

use crate::data::table::DataTable;
use crate::graph::NodeId;
use crate::node::parameters::ParameterSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub node: NodeId,
    pub parameters: ParameterSnapshot,
    pub inputs: Fingerprint,
}

impl CacheKey {
    pub fn new(node: NodeId, parameters: ParameterSnapshot, inputs: Fingerprint) -> Self {
        Self {
            node,
            parameters,
            inputs,
        }
    }

    /// Fingerprint the resolved input tables, slot by slot in declaration order.
    pub fn input_fingerprint<'a, I>(inputs: I) -> Fingerprint
    where
        I: IntoIterator<Item = (&'a str, &'a DataTable)>,
    {
        let mut builder = FingerprintBuilder::new();
        for (slot, table) in inputs {
            builder.push("slot", slot);
            builder.push_fingerprint("table", &table.fingerprint());
        }
        builder.finish()
    }
}

/// Stored output tables of one node execution.
#[derive(Debug, Clone)]
pub struct CachedOutput {
    /// (output slot name, table) in slot declaration order.
    pub slots: Vec<(String, DataTable)>,
    pub created_at: DateTime<Utc>,
}

impl CachedOutput {
    pub fn new(slots: Vec<(String, DataTable)>) -> Self {
        Self {
            slots,
            created_at: Utc::now(),
        }
    }

    pub fn table(&self, slot: &str) -> Option<&DataTable> {
        self.slots
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, table)| table)
    }

    pub fn row_count(&self) -> usize {
        self.slots.iter().map(|(_, table)| table.len()).sum()
    }
}

/// One exported cache entry, as written into persisted graph documents.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub parameters: ParameterSnapshot,
    pub inputs: Fingerprint,
    pub output: Arc<CachedOutput>,
}

type NodeEntries = HashMap<(ParameterSnapshot, Fingerprint), Arc<CachedOutput>>;

/// Shared, read-mostly store of node outputs.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<NodeId, NodeEntries>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CachedOutput>> {
        let entries = self.entries.read();
        let hit = entries
            .get(&key.node)
            .and_then(|node| node.get(&(key.parameters.clone(), key.inputs.clone())))
            .cloned();
        match &hit {
            Some(_) => tracing::trace!("Cache hit for {:?} ({})", key.node, key.inputs.short()),
            None => tracing::trace!("Cache miss for {:?} ({})", key.node, key.inputs.short()),
        }
        hit
    }

    /// Insert or replace the entry for `key`.
    pub fn store(&self, key: CacheKey, output: CachedOutput) -> Arc<CachedOutput> {
        let output = Arc::new(output);
        self.entries
            .write()
            .entry(key.node)
            .or_default()
            .insert((key.parameters, key.inputs), output.clone());
        output
    }

    /// Remove every entry of `node`. Returns how many were removed.
    pub fn clear(&self, node: NodeId) -> usize {
        let removed = self
            .entries
            .write()
            .remove(&node)
            .map(|entries| entries.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::debug!("Cleared {} cache entries for {:?}", removed, node);
        }
        removed
    }

    pub fn clear_all(&self) {
        self.entries.write().clear();
    }

    /// Entries of one node, sorted by input fingerprint for stable export.
    pub fn entries_for(&self, node: NodeId) -> Vec<CacheEntry> {
        let entries = self.entries.read();
        let mut exported: Vec<CacheEntry> = entries
            .get(&node)
            .map(|node_entries| {
                node_entries
                    .iter()
                    .map(|((parameters, inputs), output)| CacheEntry {
                        parameters: parameters.clone(),
                        inputs: inputs.clone(),
                        output: output.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        exported.sort_by(|a, b| {
            (&a.parameters, &a.inputs).cmp(&(&b.parameters, &b.inputs))
        });
        exported
    }

    /// Insert previously exported entries for `node`.
    pub fn import(&self, node: NodeId, imported: impl IntoIterator<Item = CacheEntry>) {
        let mut entries = self.entries.write();
        let node_entries = entries.entry(node).or_default();
        for entry in imported {
            node_entries.insert((entry.parameters, entry.inputs), entry.output);
        }
    }

    pub fn cached_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.entries.read().keys().copied().collect();
        nodes.sort();
        nodes
    }

    /// Total number of entries across all nodes.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::annotation::AnnotationSet;
    use crate::data::item::JsonData;
    use crate::node::nodes::AnnotateNode;
    use crate::node::parameters::ParameterHolder;
    use serde_json::json;

    fn table(values: &[&str]) -> DataTable {
        let mut table = DataTable::new();
        for value in values {
            table.add_row(JsonData::text(*value).into_item(), AnnotationSet::new());
        }
        table
    }

    fn key_for(node: NodeId, annotate: &AnnotateNode, input: &DataTable) -> CacheKey {
        CacheKey::new(
            node,
            ParameterSnapshot::of(annotate),
            CacheKey::input_fingerprint([("input", input)]),
        )
    }

    #[test]
    fn test_store_then_lookup() {
        let cache = ResultCache::new();
        let node = NodeId::new();
        let annotate = AnnotateNode::new("k", "v");
        let input = table(&["a", "b"]);
        let key = key_for(node, &annotate, &input);

        assert!(cache.lookup(&key).is_none());
        cache.store(key.clone(), CachedOutput::new(vec![("output".into(), input.clone())]));
        let hit = cache.lookup(&key).unwrap();
        assert_eq!(hit.row_count(), 2);
        assert_eq!(hit.table("output").unwrap().len(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_parameter_edit_changes_key() {
        let cache = ResultCache::new();
        let node = NodeId::new();
        let mut annotate = AnnotateNode::new("k", "v");
        let input = table(&["a"]);
        let before = key_for(node, &annotate, &input);
        cache.store(before.clone(), CachedOutput::new(Vec::new()));

        annotate.set_parameter("value", json!("w")).unwrap();
        let after = key_for(node, &annotate, &input);
        assert_ne!(before, after);
        assert!(cache.lookup(&after).is_none());
        assert!(cache.lookup(&before).is_some());
    }

    #[test]
    fn test_input_content_changes_key() {
        let a = CacheKey::input_fingerprint([("input", &table(&["a"]))]);
        let b = CacheKey::input_fingerprint([("input", &table(&["b"]))]);
        let renamed = CacheKey::input_fingerprint([("other", &table(&["a"]))]);
        assert_ne!(a, b);
        assert_ne!(a, renamed);
        assert_eq!(a, CacheKey::input_fingerprint([("input", &table(&["a"]))]));
    }

    #[test]
    fn test_clear_only_touches_one_node() {
        let cache = ResultCache::new();
        let first = NodeId::new();
        let second = NodeId::new();
        let annotate = AnnotateNode::new("k", "v");
        let input = table(&["a"]);
        cache.store(key_for(first, &annotate, &input), CachedOutput::new(Vec::new()));
        cache.store(key_for(second, &annotate, &input), CachedOutput::new(Vec::new()));

        assert_eq!(cache.clear(first), 1);
        assert_eq!(cache.clear(first), 0);
        assert_eq!(cache.cached_nodes(), vec![second]);
    }

    #[test]
    fn test_export_import() {
        let cache = ResultCache::new();
        let node = NodeId::new();
        let annotate = AnnotateNode::new("k", "v");
        let input = table(&["a"]);
        let key = key_for(node, &annotate, &input);
        cache.store(key.clone(), CachedOutput::new(vec![("output".into(), input)]));

        let restored = ResultCache::new();
        restored.import(node, cache.entries_for(node));
        assert!(restored.lookup(&key).is_some());
        assert!(restored.entries_for(NodeId::new()).is_empty());
    }
}
