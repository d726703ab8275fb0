//! The editable node graph.
//!
//! Nodes are kept in creation order, which is also the tie-breaker for
//! [`Graph::topological_order`]. Edges are kept in insertion order; fan-in
//! concatenates rows in that order.
//!
//! Node implementations are shared behind `Arc`. [`Graph::snapshot`] clones the
//! graph cheaply for a run, and [`Graph::set_parameter`] copies a node before
//! editing it if a snapshot still holds it, so in-flight runs never observe an
//! edit.

use crate::data::slot::SlotInfo;
use crate::data::types::{Compatibility, DataTypeRegistry};
use crate::error::{EngineError, Result};
use crate::graph::edge::{Edge, SlotRef};
use crate::graph::id::NodeId;
use crate::node::{GraphNode, ParameterHolder};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// A node plus its graph-level state.
#[derive(Clone)]
pub struct NodeEntry {
    id: NodeId,
    name: String,
    enabled: bool,
    pass_through: bool,
    node: Arc<dyn GraphNode>,
    inputs: Vec<SlotInfo>,
    outputs: Vec<SlotInfo>,
}

impl NodeEntry {
    fn new(id: NodeId, name: String, node: Arc<dyn GraphNode>) -> Self {
        let inputs = node.input_slots();
        let outputs = node.output_slots();
        Self {
            id,
            name,
            enabled: true,
            pass_through: false,
            node,
            inputs,
            outputs,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_pass_through(&self) -> bool {
        self.pass_through
    }

    pub fn node(&self) -> &dyn GraphNode {
        self.node.as_ref()
    }

    pub fn shared_node(&self) -> Arc<dyn GraphNode> {
        self.node.clone()
    }

    pub fn node_type(&self) -> &str {
        self.node.node_type()
    }

    pub fn input_slots(&self) -> &[SlotInfo] {
        &self.inputs
    }

    pub fn output_slots(&self) -> &[SlotInfo] {
        &self.outputs
    }

    pub fn input_slot(&self, name: &str) -> Option<&SlotInfo> {
        self.inputs.iter().find(|slot| slot.name == name)
    }

    pub fn output_slot(&self, name: &str) -> Option<&SlotInfo> {
        self.outputs.iter().find(|slot| slot.name == name)
    }

    fn refresh_slots(&mut self) {
        self.inputs = self.node.input_slots();
        self.outputs = self.node.output_slots();
    }

    /// Copy with an independent node instance.
    fn duplicated(&self, id: NodeId) -> Self {
        Self {
            id,
            name: self.name.clone(),
            enabled: self.enabled,
            pass_through: self.pass_through,
            node: Arc::from(self.node.duplicate()),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

impl fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.node.node_type())
            .field("enabled", &self.enabled)
            .field("pass_through", &self.pass_through)
            .finish()
    }
}

/// Result of [`Graph::extract`].
#[derive(Debug, Clone)]
pub struct ExtractedGraph {
    /// Induced sub-graph; nodes keep their ids.
    pub graph: Graph,
    /// Edges with exactly one endpoint in the selection (only if requested).
    pub boundary_edges: Vec<Edge>,
}

#[derive(Clone)]
pub struct Graph {
    registry: Arc<DataTypeRegistry>,
    nodes: Vec<NodeEntry>,
    edges: Vec<Edge>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(Arc::new(DataTypeRegistry::with_builtin_types()))
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .finish()
    }
}

impl Graph {
    pub fn new(registry: Arc<DataTypeRegistry>) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<DataTypeRegistry> {
        &self.registry
    }

    // ==================== Nodes ====================

    /// Add a node named after its type.
    pub fn add_node(&mut self, node: Box<dyn GraphNode>) -> NodeId {
        let name = node.node_type().to_string();
        self.add_named_node(node, name)
    }

    pub fn add_named_node(&mut self, node: Box<dyn GraphNode>, name: impl Into<String>) -> NodeId {
        let id = NodeId::new();
        self.nodes
            .push(NodeEntry::new(id, name.into(), Arc::from(node)));
        tracing::trace!("Added node {:?}", id);
        id
    }

    /// Add a node under a known id (deserialization, extraction).
    pub fn insert_node(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        node: Box<dyn GraphNode>,
    ) -> Result<()> {
        if self.contains(id) {
            return Err(EngineError::DuplicateNode(id));
        }
        self.nodes.push(NodeEntry::new(id, name.into(), Arc::from(node)));
        Ok(())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.position(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeEntry> {
        self.position(id).map(|index| &self.nodes[index])
    }

    pub fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.node(id).ok_or(EngineError::NodeNotFound(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        let index = self.position(id).ok_or(EngineError::NodeNotFound(id))?;
        Ok(&mut self.nodes[index])
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|entry| entry.id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        self.entry_mut(id)?.name = name.into();
        Ok(())
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<()> {
        self.entry_mut(id)?.enabled = enabled;
        Ok(())
    }

    pub fn set_pass_through(&mut self, id: NodeId, pass_through: bool) -> Result<()> {
        self.entry_mut(id)?.pass_through = pass_through;
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Arc<dyn GraphNode>> {
        let index = self.position(id).ok_or(EngineError::NodeNotFound(id))?;
        let entry = self.nodes.remove(index);
        let before = self.edges.len();
        self.edges.retain(|edge| !edge.touches(id));
        tracing::debug!(
            "Removed node '{}' and {} edge(s)",
            entry.name,
            before - self.edges.len()
        );
        Ok(entry.node)
    }

    /// Apply a parameter edit, then drop edges the new slot layout no longer supports.
    ///
    /// Returns the removed edges.
    pub fn set_parameter(
        &mut self,
        id: NodeId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Vec<Edge>> {
        let entry = self.entry_mut(id)?;
        let descriptor = entry
            .node
            .list_parameters()
            .remove(key)
            .ok_or_else(|| EngineError::parameter(key, "unknown parameter"))?;
        descriptor.check(&value)?;

        match Arc::get_mut(&mut entry.node) {
            Some(node) => node.set_parameter(key, value)?,
            None => {
                // Still shared with a run snapshot.
                let mut fresh = entry.node.duplicate();
                fresh.set_parameter(key, value)?;
                entry.node = Arc::from(fresh);
            }
        }
        entry.refresh_slots();

        let removed = self.repair_edges(id);
        for edge in &removed {
            tracing::warn!("Parameter '{}' change removed edge {}", key, edge);
        }
        Ok(removed)
    }

    fn repair_edges(&mut self, id: NodeId) -> Vec<Edge> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.edges.len());
        for edge in std::mem::take(&mut self.edges) {
            if edge.touches(id) && !self.edge_is_supported(&edge) {
                removed.push(edge);
            } else {
                kept.push(edge);
            }
        }
        self.edges = kept;
        removed
    }

    fn edge_is_supported(&self, edge: &Edge) -> bool {
        let source = self
            .node(edge.source.node)
            .and_then(|entry| entry.output_slot(&edge.source.slot));
        let target = self
            .node(edge.target.node)
            .and_then(|entry| entry.input_slot(&edge.target.slot));
        match (source, target) {
            (Some(source), Some(target)) => self
                .registry
                .compatibility(&source.data_type, &target.data_type)
                .is_compatible(),
            _ => false,
        }
    }

    fn position(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|entry| entry.id == id)
    }

    // ==================== Edges ====================

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn incoming_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.target.node == id)
    }

    pub fn outgoing_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |edge| edge.source.node == id)
    }

    /// Connect an output slot to an input slot.
    ///
    /// Nothing is modified unless the edge is accepted.
    pub fn connect(&mut self, source: SlotRef, target: SlotRef) -> Result<Compatibility> {
        let (source_type, target_type) = self.resolve_edge_slots(&source, &target)?;

        if source.node == target.node || self.is_reachable(target.node, source.node) {
            return Err(EngineError::CycleDetected {
                source_node: source.node,
                target_node: target.node,
            });
        }

        let compatibility = self.registry.compatibility(&source_type, &target_type);
        if !compatibility.is_compatible() {
            return Err(EngineError::TypeIncompatible {
                source_type: source_type.to_string(),
                target_type: target_type.to_string(),
            });
        }

        let edge = Edge::new(source, target);
        if self.edges.contains(&edge) {
            return Err(EngineError::DuplicateEdge(edge.to_string()));
        }
        tracing::trace!("Connected {} ({:?})", edge, compatibility);
        self.edges.push(edge);
        Ok(compatibility)
    }

    /// Shorthand for [`Graph::connect`].
    pub fn connect_slots(
        &mut self,
        source: NodeId,
        source_slot: &str,
        target: NodeId,
        target_slot: &str,
    ) -> Result<Compatibility> {
        self.connect(
            SlotRef::new(source, source_slot),
            SlotRef::new(target, target_slot),
        )
    }

    /// Add an edge without the cycle check. The caller re-validates with
    /// [`Graph::topological_order`].
    pub(crate) fn insert_edge_unchecked(&mut self, edge: Edge) -> Result<()> {
        self.resolve_edge_slots(&edge.source, &edge.target)?;
        if self.edges.contains(&edge) {
            return Err(EngineError::DuplicateEdge(edge.to_string()));
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn disconnect(&mut self, edge: &Edge) -> bool {
        let before = self.edges.len();
        self.edges.retain(|existing| existing != edge);
        before != self.edges.len()
    }

    fn resolve_edge_slots(
        &self,
        source: &SlotRef,
        target: &SlotRef,
    ) -> Result<(crate::data::DataTypeId, crate::data::DataTypeId)> {
        let source_type = self
            .entry(source.node)?
            .output_slot(&source.slot)
            .ok_or_else(|| EngineError::SlotNotFound {
                node: source.node,
                slot: source.slot.clone(),
                direction: "output",
            })?
            .data_type
            .clone();
        let target_type = self
            .entry(target.node)?
            .input_slot(&target.slot)
            .ok_or_else(|| EngineError::SlotNotFound {
                node: target.node,
                slot: target.slot.clone(),
                direction: "input",
            })?
            .data_type
            .clone();
        Ok((source_type, target_type))
    }

    // ==================== Structure queries ====================

    /// Deterministic topological order (Kahn's algorithm, ties by creation order).
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let index: HashMap<NodeId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.id, i))
            .collect();
        let n = self.nodes.len();
        let mut adj = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) =
                (index.get(&edge.source.node), index.get(&edge.target.node))
            {
                adj[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            order.push(self.nodes[next].id);
            for &neighbor in &adj[next] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    ready.insert(neighbor);
                }
            }
        }

        if order.len() != n {
            return Err(EngineError::CyclicGraph(n - order.len()));
        }
        Ok(order)
    }

    /// True if a directed path leads from `from` to `to`. A node reaches itself.
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        from == to || self.closure(from, Direction::Downstream).contains(&to)
    }

    /// Every node with a path into `id`.
    pub fn upstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.closure(id, Direction::Upstream)
    }

    /// Every node reachable from `id`.
    pub fn downstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.closure(id, Direction::Downstream)
    }

    fn closure(&self, start: NodeId, direction: Direction) -> BTreeSet<NodeId> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for edge in &self.edges {
                let (from, to) = match direction {
                    Direction::Downstream => (edge.source.node, edge.target.node),
                    Direction::Upstream => (edge.target.node, edge.source.node),
                };
                if from == node && to != start && visited.insert(to) {
                    stack.push(to);
                }
            }
        }
        visited
    }

    /// Disabled nodes plus everything that depends on them.
    pub fn deactivated_nodes(&self) -> BTreeSet<NodeId> {
        let mut deactivated = BTreeSet::new();
        for entry in self.nodes.iter().filter(|entry| !entry.enabled) {
            deactivated.insert(entry.id);
            deactivated.extend(self.downstream(entry.id));
        }
        deactivated
    }

    /// Input slots without any incoming edge.
    pub fn unconnected_input_slots(&self) -> Vec<SlotRef> {
        let mut unconnected = Vec::new();
        for entry in &self.nodes {
            for slot in &entry.inputs {
                let connected = self
                    .incoming_edges(entry.id)
                    .any(|edge| edge.target.slot == slot.name);
                if !connected {
                    unconnected.push(SlotRef::new(entry.id, slot.name.clone()));
                }
            }
        }
        unconnected
    }

    /// Output slots that could feed `target`, best compatibility first.
    pub fn candidate_sources(&self, target: &SlotRef) -> Result<Vec<(SlotRef, Compatibility)>> {
        let target_entry = self.entry(target.node)?;
        let target_type = &target_entry
            .input_slot(&target.slot)
            .ok_or_else(|| EngineError::SlotNotFound {
                node: target.node,
                slot: target.slot.clone(),
                direction: "input",
            })?
            .data_type;

        let mut candidates = Vec::new();
        for entry in &self.nodes {
            if entry.id == target.node || self.is_reachable(target.node, entry.id) {
                continue;
            }
            for slot in &entry.outputs {
                let compatibility = self.registry.compatibility(&slot.data_type, target_type);
                let candidate = SlotRef::new(entry.id, slot.name.clone());
                if compatibility.is_compatible()
                    && !self.edges.contains(&Edge::new(candidate.clone(), target.clone()))
                {
                    candidates.push((candidate, compatibility));
                }
            }
        }
        // Stable: creation order within a tier.
        candidates.sort_by_key(|(_, compatibility)| *compatibility);
        Ok(candidates)
    }

    /// Input slots `source` could feed, best compatibility first.
    pub fn candidate_targets(&self, source: &SlotRef) -> Result<Vec<(SlotRef, Compatibility)>> {
        let source_entry = self.entry(source.node)?;
        let source_type = &source_entry
            .output_slot(&source.slot)
            .ok_or_else(|| EngineError::SlotNotFound {
                node: source.node,
                slot: source.slot.clone(),
                direction: "output",
            })?
            .data_type;

        let mut candidates = Vec::new();
        for entry in &self.nodes {
            if entry.id == source.node || self.is_reachable(entry.id, source.node) {
                continue;
            }
            for slot in &entry.inputs {
                let compatibility = self.registry.compatibility(source_type, &slot.data_type);
                let candidate = SlotRef::new(entry.id, slot.name.clone());
                if compatibility.is_compatible()
                    && !self.edges.contains(&Edge::new(source.clone(), candidate.clone()))
                {
                    candidates.push((candidate, compatibility));
                }
            }
        }
        candidates.sort_by_key(|(_, compatibility)| *compatibility);
        Ok(candidates)
    }

    // ==================== Copies ====================

    /// Induced sub-graph over `selection`. Nodes are duplicated and keep their ids.
    pub fn extract(
        &self,
        selection: &BTreeSet<NodeId>,
        include_boundary_edges: bool,
    ) -> Result<ExtractedGraph> {
        if let Some(missing) = selection.iter().find(|id| !self.contains(**id)) {
            return Err(EngineError::NodeNotFound(*missing));
        }

        let mut graph = Graph::new(self.registry.clone());
        graph.nodes = self
            .nodes
            .iter()
            .filter(|entry| selection.contains(&entry.id))
            .map(|entry| entry.duplicated(entry.id))
            .collect();

        let mut boundary_edges = Vec::new();
        for edge in &self.edges {
            let source_in = selection.contains(&edge.source.node);
            let target_in = selection.contains(&edge.target.node);
            if source_in && target_in {
                graph.edges.push(edge.clone());
            } else if (source_in || target_in) && include_boundary_edges {
                boundary_edges.push(edge.clone());
            }
        }

        Ok(ExtractedGraph {
            graph,
            boundary_edges,
        })
    }

    /// Insert copies of `other`'s nodes and edges under fresh ids.
    ///
    /// Returns the mapping from `other`'s ids to the new ids.
    pub fn merge_with(&mut self, other: &Graph) -> HashMap<NodeId, NodeId> {
        let mut mapping = HashMap::with_capacity(other.nodes.len());
        for entry in &other.nodes {
            let id = NodeId::new();
            mapping.insert(entry.id, id);
            self.nodes.push(entry.duplicated(id));
        }
        for edge in &other.edges {
            if let (Some(&source), Some(&target)) =
                (mapping.get(&edge.source.node), mapping.get(&edge.target.node))
            {
                self.edges.push(Edge::new(
                    SlotRef::new(source, edge.source.slot.clone()),
                    SlotRef::new(target, edge.target.slot.clone()),
                ));
            }
        }
        mapping
    }

    /// Immutable copy for a run.
    pub fn snapshot(&self) -> Arc<Graph> {
        Arc::new(self.clone())
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Upstream,
    Downstream,
}
