//! Edges between node slots.

use crate::graph::id::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A slot addressed by owning node and slot name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRef {
    pub node: NodeId,
    pub slot: String,
}

impl SlotRef {
    pub fn new(node: NodeId, slot: impl Into<String>) -> Self {
        Self {
            node,
            slot: slot.into(),
        }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node.short(), self.slot)
    }
}

/// Output slot -> input slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: SlotRef,
    pub target: SlotRef,
}

impl Edge {
    pub fn new(source: SlotRef, target: SlotRef) -> Self {
        Self { source, target }
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.source.node == node || self.target.node == node
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}
