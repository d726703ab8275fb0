//! Node graph: identities, edges and the editable graph model.
//!
//! ```text
//! [constant-source] ──output──► input [annotate] ──output──► left  [join-text]
//! [constant-source] ──output───────────────────────────────► right
//! ```
//!
//! The graph is always acyclic: [`Graph::connect`] refuses edges that would
//! close a cycle, and bulk loads are re-checked by [`Graph::topological_order`].

pub mod edge;
pub mod id;
pub mod model;

pub use edge::{Edge, SlotRef};
pub use id::NodeId;
pub use model::{ExtractedGraph, Graph, NodeEntry};
