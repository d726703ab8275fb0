//! # slotflow: slot-based pipeline graph engine
//!
//! Nodes declare typed input and output slots. Rows carry an opaque data item
//! plus text annotations, and the iteration engine uses those annotations to
//! decide which input rows belong together in one execution step.
//!
//! ## Architecture
//!
//! - **Data**: typed items, annotated rows and slot tables, with a registry of
//!   data types and converters
//! - **Graph**: an always-acyclic DAG of nodes joined by slot-to-slot edges
//! - **Iteration**: turns a node's input tables into execution steps
//! - **Run**: a FIFO scheduler that executes one run at a time, with steps of
//!   parallelizable nodes dispatched to a worker pool
//! - **Cache**: per-node results keyed by parameters and input fingerprints
//! - **Persistence**: JSON graph documents, optionally including cached rows
//!
//! ## Configuration
//!
//! Engine settings are read from `config.toml` in the platform config
//! directory under `slotflow`; see [`config`].
//!
//! ## Example
//!
//! ```ignore
//! use slotflow::{
//!     config::EngineConfig,
//!     graph::Graph,
//!     node::nodes::{AnnotateNode, ConstantSourceNode},
//!     run::{RunSettings, Scheduler},
//! };
//!
//! fn main() -> slotflow::Result<()> {
//!     let mut graph = Graph::default();
//!     let source = graph.add_node(Box::new(ConstantSourceNode::texts(&["a", "b"])));
//!     let tag = graph.add_node(Box::new(AnnotateNode::new("sample", "s1")));
//!     graph.connect_slots(source, "output", tag, "input")?;
//!
//!     let scheduler = Scheduler::new(EngineConfig::default());
//!     let outcome = scheduler.enqueue(&graph, RunSettings::default())?.wait();
//!     println!("{} rows", outcome.output(tag, "output").map_or(0, |t| t.len()));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod graph;
pub mod iteration;
pub mod logging;
pub mod node;
pub mod persistence;
pub mod run;
pub mod validation;

// Re-export commonly used types
pub use cache::ResultCache;
pub use config::EngineConfig;
pub use data::{DataItem, DataRow, DataTable, DataTypeId, DataTypeRegistry, JsonData};
pub use error::{EngineError, Result, ResultExt};
pub use graph::{Edge, Graph, NodeId, SlotRef};
pub use iteration::{IterationSettings, IterationStrategy};
pub use node::{GraphNode, NodeCatalog, StepContext};
pub use persistence::GraphDocument;
pub use run::{RunEvent, RunHandle, RunOutcome, RunSettings, RunState, Scheduler};
pub use validation::{Severity, ValidationReport, Validator};
