//! Node contract, parameters and the built-in node catalog.
//!
//! ```text
//! NodeCatalog ──create(type_id)──► Box<dyn GraphNode>
//!                                      │
//!                   ParameterHolder ◄──┤ list/get/set parameters
//!                                      │
//!               IterationStrategy ◄────┤ how inputs become steps
//!                                      │
//!                  run(StepContext) ◄──┘ once per step
//! ```

pub mod catalog;
pub mod contract;
pub mod nodes;
pub mod parameters;

pub use catalog::{NodeCatalog, NodeTypeInfo};
pub use contract::{GraphNode, StepContext};
pub use parameters::{ParameterDescriptor, ParameterHolder, ParameterKind, ParameterSnapshot};
