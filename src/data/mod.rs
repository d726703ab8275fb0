//! Data model: items, annotations, rows, tables and slots.
//!
//! ```text
//! DataSlot ── SlotInfo (name, type, optional)
//!    └── DataTable ── DataRow* ── DataItem (Arc<dyn Data>)
//!                            └── AnnotationSet (key -> value)
//! ```

pub mod annotation;
pub mod item;
pub mod slot;
pub mod table;
pub mod types;

pub use annotation::{AnnotationConflict, AnnotationMergeMode, AnnotationSet, TextAnnotation};
pub use item::{Data, DataItem, JsonData};
pub use slot::{DataSlot, SlotDirection, SlotInfo};
pub use table::{DataRow, DataTable};
pub use types::{Compatibility, Converter, DataTypeId, DataTypeInfo, DataTypeRegistry, Decoder};
