//! Iteration steps and the plan produced for one node invocation round.

use crate::data::annotation::{AnnotationConflict, AnnotationSet};
use crate::data::table::DataRow;

/// Input rows for one invocation of a node.
#[derive(Debug, Clone)]
pub struct IterationStep {
    /// Position in the full generated sequence (before any limit).
    pub index: usize,
    /// Rows per input slot, in slot declaration order.
    pub inputs: Vec<Vec<DataRow>>,
    /// Merged annotations of all contributing rows.
    pub annotations: AnnotationSet,
}

impl IterationStep {
    pub fn empty(index: usize, slot_count: usize) -> Self {
        Self {
            index,
            inputs: vec![Vec::new(); slot_count],
            annotations: AnnotationSet::new(),
        }
    }

    pub fn rows(&self, slot_index: usize) -> &[DataRow] {
        self.inputs
            .get(slot_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn row_count(&self) -> usize {
        self.inputs.iter().map(Vec::len).sum()
    }
}

/// A reference row (or group) dropped because a required slot had no match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// Slot that had no matching row.
    pub slot: String,
    /// Original index of the reference row, or `None` for a whole group.
    pub reference_row: Option<usize>,
    pub reason: String,
}

/// Output of the iteration-step builder.
#[derive(Debug, Clone, Default)]
pub struct StepPlan {
    /// Steps to execute, in deterministic order.
    pub steps: Vec<IterationStep>,
    pub skipped: Vec<SkippedRow>,
    pub conflicts: Vec<AnnotationConflict>,
    /// Steps generated before the limit was applied.
    pub generated: usize,
}

impl StepPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
