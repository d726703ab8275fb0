//! The node execution contract.
//!
//! The engine only knows nodes through [`GraphNode`]: slot declarations,
//! parameters, an iteration strategy and `run`. `run` is called once per
//! iteration step with a [`StepContext`] holding that step's input rows and
//! collecting its output rows.

use crate::data::annotation::{AnnotationMergeMode, AnnotationSet};
use crate::data::item::DataItem;
use crate::data::slot::{DataSlot, SlotDirection, SlotInfo};
use crate::data::table::{DataRow, DataTable};
use crate::data::types::DataTypeRegistry;
use crate::error::{EngineError, Result};
use crate::iteration::{IterationStep, IterationStrategy};
use crate::node::parameters::ParameterHolder;
use crate::run::progress::ProgressInfo;
use crate::validation::{ValidationReport, ValidityContext};

/// A processing node.
///
/// Implementations must be `Send + Sync`: a parallelizable node has `run`
/// called from several worker threads at once.
pub trait GraphNode: ParameterHolder + Send + Sync {
    /// Catalog type id, e.g. `core:annotate`.
    fn node_type(&self) -> &str;

    /// Ordered input slot declarations. May change after a parameter edit.
    fn input_slots(&self) -> Vec<SlotInfo>;

    /// Ordered output slot declarations. May change after a parameter edit.
    fn output_slots(&self) -> Vec<SlotInfo>;

    fn iteration_strategy(&self) -> IterationStrategy;

    /// Whether different steps may run concurrently.
    fn supports_parallelization(&self) -> bool {
        false
    }

    /// Whether outputs may be served from and stored in the result cache.
    fn cacheable(&self) -> bool {
        true
    }

    /// Report configuration problems without running.
    fn report_validity(&self, _ctx: &ValidityContext<'_>, _report: &mut ValidationReport) {}

    /// Process one iteration step.
    fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<()>;

    /// Independent copy with the same parameters.
    fn duplicate(&self) -> Box<dyn GraphNode>;
}

/// Inputs and output buffers for one invocation of [`GraphNode::run`].
pub struct StepContext<'a> {
    step: &'a IterationStep,
    inputs: &'a [SlotInfo],
    registry: &'a DataTypeRegistry,
    outputs: Vec<DataSlot>,
    progress: ProgressInfo,
}

impl<'a> StepContext<'a> {
    pub fn new(
        step: &'a IterationStep,
        inputs: &'a [SlotInfo],
        outputs: &[SlotInfo],
        registry: &'a DataTypeRegistry,
        progress: ProgressInfo,
    ) -> Self {
        Self {
            step,
            inputs,
            registry,
            outputs: outputs
                .iter()
                .map(|info| DataSlot::new(info.clone(), SlotDirection::Output))
                .collect(),
            progress,
        }
    }

    pub fn step_index(&self) -> usize {
        self.step.index
    }

    /// Rows of an input slot for this step. Unknown slots yield no rows.
    pub fn input(&self, slot: &str) -> &[DataRow] {
        match self.inputs.iter().position(|info| info.name == slot) {
            Some(index) => self.step.rows(index),
            None => &[],
        }
    }

    /// The single row of `slot`, as single-row iteration provides.
    pub fn single_input(&self, slot: &str) -> Result<&DataRow> {
        let rows = self.input(slot);
        match rows {
            [row] => Ok(row),
            _ => Err(EngineError::IncompleteMatch {
                slot: slot.to_string(),
                detail: format!("expected exactly one row, step has {}", rows.len()),
            }),
        }
    }

    pub fn input_slots(&self) -> &[SlotInfo] {
        self.inputs
    }

    /// Merged annotations of every row in this step.
    pub fn annotations(&self) -> &AnnotationSet {
        &self.step.annotations
    }

    pub fn registry(&self) -> &DataTypeRegistry {
        self.registry
    }

    /// Append an output row carrying the step's merged annotations.
    pub fn add_output(&mut self, slot: &str, item: DataItem) -> Result<()> {
        let annotations = self.step.annotations.clone();
        let registry = self.registry;
        self.output_slot(slot)?.add_row(registry, item, annotations)
    }

    /// Append an output row with extra annotations merged over the step's.
    pub fn add_output_annotated(
        &mut self,
        slot: &str,
        item: DataItem,
        extra: &AnnotationSet,
        mode: AnnotationMergeMode,
    ) -> Result<()> {
        let mut annotations = self.step.annotations.clone();
        annotations.merge_from(extra, mode);
        let registry = self.registry;
        self.output_slot(slot)?.add_row(registry, item, annotations)
    }

    pub fn progress(&self) -> &ProgressInfo {
        &self.progress
    }

    pub fn is_cancelled(&self) -> bool {
        self.progress.is_cancelled()
    }

    /// Output tables in slot declaration order.
    pub fn into_outputs(self) -> Vec<DataTable> {
        self.outputs.into_iter().map(DataSlot::into_table).collect()
    }

    fn output_slot(&mut self, slot: &str) -> Result<&mut DataSlot> {
        self.outputs
            .iter_mut()
            .find(|output| output.name() == slot)
            .ok_or_else(|| EngineError::SlotNotFound {
                node: crate::graph::NodeId::NIL,
                slot: slot.to_string(),
                direction: "output",
            })
    }
}
