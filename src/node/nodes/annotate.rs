//! AnnotateNode: sets one annotation on every incoming row.

use super::{
    iteration_descriptor, iteration_value, parse_iteration, text_parameter, unknown_parameter,
    ITERATION_PARAMETER,
};
use crate::data::annotation::{AnnotationMergeMode, AnnotationSet};
use crate::data::slot::SlotInfo;
use crate::data::types::DataTypeId;
use crate::error::Result;
use crate::iteration::{IterationSettings, IterationStrategy};
use crate::node::contract::{GraphNode, StepContext};
use crate::node::parameters::{ParameterDescriptor, ParameterHolder, ParameterKind};
use crate::validation::{ValidationReport, ValidityContext};
use serde_json::json;
use std::collections::BTreeMap;

pub const TYPE_ID: &str = "core:annotate";
const INPUT: &str = "input";
const OUTPUT: &str = "output";

#[derive(Debug, Clone)]
pub struct AnnotateNode {
    key: String,
    value: String,
    data_type: DataTypeId,
    iteration: IterationSettings,
}

impl Default for AnnotateNode {
    fn default() -> Self {
        Self::new("label", "")
    }
}

impl AnnotateNode {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            data_type: DataTypeId::any(),
            iteration: IterationSettings::default(),
        }
    }

    pub fn with_data_type(mut self, data_type: impl Into<DataTypeId>) -> Self {
        self.data_type = data_type.into();
        self
    }
}

impl ParameterHolder for AnnotateNode {
    fn list_parameters(&self) -> BTreeMap<String, ParameterDescriptor> {
        [
            ParameterDescriptor::new("key", "Key", ParameterKind::Text, json!("label")),
            ParameterDescriptor::new("value", "Value", ParameterKind::Text, json!("")),
            ParameterDescriptor::new("data_type", "Data type", ParameterKind::Text, json!("any"))
                .with_description("Type accepted on input and declared on output"),
            iteration_descriptor(&IterationSettings::default()),
        ]
        .into_iter()
        .map(|descriptor| (descriptor.key.clone(), descriptor))
        .collect()
    }

    fn get_parameter(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "key" => Some(json!(self.key)),
            "value" => Some(json!(self.value)),
            "data_type" => Some(json!(self.data_type.as_str())),
            ITERATION_PARAMETER => iteration_value(&self.iteration),
            _ => None,
        }
    }

    fn set_parameter(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        match key {
            "key" => self.key = text_parameter(key, value)?,
            "value" => self.value = text_parameter(key, value)?,
            "data_type" => self.data_type = DataTypeId::new(text_parameter(key, value)?),
            ITERATION_PARAMETER => self.iteration = parse_iteration(value)?,
            _ => return Err(unknown_parameter(key)),
        }
        Ok(())
    }
}

impl GraphNode for AnnotateNode {
    fn node_type(&self) -> &str {
        TYPE_ID
    }

    fn input_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new(INPUT, self.data_type.clone())]
    }

    fn output_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new(OUTPUT, self.data_type.clone())]
    }

    fn iteration_strategy(&self) -> IterationStrategy {
        IterationStrategy::SingleRow(self.iteration.clone())
    }

    fn supports_parallelization(&self) -> bool {
        true
    }

    fn report_validity(&self, ctx: &ValidityContext<'_>, report: &mut ValidationReport) {
        if self.key.trim().is_empty() {
            report.error(ctx, None, "annotation key is empty");
        }
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<()> {
        let item = ctx.single_input(INPUT)?.item.clone();
        let mut extra = AnnotationSet::new();
        extra.set(self.key.clone(), self.value.clone());
        ctx.add_output_annotated(OUTPUT, item, &extra, AnnotationMergeMode::OverwriteExisting)?;
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn GraphNode> {
        Box::new(self.clone())
    }
}
