//! JoinTextNode: concatenates matched `left` and `right` text rows.

use super::{
    item_text, iteration_descriptor, iteration_value, parse_iteration, text_parameter,
    unknown_parameter, ITERATION_PARAMETER,
};
use crate::data::item::JsonData;
use crate::data::slot::SlotInfo;
use crate::error::Result;
use crate::iteration::{IterationSettings, IterationStrategy};
use crate::node::contract::{GraphNode, StepContext};
use crate::node::parameters::{ParameterDescriptor, ParameterHolder, ParameterKind};
use serde_json::json;
use std::collections::BTreeMap;

pub const TYPE_ID: &str = "core:join-text";

#[derive(Debug, Clone)]
pub struct JoinTextNode {
    separator: String,
    iteration: IterationSettings,
}

impl Default for JoinTextNode {
    fn default() -> Self {
        Self::new(" ")
    }
}

impl JoinTextNode {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            iteration: IterationSettings::default(),
        }
    }

    pub fn with_iteration(mut self, iteration: IterationSettings) -> Self {
        self.iteration = iteration;
        self
    }
}

impl ParameterHolder for JoinTextNode {
    fn list_parameters(&self) -> BTreeMap<String, ParameterDescriptor> {
        [
            ParameterDescriptor::new("separator", "Separator", ParameterKind::Text, json!(" ")),
            iteration_descriptor(&IterationSettings::default()),
        ]
        .into_iter()
        .map(|descriptor| (descriptor.key.clone(), descriptor))
        .collect()
    }

    fn get_parameter(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "separator" => Some(json!(self.separator)),
            ITERATION_PARAMETER => iteration_value(&self.iteration),
            _ => None,
        }
    }

    fn set_parameter(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        match key {
            "separator" => self.separator = text_parameter(key, value)?,
            ITERATION_PARAMETER => self.iteration = parse_iteration(value)?,
            _ => return Err(unknown_parameter(key)),
        }
        Ok(())
    }
}

impl GraphNode for JoinTextNode {
    fn node_type(&self) -> &str {
        TYPE_ID
    }

    fn input_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new("left", "text"), SlotInfo::new("right", "text")]
    }

    fn output_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new("output", "text")]
    }

    fn iteration_strategy(&self) -> IterationStrategy {
        IterationStrategy::SingleRow(self.iteration.clone())
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<()> {
        let left = item_text(&ctx.single_input("left")?.item);
        let right = item_text(&ctx.single_input("right")?.item);
        let joined = format!("{}{}{}", left, self.separator, right);
        ctx.add_output("output", JsonData::text(joined).into_item())?;
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn GraphNode> {
        Box::new(self.clone())
    }
}
