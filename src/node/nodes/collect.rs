//! CollectNode: merges each group of rows into a single list item.

use super::{
    item_json, iteration_descriptor, iteration_value, parse_iteration, unknown_parameter,
    ITERATION_PARAMETER,
};
use crate::data::item::JsonData;
use crate::data::slot::SlotInfo;
use crate::data::types::DataTypeId;
use crate::error::Result;
use crate::iteration::{IterationSettings, IterationStrategy};
use crate::node::contract::{GraphNode, StepContext};
use crate::node::parameters::{ParameterDescriptor, ParameterHolder};
use std::collections::BTreeMap;

pub const TYPE_ID: &str = "core:collect";

#[derive(Debug, Clone, Default)]
pub struct CollectNode {
    iteration: IterationSettings,
}

impl CollectNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group by the given annotation keys.
    pub fn grouped_by<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            iteration: IterationSettings::with_keys(keys),
        }
    }
}

impl ParameterHolder for CollectNode {
    fn list_parameters(&self) -> BTreeMap<String, ParameterDescriptor> {
        let descriptor = iteration_descriptor(&IterationSettings::default());
        BTreeMap::from([(descriptor.key.clone(), descriptor)])
    }

    fn get_parameter(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            ITERATION_PARAMETER => iteration_value(&self.iteration),
            _ => None,
        }
    }

    fn set_parameter(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        match key {
            ITERATION_PARAMETER => self.iteration = parse_iteration(value)?,
            _ => return Err(unknown_parameter(key)),
        }
        Ok(())
    }
}

impl GraphNode for CollectNode {
    fn node_type(&self) -> &str {
        TYPE_ID
    }

    fn input_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new("input", DataTypeId::any())]
    }

    fn output_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new("output", "list")]
    }

    fn iteration_strategy(&self) -> IterationStrategy {
        IterationStrategy::Grouped(self.iteration.clone())
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<()> {
        let values = ctx
            .input("input")
            .iter()
            .map(|row| item_json(&row.item))
            .collect();
        ctx.add_output("output", JsonData::list(values).into_item())?;
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn GraphNode> {
        Box::new(self.clone())
    }
}
