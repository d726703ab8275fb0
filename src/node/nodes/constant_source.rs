//! ConstantSourceNode: emits a fixed list of rows.

use super::{text_parameter, unknown_parameter};
use crate::data::annotation::{AnnotationMergeMode, AnnotationSet};
use crate::data::item::JsonData;
use crate::data::slot::SlotInfo;
use crate::data::types::DataTypeId;
use crate::error::{EngineError, Result};
use crate::iteration::{IterationSettings, IterationStrategy};
use crate::node::contract::{GraphNode, StepContext};
use crate::node::parameters::{ParameterDescriptor, ParameterHolder, ParameterKind};
use crate::validation::{ValidationReport, ValidityContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

pub const TYPE_ID: &str = "core:constant-source";
const OUTPUT: &str = "output";

/// One configured row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantRow {
    pub value: serde_json::Value,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ConstantSourceNode {
    data_type: DataTypeId,
    rows: Vec<ConstantRow>,
}

impl Default for ConstantSourceNode {
    fn default() -> Self {
        Self {
            data_type: DataTypeId::new("text"),
            rows: Vec::new(),
        }
    }
}

impl ConstantSourceNode {
    pub fn new(data_type: impl Into<DataTypeId>, values: Vec<serde_json::Value>) -> Self {
        Self {
            data_type: data_type.into(),
            rows: values
                .into_iter()
                .map(|value| ConstantRow {
                    value,
                    annotations: BTreeMap::new(),
                })
                .collect(),
        }
    }

    pub fn texts(values: &[&str]) -> Self {
        Self::new("text", values.iter().map(|v| json!(v)).collect())
    }

    /// Builder: append an annotated row.
    pub fn with_row(mut self, value: serde_json::Value, annotations: &[(&str, &str)]) -> Self {
        self.rows.push(ConstantRow {
            value,
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }

    pub fn rows(&self) -> &[ConstantRow] {
        &self.rows
    }
}

impl ParameterHolder for ConstantSourceNode {
    fn list_parameters(&self) -> BTreeMap<String, ParameterDescriptor> {
        [
            ParameterDescriptor::new("data_type", "Data type", ParameterKind::Text, json!("text"))
                .with_description("Type tag of every emitted item"),
            ParameterDescriptor::new("rows", "Rows", ParameterKind::Json, json!([]))
                .with_description("List of {value, annotations} objects"),
        ]
        .into_iter()
        .map(|descriptor| (descriptor.key.clone(), descriptor))
        .collect()
    }

    fn get_parameter(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "data_type" => Some(json!(self.data_type.as_str())),
            "rows" => serde_json::to_value(&self.rows).ok(),
            _ => None,
        }
    }

    fn set_parameter(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        match key {
            "data_type" => self.data_type = DataTypeId::new(text_parameter(key, value)?),
            "rows" => {
                self.rows = serde_json::from_value(value)
                    .map_err(|e| EngineError::parameter(key, e.to_string()))?
            }
            _ => return Err(unknown_parameter(key)),
        }
        Ok(())
    }
}

impl GraphNode for ConstantSourceNode {
    fn node_type(&self) -> &str {
        TYPE_ID
    }

    fn input_slots(&self) -> Vec<SlotInfo> {
        Vec::new()
    }

    fn output_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new(OUTPUT, self.data_type.clone())]
    }

    fn iteration_strategy(&self) -> IterationStrategy {
        IterationStrategy::SingleRow(IterationSettings::default())
    }

    fn report_validity(&self, ctx: &ValidityContext<'_>, report: &mut ValidationReport) {
        if self.data_type.as_str().is_empty() {
            report.error(ctx, Some(OUTPUT), "data type is empty");
        }
        if self.rows.is_empty() {
            report.warning(ctx, Some(OUTPUT), "no rows configured");
        }
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<()> {
        for row in &self.rows {
            let annotations: AnnotationSet = row
                .annotations
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            ctx.add_output_annotated(
                OUTPUT,
                JsonData::new(self.data_type.clone(), row.value.clone()).into_item(),
                &annotations,
                AnnotationMergeMode::Merge,
            )?;
        }
        Ok(())
    }

    fn duplicate(&self) -> Box<dyn GraphNode> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_parameter_round_trip() {
        let mut node = ConstantSourceNode::texts(&["a"]).with_row(json!("b"), &[("x", "1")]);
        let rows = node.get_parameter("rows").unwrap();
        assert_eq!(rows[1]["annotations"]["x"], "1");

        node.set_parameter("rows", json!([{"value": 3}])).unwrap();
        assert_eq!(node.rows().len(), 1);
        assert!(node.rows()[0].annotations.is_empty());
        assert!(node.set_parameter("rows", json!("nope")).is_err());
        assert!(node.set_parameter("other", json!(1)).is_err());
    }

    #[test]
    fn test_output_slot_follows_data_type() {
        let mut node = ConstantSourceNode::texts(&[]);
        node.set_parameter("data_type", json!("number")).unwrap();
        assert_eq!(node.output_slots()[0].data_type, DataTypeId::new("number"));
        assert!(node.input_slots().is_empty());
    }
}
