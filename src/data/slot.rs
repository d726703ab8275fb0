//! Slot declarations and typed slot tables.

use crate::data::annotation::AnnotationSet;
use crate::data::item::DataItem;
use crate::data::table::{DataRow, DataTable};
use crate::data::types::{DataTypeId, DataTypeRegistry};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a slot is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotDirection {
    Input,
    Output,
}

impl SlotDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotDirection::Input => "input",
            SlotDirection::Output => "output",
        }
    }
}

impl fmt::Display for SlotDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a slot: name, accepted type, optionality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub name: String,
    pub data_type: DataTypeId,
    #[serde(default)]
    pub optional: bool,
}

impl SlotInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<DataTypeId>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A slot's declaration plus its row table.
///
/// Insertion is checked against the declared type; rows never change once added.
#[derive(Debug, Clone)]
pub struct DataSlot {
    info: SlotInfo,
    direction: SlotDirection,
    table: DataTable,
}

impl DataSlot {
    pub fn new(info: SlotInfo, direction: SlotDirection) -> Self {
        Self {
            info,
            direction,
            table: DataTable::new(),
        }
    }

    pub fn info(&self) -> &SlotInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn direction(&self) -> SlotDirection {
        self.direction
    }

    pub fn table(&self) -> &DataTable {
        &self.table
    }

    pub fn into_table(self) -> DataTable {
        self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Append an item; fails if its type is not assignable to the slot type.
    pub fn add_row(
        &mut self,
        registry: &DataTypeRegistry,
        item: DataItem,
        annotations: AnnotationSet,
    ) -> Result<()> {
        self.check_type(registry, &item)?;
        self.table.add_row(item, annotations);
        Ok(())
    }

    /// Append an existing row (keeping its original index) after a type check.
    pub fn push_row(&mut self, registry: &DataTypeRegistry, row: DataRow) -> Result<()> {
        self.check_type(registry, &row.item)?;
        self.table.push_row(row);
        Ok(())
    }

    fn check_type(&self, registry: &DataTypeRegistry, item: &DataItem) -> Result<()> {
        let found = item.data_type();
        if registry.is_assignable(&found, &self.info.data_type) {
            Ok(())
        } else {
            Err(EngineError::TypeMismatch {
                expected: self.info.data_type.to_string(),
                found: found.to_string(),
                context: format!("{} slot '{}'", self.direction, self.info.name),
            })
        }
    }
}
