//! Data rows and the append-only tables that hold them.

use crate::cache::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::data::annotation::{AnnotationSet, TextAnnotation};
use crate::data::item::DataItem;
use crate::error::Result;
use std::collections::BTreeSet;

/// One data item plus its annotations.
///
/// `Clone` shares the item and deep-copies the annotation map, so a row that
/// fans out to several consumers can be re-annotated without aliasing.
#[derive(Debug, Clone)]
pub struct DataRow {
    pub item: DataItem,
    pub annotations: AnnotationSet,
    /// Index of the row in the table it was first added to.
    pub original_index: usize,
}

impl DataRow {
    pub fn new(item: DataItem, annotations: Vec<TextAnnotation>) -> Result<Self> {
        Ok(Self {
            item,
            annotations: AnnotationSet::from_annotations(annotations)?,
            original_index: 0,
        })
    }

    pub fn with_annotations(item: DataItem, annotations: AnnotationSet) -> Self {
        Self {
            item,
            annotations,
            original_index: 0,
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key)
    }

    /// Fingerprint of item content plus annotations.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut builder = FingerprintBuilder::new();
        builder.push_fingerprint("item", &self.item.fingerprint());
        self.annotations.feed(&mut builder);
        builder.finish()
    }
}

/// Ordered, append-only sequence of rows.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    rows: Vec<DataRow>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row. Its original index becomes its position in this table.
    pub fn add_row(&mut self, item: DataItem, annotations: AnnotationSet) {
        let original_index = self.rows.len();
        self.rows.push(DataRow {
            item,
            annotations,
            original_index,
        });
    }

    /// Append an existing row, keeping its original index.
    pub fn push_row(&mut self, row: DataRow) {
        self.rows.push(row);
    }

    /// Restartable iterator over the rows in insertion order.
    pub fn rows(&self) -> std::slice::Iter<'_, DataRow> {
        self.rows.iter()
    }

    pub fn row(&self, index: usize) -> Option<&DataRow> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Concatenate another table's rows. No de-duplication happens here.
    pub fn merge_with(&mut self, other: &DataTable) {
        self.rows.extend(other.rows.iter().cloned());
    }

    /// Replace all rows with copies of `other`'s rows.
    pub fn copy_from(&mut self, other: &DataTable) {
        self.rows.clear();
        self.merge_with(other);
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn into_rows(self) -> Vec<DataRow> {
        self.rows
    }

    /// Union of annotation keys across all rows.
    pub fn annotation_keys(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.annotations.keys().map(str::to_string))
            .collect()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut builder = FingerprintBuilder::new();
        builder.push("rows", &self.rows.len().to_string());
        for row in &self.rows {
            builder.push_fingerprint("row", &row.fingerprint());
        }
        builder.finish()
    }
}

impl FromIterator<DataRow> for DataTable {
    fn from_iter<I: IntoIterator<Item = DataRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DataTable {
    type Item = &'a DataRow;
    type IntoIter = std::slice::Iter<'a, DataRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
