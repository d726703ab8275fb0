//! Text annotations: string key/value metadata attached to data rows.
//!
//! Annotations are the join key of the iteration-step builder and part of the
//! cache fingerprint, so an [`AnnotationSet`] keeps its keys sorted and unique.

use crate::cache::fingerprint::FingerprintBuilder;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single `key = value` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub key: String,
    pub value: String,
}

impl TextAnnotation {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// How same-key annotations are resolved when rows are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnnotationMergeMode {
    /// Keep the first-seen value and record the conflict.
    #[default]
    Merge,
    /// Later values replace earlier ones.
    OverwriteExisting,
    /// Incoming annotations are dropped entirely.
    Discard,
}

/// Two different values were offered for the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationConflict {
    pub key: String,
    pub kept: String,
    pub rejected: String,
}

/// Unique-key annotation map. Cloning always deep-copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationSet {
    entries: BTreeMap<String, String>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a list, rejecting duplicate keys.
    pub fn from_annotations(annotations: impl IntoIterator<Item = TextAnnotation>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for annotation in annotations {
            if entries.contains_key(&annotation.key) {
                return Err(EngineError::DuplicateAnnotationKey(annotation.key));
            }
            entries.insert(annotation.key, annotation.value);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_vec(&self) -> Vec<TextAnnotation> {
        self.iter().map(|(k, v)| TextAnnotation::new(k, v)).collect()
    }

    /// Insert or replace a single annotation.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Merge one annotation, returning a conflict if `Merge` kept an older value.
    pub fn merge_one(
        &mut self,
        annotation: &TextAnnotation,
        mode: AnnotationMergeMode,
    ) -> Option<AnnotationConflict> {
        match mode {
            AnnotationMergeMode::Discard => None,
            AnnotationMergeMode::OverwriteExisting => {
                self.entries
                    .insert(annotation.key.clone(), annotation.value.clone());
                None
            }
            AnnotationMergeMode::Merge => match self.entries.get(&annotation.key) {
                Some(existing) if existing != &annotation.value => Some(AnnotationConflict {
                    key: annotation.key.clone(),
                    kept: existing.clone(),
                    rejected: annotation.value.clone(),
                }),
                Some(_) => None,
                None => {
                    self.entries
                        .insert(annotation.key.clone(), annotation.value.clone());
                    None
                }
            },
        }
    }

    /// Merge another set into this one, collecting conflicts.
    pub fn merge_from(
        &mut self,
        other: &AnnotationSet,
        mode: AnnotationMergeMode,
    ) -> Vec<AnnotationConflict> {
        let mut conflicts = Vec::new();
        for (key, value) in other.iter() {
            if let Some(conflict) = self.merge_one(&TextAnnotation::new(key, value), mode) {
                conflicts.push(conflict);
            }
        }
        conflicts
    }

    pub(crate) fn feed(&self, builder: &mut FingerprintBuilder) {
        builder.push("annotations", &self.entries.len().to_string());
        for (key, value) in &self.entries {
            builder.push(key, value);
        }
    }
}

impl FromIterator<(String, String)> for AnnotationSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> AnnotationSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let result = AnnotationSet::from_annotations(vec![
            TextAnnotation::new("x", "1"),
            TextAnnotation::new("x", "2"),
        ]);
        assert!(matches!(result, Err(EngineError::DuplicateAnnotationKey(k)) if k == "x"));
    }

    #[test]
    fn test_merge_keeps_first_and_flags_conflict() {
        let mut merged = set(&[("x", "1")]);
        let conflicts = merged.merge_from(&set(&[("x", "2"), ("y", "3")]), AnnotationMergeMode::Merge);
        assert_eq!(merged.get("x"), Some("1"));
        assert_eq!(merged.get("y"), Some("3"));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].rejected, "2");
    }

    #[test]
    fn test_same_value_is_not_a_conflict() {
        let mut merged = set(&[("x", "1")]);
        let conflicts = merged.merge_from(&set(&[("x", "1")]), AnnotationMergeMode::Merge);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_overwrite_existing() {
        let mut merged = set(&[("x", "1")]);
        let conflicts =
            merged.merge_from(&set(&[("x", "2")]), AnnotationMergeMode::OverwriteExisting);
        assert!(conflicts.is_empty());
        assert_eq!(merged.get("x"), Some("2"));
    }

    #[test]
    fn test_discard() {
        let mut merged = set(&[("x", "1")]);
        merged.merge_from(&set(&[("x", "2"), ("y", "3")]), AnnotationMergeMode::Discard);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("x"), Some("1"));
    }

    #[test]
    fn test_clone_is_deep() {
        let original = set(&[("x", "1")]);
        let mut copy = original.clone();
        copy.set("x", "changed");
        assert_eq!(original.get("x"), Some("1"));
    }
}
