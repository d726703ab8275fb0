//! Iteration strategy and the per-node settings that drive step building.

use crate::data::annotation::AnnotationMergeMode;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which annotation keys rows are matched or grouped on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "keys", rename_all = "kebab-case")]
pub enum ColumnMatching {
    /// Single-row: keys shared by every input slot. Grouped: one group.
    #[default]
    Auto,
    /// An explicit key list.
    Keys(Vec<String>),
    /// Every key present in any slot.
    Union,
    /// Keys present in every slot that has rows.
    Intersection,
    /// `Union`, restricted to `#`-prefixed keys.
    PrefixHashUnion,
    /// `Intersection`, restricted to `#`-prefixed keys.
    PrefixHashIntersection,
    /// No keys: everything matches.
    MergeAll,
    /// Every key present in any slot; each distinct value combination is its own group.
    SplitAll,
}

/// Prefix marking annotations that identify a data set rather than describe it.
pub const DATA_SET_KEY_PREFIX: char = '#';

impl ColumnMatching {
    /// Resolve the concrete key set from the keys each slot carries.
    ///
    /// `grouped` selects the meaning of `Auto`.
    pub fn resolve(&self, slot_keys: &[BTreeSet<String>], grouped: bool) -> BTreeSet<String> {
        let union = || slot_keys.iter().flatten().cloned().collect::<BTreeSet<_>>();
        let intersection = || {
            let mut populated = slot_keys.iter().filter(|keys| !keys.is_empty());
            match populated.next() {
                Some(first) => populated.fold(first.clone(), |acc, keys| {
                    acc.intersection(keys).cloned().collect()
                }),
                None => BTreeSet::new(),
            }
        };
        let hashed = |keys: BTreeSet<String>| {
            keys.into_iter()
                .filter(|key| key.starts_with(DATA_SET_KEY_PREFIX))
                .collect()
        };

        match self {
            ColumnMatching::Auto if grouped => BTreeSet::new(),
            ColumnMatching::Auto => intersection(),
            ColumnMatching::Keys(keys) => keys.iter().cloned().collect(),
            ColumnMatching::Union | ColumnMatching::SplitAll => union(),
            ColumnMatching::Intersection => intersection(),
            ColumnMatching::PrefixHashUnion => hashed(union()),
            ColumnMatching::PrefixHashIntersection => hashed(intersection()),
            ColumnMatching::MergeAll => BTreeSet::new(),
        }
    }
}

/// What to do when a reference row matches several rows of another slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultipleMatchPolicy {
    /// Fail with `AmbiguousDataMatch`.
    #[default]
    Fail,
    /// Emit one step per matching row, repeating the reference row.
    DuplicateReference,
    /// Use the first match in table order.
    FirstMatch,
}

/// Half-open range `[start, end)` of step indices to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLimit {
    pub start: usize,
    pub end: usize,
}

impl StepLimit {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start > end {
            return Err(EngineError::parameter(
                "iteration.limit",
                format!("start {} is after end {}", start, end),
            ));
        }
        Ok(Self { start, end })
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationSettings {
    pub column_matching: ColumnMatching,
    pub merge_mode: AnnotationMergeMode,
    pub multiple_matches: MultipleMatchPolicy,
    /// Skip (and report) incomplete rows instead of failing.
    pub skip_incomplete: bool,
    /// Slot whose rows drive single-row matching. Defaults to the first required slot.
    pub reference_slot: Option<String>,
    pub limit: Option<StepLimit>,
}

impl Default for IterationSettings {
    fn default() -> Self {
        Self {
            column_matching: ColumnMatching::Auto,
            merge_mode: AnnotationMergeMode::Merge,
            multiple_matches: MultipleMatchPolicy::Fail,
            skip_incomplete: true,
            reference_slot: None,
            limit: None,
        }
    }
}

impl IterationSettings {
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column_matching: ColumnMatching::Keys(keys.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_matching(mut self, matching: ColumnMatching) -> Self {
        self.column_matching = matching;
        self
    }

    pub fn with_policy(mut self, policy: MultipleMatchPolicy) -> Self {
        self.multiple_matches = policy;
        self
    }

    pub fn with_merge_mode(mut self, mode: AnnotationMergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    pub fn with_reference_slot(mut self, slot: impl Into<String>) -> Self {
        self.reference_slot = Some(slot.into());
        self
    }

    pub fn with_limit(mut self, limit: StepLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn strict(mut self) -> Self {
        self.skip_incomplete = false;
        self
    }
}

/// How a node's invocations are derived from its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "settings", rename_all = "kebab-case")]
pub enum IterationStrategy {
    /// One row per slot per step.
    SingleRow(IterationSettings),
    /// Rows grouped by annotation values; any number of rows per slot per step.
    Grouped(IterationSettings),
    /// The node loops itself: one invocation receiving every input row.
    Custom,
}

impl IterationStrategy {
    pub fn settings(&self) -> Option<&IterationSettings> {
        match self {
            IterationStrategy::SingleRow(settings) | IterationStrategy::Grouped(settings) => {
                Some(settings)
            }
            IterationStrategy::Custom => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IterationStrategy::SingleRow(_) => "single-row",
            IterationStrategy::Grouped(_) => "grouped",
            IterationStrategy::Custom => "custom",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_strategies() {
        let slots = vec![keys(&["#ds", "x", "y"]), keys(&["#ds", "x", "z"])];
        assert_eq!(ColumnMatching::Auto.resolve(&slots, false), keys(&["#ds", "x"]));
        assert!(ColumnMatching::Auto.resolve(&slots, true).is_empty());
        assert_eq!(
            ColumnMatching::Union.resolve(&slots, false),
            keys(&["#ds", "x", "y", "z"])
        );
        assert_eq!(ColumnMatching::PrefixHashUnion.resolve(&slots, false), keys(&["#ds"]));
        assert_eq!(
            ColumnMatching::PrefixHashIntersection.resolve(&slots, true),
            keys(&["#ds"])
        );
        assert!(ColumnMatching::MergeAll.resolve(&slots, false).is_empty());
        assert_eq!(
            ColumnMatching::Keys(vec!["q".into()]).resolve(&slots, false),
            keys(&["q"])
        );
    }

    #[test]
    fn test_intersection_ignores_empty_slots() {
        let slots = vec![keys(&["x"]), BTreeSet::new()];
        assert_eq!(ColumnMatching::Intersection.resolve(&slots, false), keys(&["x"]));
    }

    #[test]
    fn test_default_settings() {
        let settings = IterationSettings::default();
        assert!(settings.skip_incomplete);
        assert_eq!(settings.multiple_matches, MultipleMatchPolicy::Fail);
        assert!(!settings.clone().strict().skip_incomplete);
    }

    #[test]
    fn test_settings_json_shape() {
        let settings = IterationSettings::with_keys(["x"]);
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["column_matching"]["mode"], "keys");
        assert_eq!(json["column_matching"]["keys"][0], "x");
        let back: IterationSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, settings);
        let partial: IterationSettings =
            serde_json::from_value(serde_json::json!({"skip_incomplete": false})).unwrap();
        assert!(!partial.skip_incomplete);
    }

    #[test]
    fn test_limit() {
        let limit = StepLimit::new(1, 3).unwrap();
        assert!(!limit.contains(0));
        assert!(limit.contains(2));
        assert!(!limit.contains(3));
        assert!(StepLimit::new(3, 1).is_err());
    }
}
