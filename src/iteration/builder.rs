//! Iteration-step builder.
//!
//! Decides which input rows are combined for each invocation of a node.
//!
//! # Single-row mode
//!
//! Every row of the reference slot is matched against every other slot on the
//! resolved key set. A row missing a key matches any value for that key.
//! Exactly one match per slot yields one step; zero matches on a required slot
//! skips the reference row (or fails, with `skip_incomplete = false`); more than
//! one match is resolved by the [`MultipleMatchPolicy`].
//!
//! # Grouped mode
//!
//! Rows of all slots are partitioned by their values for the resolved keys.
//! Groups are ordered by first appearance (slot declaration order, then row
//! order). As in single-row mode, a missing key is a wildcard: a row joins
//! every group that agrees on the keys it does carry, so rows carrying none
//! of the keys join every group. A partial key set only forms a group of its
//! own when no row with more of the keys refines it.
//!
//! # Ordering
//!
//! Steps are ordered by reference-row original index, then by slot declaration
//! order. Merged annotations are built in slot declaration order, so the result
//! is deterministic and safe to feed into the cache key.

use crate::data::annotation::{AnnotationConflict, AnnotationSet};
use crate::data::slot::SlotInfo;
use crate::data::table::{DataRow, DataTable};
use crate::error::{EngineError, Result};
use crate::iteration::settings::{IterationSettings, IterationStrategy, MultipleMatchPolicy};
use crate::iteration::step::{IterationStep, SkippedRow, StepPlan};
use std::collections::{BTreeSet, HashSet};

/// Builds the [`StepPlan`] for one node from its populated input tables.
pub struct IterationStepBuilder<'a> {
    slots: &'a [SlotInfo],
    tables: &'a [DataTable],
}

enum Preflight {
    /// Inputs are usable; build steps normally.
    Build,
    /// Nothing to build, return this plan as-is.
    Done(StepPlan),
}

impl<'a> IterationStepBuilder<'a> {
    /// `tables[i]` holds the rows of `slots[i]`. Missing tables count as empty.
    pub fn new(slots: &'a [SlotInfo], tables: &'a [DataTable]) -> Self {
        Self { slots, tables }
    }

    pub fn build(&self, strategy: &IterationStrategy) -> Result<StepPlan> {
        let mut plan = match strategy {
            IterationStrategy::Custom => self.build_custom(),
            IterationStrategy::SingleRow(settings) => match self.preflight()? {
                Preflight::Done(plan) => return Ok(plan),
                Preflight::Build => self.build_single_row(settings)?,
            },
            IterationStrategy::Grouped(settings) => match self.preflight()? {
                Preflight::Done(plan) => return Ok(plan),
                Preflight::Build => self.build_grouped(settings)?,
            },
        };

        plan.generated = plan.steps.len();
        if let Some(limit) = strategy.settings().and_then(|s| s.limit) {
            plan.steps.retain(|step| limit.contains(step.index));
        }
        Ok(plan)
    }

    fn table(&self, index: usize) -> &[DataRow] {
        match self.tables.get(index) {
            Some(table) => table.rows().as_slice(),
            None => &[],
        }
    }

    /// Edge cases that do not depend on the strategy.
    fn preflight(&self) -> Result<Preflight> {
        let single = |steps: usize| {
            Preflight::Done(StepPlan {
                steps: (0..steps)
                    .map(|i| IterationStep::empty(i, self.slots.len()))
                    .collect(),
                generated: steps,
                ..StepPlan::default()
            })
        };

        if self.slots.is_empty() {
            return Ok(single(1));
        }

        let all_empty = (0..self.slots.len()).all(|i| self.table(i).is_empty());
        if all_empty {
            let all_optional = self.slots.iter().all(|slot| slot.optional);
            return Ok(single(if all_optional { 1 } else { 0 }));
        }

        let empty_required = self
            .slots
            .iter()
            .enumerate()
            .find(|(i, slot)| !slot.optional && self.table(*i).is_empty());
        if let Some((_, empty)) = empty_required {
            let populated_required = self
                .slots
                .iter()
                .enumerate()
                .find(|(i, slot)| !slot.optional && !self.table(*i).is_empty());
            return match populated_required {
                Some((i, other)) => Err(EngineError::IncompleteMatch {
                    slot: empty.name.clone(),
                    detail: format!(
                        "slot is empty while '{}' has {} row(s)",
                        other.name,
                        self.table(i).len()
                    ),
                }),
                None => Ok(single(0)),
            };
        }

        Ok(Preflight::Build)
    }

    fn slot_keys(&self) -> Vec<BTreeSet<String>> {
        (0..self.slots.len())
            .map(|i| {
                self.table(i)
                    .iter()
                    .flat_map(|row| row.annotations.keys().map(str::to_string))
                    .collect()
            })
            .collect()
    }

    fn reference_slot(&self, settings: &IterationSettings) -> Result<usize> {
        if let Some(name) = &settings.reference_slot {
            return self
                .slots
                .iter()
                .position(|slot| &slot.name == name)
                .ok_or_else(|| {
                    EngineError::parameter(
                        "iteration.reference_slot",
                        format!("no input slot named '{}'", name),
                    )
                });
        }
        let first_required = self.slots.iter().position(|slot| !slot.optional);
        let first_populated = (0..self.slots.len()).find(|&i| !self.table(i).is_empty());
        Ok(first_required.or(first_populated).unwrap_or(0))
    }

    fn build_custom(&self) -> StepPlan {
        let step = IterationStep {
            index: 0,
            inputs: (0..self.slots.len())
                .map(|i| self.table(i).to_vec())
                .collect(),
            annotations: AnnotationSet::new(),
        };
        StepPlan {
            steps: vec![step],
            ..StepPlan::default()
        }
    }

    fn build_single_row(&self, settings: &IterationSettings) -> Result<StepPlan> {
        let reference = self.reference_slot(settings)?;
        let keys = settings.column_matching.resolve(&self.slot_keys(), false);
        let mut plan = StepPlan::default();

        let mut reference_rows: Vec<&DataRow> = self.table(reference).iter().collect();
        reference_rows.sort_by_key(|row| row.original_index);

        'rows: for reference_row in reference_rows {
            let mut choices: Vec<Vec<&DataRow>> = Vec::with_capacity(self.slots.len());
            for (slot_index, slot) in self.slots.iter().enumerate() {
                if slot_index == reference {
                    choices.push(vec![reference_row]);
                    continue;
                }
                let matches: Vec<&DataRow> = self
                    .table(slot_index)
                    .iter()
                    .filter(|row| annotations_match(reference_row, row, &keys))
                    .collect();

                match matches.len() {
                    0 if slot.optional => choices.push(Vec::new()),
                    0 if settings.skip_incomplete => {
                        plan.skipped.push(SkippedRow {
                            slot: slot.name.clone(),
                            reference_row: Some(reference_row.original_index),
                            reason: format!("no row matches on {}", describe_keys(&keys)),
                        });
                        continue 'rows;
                    }
                    0 => {
                        return Err(EngineError::IncompleteMatch {
                            slot: slot.name.clone(),
                            detail: format!(
                                "reference row {} has no match on {}",
                                reference_row.original_index,
                                describe_keys(&keys)
                            ),
                        })
                    }
                    1 => choices.push(matches),
                    n => match settings.multiple_matches {
                        MultipleMatchPolicy::Fail => {
                            return Err(EngineError::AmbiguousDataMatch {
                                slot: slot.name.clone(),
                                reference_row: reference_row.original_index,
                                candidates: n,
                            })
                        }
                        MultipleMatchPolicy::FirstMatch => choices.push(vec![matches[0]]),
                        MultipleMatchPolicy::DuplicateReference => choices.push(matches),
                    },
                }
            }

            for combination in cartesian(&choices) {
                let index = plan.steps.len();
                let inputs: Vec<Vec<DataRow>> = combination
                    .iter()
                    .map(|row| row.map(|r| vec![r.clone()]).unwrap_or_default())
                    .collect();
                let (annotations, conflicts) = merge_annotations(&inputs, settings);
                plan.conflicts.extend(conflicts);
                plan.steps.push(IterationStep {
                    index,
                    inputs,
                    annotations,
                });
            }
        }

        Ok(plan)
    }

    fn build_grouped(&self, settings: &IterationSettings) -> Result<StepPlan> {
        let keys: Vec<String> = settings
            .column_matching
            .resolve(&self.slot_keys(), true)
            .into_iter()
            .collect();
        let mut plan = StepPlan::default();

        // Group keys in order of first appearance.
        let mut candidates: Vec<Vec<Option<&str>>> = Vec::new();
        let mut seen: HashSet<Vec<Option<&str>>> = HashSet::new();
        for slot_index in 0..self.slots.len() {
            for row in self.table(slot_index) {
                let group_key = row_group_key(row, &keys);
                if is_wildcard(&group_key) || !seen.insert(group_key.clone()) {
                    continue;
                }
                candidates.push(group_key);
            }
        }
        let mut groups: Vec<Vec<Option<&str>>> = candidates
            .iter()
            .filter(|general| !candidates.iter().any(|other| refines(other, general)))
            .cloned()
            .collect();
        if groups.is_empty() {
            // No keys, or no row carries any of them: one group with everything.
            groups.push(vec![None; keys.len()]);
        }

        'groups: for group_key in &groups {
            let mut inputs: Vec<Vec<DataRow>> = Vec::with_capacity(self.slots.len());
            for slot_index in 0..self.slots.len() {
                let rows: Vec<DataRow> = self
                    .table(slot_index)
                    .iter()
                    .filter(|row| keys_agree(&row_group_key(row, &keys), group_key))
                    .cloned()
                    .collect();
                inputs.push(rows);
            }

            for (slot_index, slot) in self.slots.iter().enumerate() {
                if slot.optional || !inputs[slot_index].is_empty() {
                    continue;
                }
                let description = describe_group(&keys, group_key);
                if settings.skip_incomplete {
                    plan.skipped.push(SkippedRow {
                        slot: slot.name.clone(),
                        reference_row: None,
                        reason: format!("group {} has no rows", description),
                    });
                    continue 'groups;
                }
                return Err(EngineError::IncompleteMatch {
                    slot: slot.name.clone(),
                    detail: format!("group {} has no rows", description),
                });
            }

            let (annotations, conflicts) = merge_annotations(&inputs, settings);
            plan.conflicts.extend(conflicts);
            plan.steps.push(IterationStep {
                index: plan.steps.len(),
                inputs,
                annotations,
            });
        }

        Ok(plan)
    }
}

/// Rows match when every key present on both sides carries the same value.
fn annotations_match(reference: &DataRow, candidate: &DataRow, keys: &BTreeSet<String>) -> bool {
    keys.iter().all(|key| {
        match (reference.annotation(key), candidate.annotation(key)) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    })
}

fn row_group_key<'r>(row: &'r DataRow, keys: &[String]) -> Vec<Option<&'r str>> {
    keys.iter().map(|key| row.annotation(key)).collect()
}

fn is_wildcard(key: &[Option<&str>]) -> bool {
    key.iter().all(Option::is_none)
}

/// Every key present on both sides carries the same value.
fn keys_agree(a: &[Option<&str>], b: &[Option<&str>]) -> bool {
    a.iter().zip(b).all(|pair| match pair {
        (Some(x), Some(y)) => x == y,
        _ => true,
    })
}

/// `specific` carries every key of `general` with the same value, and more.
fn refines(specific: &[Option<&str>], general: &[Option<&str>]) -> bool {
    specific != general
        && general
            .iter()
            .zip(specific)
            .all(|(g, s)| g.is_none() || g == s)
}

fn merge_annotations(
    inputs: &[Vec<DataRow>],
    settings: &IterationSettings,
) -> (AnnotationSet, Vec<AnnotationConflict>) {
    let mut merged = AnnotationSet::new();
    let mut conflicts = Vec::new();
    for row in inputs.iter().flatten() {
        conflicts.extend(merged.merge_from(&row.annotations, settings.merge_mode));
    }
    (merged, conflicts)
}

/// All combinations picking one entry per slot. Empty choice lists contribute `None`.
fn cartesian<'r>(choices: &[Vec<&'r DataRow>]) -> Vec<Vec<Option<&'r DataRow>>> {
    let mut combinations: Vec<Vec<Option<&DataRow>>> = vec![Vec::with_capacity(choices.len())];
    for options in choices {
        if options.is_empty() {
            for combination in &mut combinations {
                combination.push(None);
            }
            continue;
        }
        let mut next = Vec::with_capacity(combinations.len() * options.len());
        for combination in &combinations {
            for row in options {
                let mut extended = combination.clone();
                extended.push(Some(*row));
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations
}

fn describe_keys(keys: &BTreeSet<String>) -> String {
    if keys.is_empty() {
        "any annotation".to_string()
    } else {
        let list: Vec<&str> = keys.iter().map(String::as_str).collect();
        format!("[{}]", list.join(", "))
    }
}

fn describe_group(keys: &[String], values: &[Option<&str>]) -> String {
    let parts: Vec<String> = keys
        .iter()
        .zip(values)
        .map(|(key, value)| format!("{}={}", key, value.unwrap_or("*")))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::item::{Data, JsonData};
    use crate::iteration::settings::{ColumnMatching, StepLimit};

    fn table(rows: &[(&str, &[(&str, &str)])]) -> DataTable {
        let mut table = DataTable::new();
        for (value, annotations) in rows {
            let set = annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            table.add_row(JsonData::text(*value).into_item(), set);
        }
        table
    }

    fn names(step: &IterationStep, slot: usize) -> Vec<String> {
        step.rows(slot).iter().map(|row| row.item.display()).collect()
    }

    fn slots(specs: &[(&str, bool)]) -> Vec<SlotInfo> {
        specs
            .iter()
            .map(|(name, optional)| {
                let info = SlotInfo::new(*name, "text");
                if *optional {
                    info.optional()
                } else {
                    info
                }
            })
            .collect()
    }

    #[test]
    fn test_single_row_unused_rows_are_not_errors() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("r1", &[("x", "1")])]),
            table(&[("r2", &[("x", "1")]), ("r3", &[("x", "2")])]),
        ];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(IterationSettings::with_keys(["x"])))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(names(&plan.steps[0], 0), vec!["r1"]);
        assert_eq!(names(&plan.steps[0], 1), vec!["r2"]);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_grouped_partitions_by_key() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("a1", &[("t", "0")]), ("a2", &[("t", "1")])]),
            table(&[
                ("b1", &[("t", "0")]),
                ("b2", &[("t", "0")]),
                ("b3", &[("t", "1")]),
            ]),
        ];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::Grouped(IterationSettings::with_keys(["t"])))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(names(&plan.steps[0], 0), vec!["a1"]);
        assert_eq!(names(&plan.steps[0], 1), vec!["b1", "b2"]);
        assert_eq!(names(&plan.steps[1], 0), vec!["a2"]);
        assert_eq!(names(&plan.steps[1], 1), vec!["b3"]);
        assert_eq!(plan.steps[1].annotations.get("t"), Some("1"));
    }

    #[test]
    fn test_grouped_without_keys_is_one_group() {
        let slots = slots(&[("a", false)]);
        let tables = vec![table(&[("a1", &[("t", "0")]), ("a2", &[("t", "1")])])];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::Grouped(IterationSettings::default()))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].rows(0).len(), 2);
        // t=0 kept, t=1 flagged
        assert_eq!(plan.steps[0].annotations.get("t"), Some("0"));
        assert_eq!(plan.conflicts.len(), 1);
    }

    #[test]
    fn test_grouped_wildcard_rows_join_every_group() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("a1", &[("t", "0")]), ("a2", &[("t", "1")])]),
            table(&[("shared", &[])]),
        ];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::Grouped(IterationSettings::with_keys(["t"])))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(names(&plan.steps[0], 1), vec!["shared"]);
        assert_eq!(names(&plan.steps[1], 1), vec!["shared"]);
    }

    #[test]
    fn test_grouped_partial_rows_join_agreeing_groups() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[
                ("p1w1", &[("plate", "1"), ("well", "A1")]),
                ("p1w2", &[("plate", "1"), ("well", "A2")]),
                ("p2w1", &[("plate", "2"), ("well", "A1")]),
            ]),
            table(&[("plate1", &[("plate", "1")]), ("plate2", &[("plate", "2")])]),
        ];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::Grouped(IterationSettings::with_keys([
                "plate", "well",
            ])))
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(names(&plan.steps[0], 0), vec!["p1w1"]);
        assert_eq!(names(&plan.steps[0], 1), vec!["plate1"]);
        assert_eq!(names(&plan.steps[1], 0), vec!["p1w2"]);
        assert_eq!(names(&plan.steps[1], 1), vec!["plate1"]);
        assert_eq!(names(&plan.steps[2], 0), vec!["p2w1"]);
        assert_eq!(names(&plan.steps[2], 1), vec!["plate2"]);
    }

    #[test]
    fn test_grouped_unrefined_partial_key_forms_its_own_group() {
        let slots = slots(&[("a", false)]);
        let tables = vec![table(&[
            ("p1w1", &[("plate", "1"), ("well", "A1")]),
            ("p3", &[("plate", "3")]),
        ])];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::Grouped(IterationSettings::with_keys([
                "plate", "well",
            ])))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(names(&plan.steps[0], 0), vec!["p1w1"]);
        assert_eq!(names(&plan.steps[1], 0), vec!["p3"]);
    }

    #[test]
    fn test_ambiguous_match_fails_by_default() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("r1", &[("x", "1")])]),
            table(&[("r2", &[("x", "1")]), ("r3", &[("x", "1")])]),
        ];
        let err = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(IterationSettings::with_keys(["x"])))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::AmbiguousDataMatch { candidates: 2, .. }
        ));
    }

    #[test]
    fn test_duplicate_reference_policy() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("r1", &[("x", "1")])]),
            table(&[("r2", &[("x", "1")]), ("r3", &[("x", "1")])]),
        ];
        let settings = IterationSettings::with_keys(["x"])
            .with_policy(MultipleMatchPolicy::DuplicateReference);
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(settings))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(names(&plan.steps[0], 0), vec!["r1"]);
        assert_eq!(names(&plan.steps[0], 1), vec!["r2"]);
        assert_eq!(names(&plan.steps[1], 0), vec!["r1"]);
        assert_eq!(names(&plan.steps[1], 1), vec!["r3"]);
    }

    #[test]
    fn test_first_match_policy() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("r1", &[("x", "1")])]),
            table(&[("r2", &[("x", "1")]), ("r3", &[("x", "1")])]),
        ];
        let settings =
            IterationSettings::with_keys(["x"]).with_policy(MultipleMatchPolicy::FirstMatch);
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(settings))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(names(&plan.steps[0], 1), vec!["r2"]);
    }

    #[test]
    fn test_missing_match_is_skipped_or_fatal() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("r1", &[("x", "1")]), ("r2", &[("x", "2")])]),
            table(&[("b1", &[("x", "1")])]),
        ];
        let builder = IterationStepBuilder::new(&slots, &tables);
        let plan = builder
            .build(&IterationStrategy::SingleRow(IterationSettings::with_keys(["x"])))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].slot, "b");
        assert_eq!(plan.skipped[0].reference_row, Some(1));

        let err = builder
            .build(&IterationStrategy::SingleRow(
                IterationSettings::with_keys(["x"]).strict(),
            ))
            .unwrap_err();
        assert!(matches!(err, EngineError::IncompleteMatch { .. }));
    }

    #[test]
    fn test_optional_slot_without_match_proceeds_empty() {
        let slots = slots(&[("a", false), ("b", true)]);
        let tables = vec![
            table(&[("r1", &[("x", "1")])]),
            table(&[("b1", &[("x", "2")])]),
        ];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(IterationSettings::with_keys(["x"])))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.steps[0].rows(1).is_empty());
    }

    #[test]
    fn test_missing_key_is_wildcard() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("r1", &[("x", "1")]), ("r2", &[("x", "2")])]),
            table(&[("global", &[])]),
        ];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(IterationSettings::with_keys(["x"])))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(names(&plan.steps[1], 1), vec!["global"]);
    }

    #[test]
    fn test_empty_required_slot_edge_cases() {
        let both_required = slots(&[("a", false), ("b", false)]);
        let empty = vec![DataTable::new(), DataTable::new()];
        let plan = IterationStepBuilder::new(&both_required, &empty)
            .build(&IterationStrategy::SingleRow(IterationSettings::default()))
            .unwrap();
        assert!(plan.is_empty());

        let half = vec![table(&[("r1", &[])]), DataTable::new()];
        let err = IterationStepBuilder::new(&both_required, &half)
            .build(&IterationStrategy::SingleRow(IterationSettings::default()))
            .unwrap_err();
        assert!(matches!(err, EngineError::IncompleteMatch { ref slot, .. } if slot == "b"));

        let optional_only = slots(&[("a", false), ("b", true)]);
        let tables = vec![DataTable::new(), table(&[("b1", &[])])];
        let plan = IterationStepBuilder::new(&optional_only, &tables)
            .build(&IterationStrategy::Grouped(IterationSettings::default()))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_no_inputs_and_all_optional_empty_yield_one_step() {
        let plan = IterationStepBuilder::new(&[], &[])
            .build(&IterationStrategy::SingleRow(IterationSettings::default()))
            .unwrap();
        assert_eq!(plan.len(), 1);

        let optional = slots(&[("a", true)]);
        let plan = IterationStepBuilder::new(&optional, &[DataTable::new()])
            .build(&IterationStrategy::Grouped(IterationSettings::default()))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.steps[0].rows(0).is_empty());
    }

    #[test]
    fn test_overwrite_mode_later_slot_wins() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("r1", &[("x", "1"), ("label", "from-a")])]),
            table(&[("r2", &[("x", "1"), ("label", "from-b")])]),
        ];
        let merge = IterationSettings::with_keys(["x"]);
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(merge.clone()))
            .unwrap();
        assert_eq!(plan.steps[0].annotations.get("label"), Some("from-a"));
        assert_eq!(plan.conflicts.len(), 1);

        let overwrite =
            merge.with_merge_mode(crate::data::annotation::AnnotationMergeMode::OverwriteExisting);
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(overwrite))
            .unwrap();
        assert_eq!(plan.steps[0].annotations.get("label"), Some("from-b"));
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn test_reference_slot_and_limit() {
        let slots = slots(&[("a", false), ("b", false)]);
        let tables = vec![
            table(&[("a1", &[])]),
            table(&[("b1", &[]), ("b2", &[]), ("b3", &[])]),
        ];
        let settings = IterationSettings::default()
            .with_matching(ColumnMatching::MergeAll)
            .with_reference_slot("b")
            .with_limit(StepLimit::new(1, 3).unwrap());
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(settings))
            .unwrap();
        assert_eq!(plan.generated, 3);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[0].index, 1);
        assert_eq!(names(&plan.steps[0], 1), vec!["b2"]);

        let unknown = IterationSettings::default().with_reference_slot("zzz");
        assert!(IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::SingleRow(unknown))
            .is_err());
    }

    #[test]
    fn test_custom_receives_everything_once() {
        let slots = slots(&[("a", false), ("b", true)]);
        let tables = vec![table(&[("a1", &[]), ("a2", &[])]), DataTable::new()];
        let plan = IterationStepBuilder::new(&slots, &tables)
            .build(&IterationStrategy::Custom)
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].rows(0).len(), 2);
        assert!(plan.steps[0].annotations.is_empty());
    }
}
