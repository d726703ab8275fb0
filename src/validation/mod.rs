//! Pre-run validation.
//!
//! The [`Validator`] walks the nodes a run would execute and collects a
//! [`ValidationReport`] without running anything. Any `Error` entry blocks the
//! run from leaving the `Queued` state.
//!
//! Execution failures are reported in the same shape, so callers render
//! pre-run and runtime problems identically.

use crate::error::panic_message;
use crate::graph::{Graph, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// One finding: (node, slot, severity, message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub node: Option<NodeId>,
    pub node_name: String,
    pub slot: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.severity)?;
        if self.node.is_some() {
            write!(f, "{}", self.node_name)?;
            if let Some(slot) = &self.slot {
                write!(f, "/{}", slot)?;
            }
            write!(f, ": ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Identifies the node a validity check is reporting for.
#[derive(Debug, Clone, Copy)]
pub struct ValidityContext<'a> {
    pub node: NodeId,
    pub node_name: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    entries: Vec<ReportEntry>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn report(
        &mut self,
        ctx: &ValidityContext<'_>,
        severity: Severity,
        slot: Option<&str>,
        message: impl Into<String>,
    ) {
        self.entries.push(ReportEntry {
            node: Some(ctx.node),
            node_name: ctx.node_name.to_string(),
            slot: slot.map(str::to_string),
            severity,
            message: message.into(),
            details: None,
        });
    }

    pub fn error(&mut self, ctx: &ValidityContext<'_>, slot: Option<&str>, message: impl Into<String>) {
        self.report(ctx, Severity::Error, slot, message);
    }

    pub fn warning(
        &mut self,
        ctx: &ValidityContext<'_>,
        slot: Option<&str>,
        message: impl Into<String>,
    ) {
        self.report(ctx, Severity::Warning, slot, message);
    }

    /// A finding not tied to a node (e.g. a structural graph problem).
    pub fn graph_error(&mut self, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            node: None,
            node_name: String::new(),
            slot: None,
            severity: Severity::Error,
            message: message.into(),
            details: None,
        });
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.severity == Severity::Warning)
            .count()
    }

    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.entries.extend(other.entries);
    }

    /// True if any entry names this node.
    pub fn mentions(&self, node: NodeId) -> bool {
        self.entries.iter().any(|entry| entry.node == Some(node))
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "no issues");
        }
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// Static checks over a set of nodes in a graph.
pub struct Validator;

impl Validator {
    /// Validate the whole graph.
    pub fn validate_graph(graph: &Graph) -> ValidationReport {
        let all: BTreeSet<NodeId> = graph.node_ids().collect();
        Self::validate(graph, &all)
    }

    /// Validate the given nodes.
    ///
    /// Checks for each node: required inputs are connected, a pass-through node
    /// has an input and output slot to copy between, and the node's own
    /// `report_validity`. The graph must also be acyclic. A panicking
    /// `report_validity` is recorded as an error on that node.
    pub fn validate(graph: &Graph, nodes: &BTreeSet<NodeId>) -> ValidationReport {
        let mut report = ValidationReport::new();

        if let Err(err) = graph.topological_order() {
            report.graph_error(err.to_string());
        }

        for entry in graph.nodes().filter(|entry| nodes.contains(&entry.id())) {
            let ctx = ValidityContext {
                node: entry.id(),
                node_name: entry.name(),
            };

            for slot in entry.input_slots() {
                if slot.optional {
                    continue;
                }
                let connected = graph
                    .incoming_edges(entry.id())
                    .any(|edge| edge.target.slot == slot.name);
                if !connected {
                    report.error(&ctx, Some(&slot.name), "required input is not connected");
                }
            }

            if entry.is_pass_through()
                && (entry.input_slots().is_empty() || entry.output_slots().is_empty())
            {
                report.error(
                    &ctx,
                    None,
                    "pass-through needs at least one input and one output slot",
                );
            }

            let mut own = ValidationReport::new();
            let checked = panic::catch_unwind(AssertUnwindSafe(|| {
                entry.node().report_validity(&ctx, &mut own)
            }));
            match checked {
                Ok(()) => report.merge(own),
                Err(payload) => report.error(
                    &ctx,
                    None,
                    format!("validity check panicked: {}", panic_message(payload.as_ref())),
                ),
            }
        }

        report
    }
}
