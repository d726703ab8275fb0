//! Run identities, lifecycle states and outcomes.

use crate::data::table::DataTable;
use crate::error::EngineError;
use crate::graph::NodeId;
use crate::validation::ValidationReport;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Monotonic run number, unique per scheduler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl fmt::Debug for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunId({})", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `Queued -> Running -> {Finished | Failed | Cancelled}`.
///
/// A run failing validation goes straight from `Queued` to `Failed`, and a
/// queued run cancelled before starting goes straight to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Queued,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finished | RunState::Failed | RunState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one node during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// `run` was invoked for its steps.
    Executed,
    /// Outputs came from the result cache.
    Cached,
    /// First input copied to first output.
    PassedThrough,
    /// `run` returned an error or panicked.
    Failed,
    /// Not reached because the run failed or was cancelled first.
    Skipped,
    /// Disabled, or downstream of a disabled node.
    Deactivated,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeStatus::Executed => "executed",
            NodeStatus::Cached => "cached",
            NodeStatus::PassedThrough => "passed-through",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Deactivated => "deactivated",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node: NodeId,
    pub name: String,
    pub status: NodeStatus,
    /// Steps actually executed (0 for cached or skipped nodes).
    pub steps: usize,
    /// Reference rows skipped for lack of a match.
    pub skipped_rows: usize,
}

/// A node error or panic that aborted a run.
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub node: NodeId,
    pub node_name: String,
    pub step: Option<usize>,
    pub message: String,
    pub cause: Arc<anyhow::Error>,
}

impl NodeFailure {
    pub fn new(node: NodeId, node_name: impl Into<String>, step: Option<usize>, cause: anyhow::Error) -> Self {
        Self {
            node,
            node_name: node_name.into(),
            step,
            message: format!("{:#}", cause),
            cause: Arc::new(cause),
        }
    }

    pub fn to_error(&self) -> EngineError {
        EngineError::NodeExecution {
            node: self.node,
            node_name: self.node_name.clone(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "{} failed at step {}: {}", self.node_name, step, self.message),
            None => write!(f, "{} failed: {}", self.node_name, self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps_executed: usize,
    pub cache_hits: usize,
}

impl RunStats {
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// Final result of a run, available once it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: RunId,
    pub label: String,
    pub state: RunState,
    /// Pre-run validation findings plus an error entry for an execution failure.
    pub report: ValidationReport,
    pub failure: Option<NodeFailure>,
    /// In topological order.
    pub nodes: Vec<NodeReport>,
    /// Output tables of every executed, cached or passed-through node.
    pub outputs: HashMap<NodeId, Vec<(String, DataTable)>>,
    pub stats: RunStats,
}

impl RunOutcome {
    pub(crate) fn new(run: RunId, label: String, state: RunState) -> Self {
        Self {
            run,
            label,
            state,
            report: ValidationReport::new(),
            failure: None,
            nodes: Vec::new(),
            outputs: HashMap::new(),
            stats: RunStats::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Finished
    }

    pub fn node_status(&self, node: NodeId) -> Option<NodeStatus> {
        self.nodes
            .iter()
            .find(|report| report.node == node)
            .map(|report| report.status)
    }

    pub fn output(&self, node: NodeId, slot: &str) -> Option<&DataTable> {
        self.outputs
            .get(&node)?
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, table)| table)
    }
}

/// Scheduler notifications.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Enqueued { run: RunId, label: String },
    Started { run: RunId },
    Finished { run: RunId, outcome: Arc<RunOutcome> },
    /// Failed or cancelled. `cause` is set when a failure, not a user cancel, stopped the run.
    Interrupted {
        run: RunId,
        cause: Option<String>,
        outcome: Arc<RunOutcome>,
    },
}

impl RunEvent {
    pub fn run(&self) -> RunId {
        match self {
            RunEvent::Enqueued { run, .. }
            | RunEvent::Started { run }
            | RunEvent::Finished { run, .. }
            | RunEvent::Interrupted { run, .. } => *run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Queued.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Finished.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
    }

    #[test]
    fn test_failure_message_keeps_context_chain() {
        let cause = anyhow::anyhow!("disk full").context("writing output");
        let failure = NodeFailure::new(NodeId::new(), "writer", Some(3), cause);
        assert_eq!(failure.message, "writing output: disk full");
        assert_eq!(failure.to_string(), "writer failed at step 3: writing output: disk full");
        assert!(matches!(failure.to_error(), EngineError::NodeExecution { .. }));
    }
}
