//! Graph execution for a single run.
//!
//! ```text
//!  control loop (run thread)                 worker pool
//!  ─────────────────────────                 ───────────
//!  node ready ─► gather inputs
//!             ─► cache lookup ──hit──► outputs
//!             ─► build iteration steps
//!             ─► dispatch ─────────────────► node.run(step) ─┐
//!  buffer by step index ◄──── StepMessage ───────────────────┘
//!  last step in ─► append outputs in step order ─► cache store
//! ```
//!
//! A node becomes ready once every node feeding it is done, so independent
//! branches run side by side. Steps of a parallelizable node are dispatched
//! all at once; other nodes get one step in flight at a time. After a failure
//! or a cancel, nothing new is dispatched and in-flight steps are drained;
//! steps still waiting in the pool are abandoned. A node that did not get
//! every step in is skipped and never stored in the cache.

use crate::cache::{CacheKey, CachedOutput, ResultCache};
use crate::data::slot::SlotInfo;
use crate::data::table::DataTable;
use crate::data::types::DataTypeRegistry;
use crate::error::{panic_message, Result};
use crate::graph::{Graph, NodeEntry, NodeId};
use crate::iteration::{IterationStep, IterationStepBuilder};
use crate::node::contract::{GraphNode, StepContext};
use crate::node::parameters::ParameterSnapshot;
use crate::run::pool::WorkerPool;
use crate::run::progress::{CancellationToken, ProgressInfo};
use crate::run::state::{NodeFailure, NodeReport, NodeStatus};
use crate::validation::{ValidationReport, ValidityContext, Validator};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ==================== Planning ====================

/// Nodes a run will execute, in topological order, plus the validation findings.
#[derive(Debug, Clone)]
pub(crate) struct RunPlan {
    pub order: Vec<NodeId>,
    pub deactivated: Vec<NodeId>,
    pub report: ValidationReport,
}

/// Resolve the run set and validate it.
///
/// No targets means every active node. Explicit targets pull in their upstream
/// closure; a deactivated node inside that closure is a validation error.
pub(crate) fn plan_run(graph: &Graph, targets: &[NodeId]) -> RunPlan {
    let mut report = ValidationReport::new();
    let order = match graph.topological_order() {
        Ok(order) => order,
        Err(err) => {
            report.graph_error(err.to_string());
            return RunPlan {
                order: Vec::new(),
                deactivated: Vec::new(),
                report,
            };
        }
    };

    let deactivated = graph.deactivated_nodes();
    let run_set: BTreeSet<NodeId> = if targets.is_empty() {
        order
            .iter()
            .copied()
            .filter(|id| !deactivated.contains(id))
            .collect()
    } else {
        let mut set = BTreeSet::new();
        for &target in targets {
            if !graph.contains(target) {
                report.graph_error(format!("run target {} does not exist", target));
                continue;
            }
            set.insert(target);
            set.extend(graph.upstream(target));
        }
        for id in set.iter().filter(|id| deactivated.contains(id)) {
            if let Some(entry) = graph.node(*id) {
                let ctx = ValidityContext {
                    node: *id,
                    node_name: entry.name(),
                };
                report.error(&ctx, None, "node is deactivated but a run target depends on it");
            }
        }
        set
    };

    report.merge(Validator::validate(graph, &run_set));

    let deactivated = if targets.is_empty() {
        order
            .iter()
            .copied()
            .filter(|id| deactivated.contains(id))
            .collect()
    } else {
        Vec::new()
    };
    RunPlan {
        order: order.into_iter().filter(|id| run_set.contains(id)).collect(),
        deactivated,
        report,
    }
}

// ==================== Execution ====================

#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecutorOptions {
    pub use_cache: bool,
    pub store_results: bool,
    pub worker_threads: usize,
}

#[derive(Debug, Default)]
pub(crate) struct ExecutionResult {
    pub nodes: Vec<NodeReport>,
    pub outputs: HashMap<NodeId, Vec<(String, DataTable)>>,
    pub failure: Option<NodeFailure>,
    pub cancelled: bool,
    pub steps_executed: usize,
    pub cache_hits: usize,
}

pub(crate) struct Executor<'a> {
    graph: &'a Graph,
    cache: &'a ResultCache,
    options: ExecutorOptions,
    cancel: CancellationToken,
    progress: ProgressInfo,
}

impl<'a> Executor<'a> {
    pub fn new(
        graph: &'a Graph,
        cache: &'a ResultCache,
        options: ExecutorOptions,
        cancel: CancellationToken,
        progress: ProgressInfo,
    ) -> Self {
        Self {
            graph,
            cache,
            options,
            cancel,
            progress,
        }
    }

    pub fn execute(&self, plan: &RunPlan) -> Result<ExecutionResult> {
        let pool = WorkerPool::new(self.options.worker_threads, "slotflow-step")?;
        let (tx, rx) = unbounded();
        let mut control = ControlLoop::new(self, plan, &pool, tx, rx);
        control.run();
        Ok(control.finish(plan))
    }
}

// ==================== Control loop ====================

enum StepResult {
    Completed(Vec<DataTable>),
    Failed(anyhow::Error),
    /// Dropped before the step started because the run is stopping.
    Abandoned,
}

struct StepMessage {
    node_index: usize,
    step_index: usize,
    result: StepResult,
}

/// One unit of work for the pool.
struct StepJob {
    node_index: usize,
    step: IterationStep,
    node: Arc<dyn GraphNode>,
    inputs: Arc<Vec<SlotInfo>>,
    outputs: Arc<Vec<SlotInfo>>,
    registry: Arc<DataTypeRegistry>,
    progress: ProgressInfo,
    cancel: CancellationToken,
    /// Set by the control loop once any node has failed.
    halt: Arc<AtomicBool>,
    tx: Sender<StepMessage>,
}

impl StepJob {
    fn run(self) {
        let StepJob {
            node_index,
            step,
            node,
            inputs,
            outputs,
            registry,
            progress,
            cancel,
            halt,
            tx,
        } = self;
        let step_index = step.index;

        let result = if cancel.is_cancelled() || halt.load(Ordering::SeqCst) {
            StepResult::Abandoned
        } else {
            tracing::trace!("Running step {} of {}", step_index, node.node_type());
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = StepContext::new(&step, &inputs, &outputs, &registry, progress);
                node.run(&mut ctx).map(|()| ctx.into_outputs())
            }));
            match outcome {
                Ok(Ok(tables)) => StepResult::Completed(tables),
                Ok(Err(err)) => StepResult::Failed(err),
                Err(payload) => StepResult::Failed(anyhow::anyhow!(
                    "node panicked: {}",
                    panic_message(payload.as_ref())
                )),
            }
        };

        // The control loop outlives every job, so the receiver is still there.
        let _ = tx.send(StepMessage {
            node_index,
            step_index,
            result,
        });
    }
}

/// Per-node bookkeeping while its steps are in flight.
struct NodeRun {
    id: NodeId,
    name: String,
    node: Arc<dyn GraphNode>,
    inputs: Arc<Vec<SlotInfo>>,
    outputs: Arc<Vec<SlotInfo>>,
    pending: VecDeque<IterationStep>,
    total: usize,
    outstanding: usize,
    /// Step outputs keyed by step index, appended in order once all are in.
    completed: BTreeMap<usize, Vec<DataTable>>,
    cache_key: Option<CacheKey>,
    parallel: bool,
    skipped_rows: usize,
    executed: usize,
    failed: bool,
}

enum Phase {
    Waiting,
    Active(Box<NodeRun>),
    Done,
}

struct ControlLoop<'e, 'a> {
    executor: &'e Executor<'a>,
    pool: &'e WorkerPool,
    order: Vec<NodeId>,
    deps: Vec<Vec<usize>>,
    phases: Vec<Phase>,
    outputs: HashMap<NodeId, Vec<(String, DataTable)>>,
    reports: HashMap<NodeId, NodeReport>,
    failure: Option<NodeFailure>,
    halt: Arc<AtomicBool>,
    steps_executed: usize,
    cache_hits: usize,
    tx: Sender<StepMessage>,
    rx: Receiver<StepMessage>,
}

impl<'e, 'a> ControlLoop<'e, 'a> {
    fn new(
        executor: &'e Executor<'a>,
        plan: &RunPlan,
        pool: &'e WorkerPool,
        tx: Sender<StepMessage>,
        rx: Receiver<StepMessage>,
    ) -> Self {
        let index: HashMap<NodeId, usize> = plan
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let deps = plan
            .order
            .iter()
            .map(|id| {
                executor
                    .graph
                    .incoming_edges(*id)
                    .filter_map(|edge| index.get(&edge.source.node).copied())
                    .collect::<BTreeSet<usize>>()
                    .into_iter()
                    .collect()
            })
            .collect();

        Self {
            executor,
            pool,
            order: plan.order.clone(),
            deps,
            phases: plan.order.iter().map(|_| Phase::Waiting).collect(),
            outputs: HashMap::new(),
            reports: HashMap::new(),
            failure: None,
            halt: Arc::new(AtomicBool::new(false)),
            steps_executed: 0,
            cache_hits: 0,
            tx,
            rx,
        }
    }

    fn stopping(&self) -> bool {
        self.failure.is_some() || self.executor.cancel.is_cancelled()
    }

    fn run(&mut self) {
        loop {
            if !self.stopping() {
                self.start_ready_nodes();
            }

            if self.stopping() {
                self.settle_idle_nodes();
            }

            let in_flight: usize = self
                .phases
                .iter()
                .map(|phase| match phase {
                    Phase::Active(run) => run.outstanding,
                    _ => 0,
                })
                .sum();
            if in_flight == 0 {
                break;
            }

            match self.rx.recv() {
                Ok(message) => self.handle_message(message),
                Err(_) => break,
            }
        }
    }

    fn start_ready_nodes(&mut self) {
        let mut progressed = true;
        while progressed && !self.stopping() {
            progressed = false;
            for index in 0..self.order.len() {
                if self.stopping() {
                    break;
                }
                if !matches!(self.phases[index], Phase::Waiting) {
                    continue;
                }
                let ready = self.deps[index]
                    .iter()
                    .all(|dep| self.outputs.contains_key(&self.order[*dep]));
                if ready {
                    self.start_node_guarded(index);
                    progressed = true;
                }
            }
        }
    }

    /// Active nodes with nothing in flight cannot make progress once stopping.
    fn settle_idle_nodes(&mut self) {
        for index in 0..self.phases.len() {
            let status = match &self.phases[index] {
                Phase::Active(run) if run.outstanding == 0 => {
                    if run.failed {
                        NodeStatus::Failed
                    } else {
                        NodeStatus::Skipped
                    }
                }
                _ => continue,
            };
            self.abort_node(index, status);
        }
    }

    /// Node methods called here run on the control thread; a panic fails the node.
    fn start_node_guarded(&mut self, index: usize) {
        let started = panic::catch_unwind(AssertUnwindSafe(|| self.start_node(index)));
        if let Err(payload) = started {
            self.fail(
                index,
                None,
                anyhow::anyhow!("node panicked: {}", panic_message(payload.as_ref())),
            );
        }
    }

    fn start_node(&mut self, index: usize) {
        let graph = self.executor.graph;
        let id = self.order[index];
        let entry = match graph.entry(id) {
            Ok(entry) => entry,
            Err(err) => {
                self.fail(index, None, anyhow::Error::new(err));
                return;
            }
        };
        let progress = self.executor.progress.resolve(entry.name());
        progress.log("started");

        let tables = match self.gather_inputs(entry) {
            Ok(tables) => tables,
            Err(err) => {
                self.fail(index, None, anyhow::Error::new(err));
                return;
            }
        };

        if entry.is_pass_through() {
            match self.pass_through(entry, tables) {
                Ok(slots) => {
                    tracing::debug!("{} passes its input through", entry.name());
                    self.complete(index, slots, NodeStatus::PassedThrough, 0, 0);
                }
                Err(err) => self.fail(index, None, anyhow::Error::new(err)),
            }
            return;
        }

        let node = entry.shared_node();
        let options = self.executor.options;
        let cache_key = (node.cacheable() && (options.use_cache || options.store_results))
            .then(|| {
                CacheKey::new(
                    id,
                    ParameterSnapshot::of(node.as_ref()),
                    CacheKey::input_fingerprint(
                        entry
                            .input_slots()
                            .iter()
                            .map(|slot| slot.name.as_str())
                            .zip(tables.iter()),
                    ),
                )
            });

        if options.use_cache {
            if let Some(hit) = cache_key.as_ref().and_then(|key| self.executor.cache.lookup(key)) {
                tracing::debug!(
                    "Cache hit for {} ({} rows from {})",
                    entry.name(),
                    hit.row_count(),
                    hit.created_at
                );
                self.cache_hits += 1;
                self.complete(index, hit.slots.clone(), NodeStatus::Cached, 0, 0);
                return;
            }
        }

        let plan = match IterationStepBuilder::new(entry.input_slots(), &tables)
            .build(&node.iteration_strategy())
        {
            Ok(plan) => plan,
            Err(err) => {
                self.fail(index, None, anyhow::Error::new(err));
                return;
            }
        };
        for skipped in &plan.skipped {
            tracing::warn!(
                "{}: skipped row {:?} of slot '{}': {}",
                entry.name(),
                skipped.reference_row,
                skipped.slot,
                skipped.reason
            );
        }
        for conflict in &plan.conflicts {
            tracing::warn!(
                "{}: annotation '{}' conflict, kept '{}' over '{}'",
                entry.name(),
                conflict.key,
                conflict.kept,
                conflict.rejected
            );
        }
        tracing::debug!(
            "{}: {} of {} steps to run ({})",
            entry.name(),
            plan.steps.len(),
            plan.generated,
            node.iteration_strategy().name()
        );

        let run = NodeRun {
            id,
            name: entry.name().to_string(),
            parallel: node.supports_parallelization(),
            node,
            inputs: Arc::new(entry.input_slots().to_vec()),
            outputs: Arc::new(entry.output_slots().to_vec()),
            total: plan.steps.len(),
            pending: plan.steps.into(),
            outstanding: 0,
            completed: BTreeMap::new(),
            cache_key,
            skipped_rows: plan.skipped.len(),
            executed: 0,
            failed: false,
        };

        let empty = run.total == 0;
        self.phases[index] = Phase::Active(Box::new(run));
        if empty {
            self.finish_node(index);
        } else {
            self.dispatch(index);
        }
    }

    /// Input tables in slot order, filled from incoming edges in edge order.
    fn gather_inputs(&self, entry: &NodeEntry) -> Result<Vec<DataTable>> {
        let graph = self.executor.graph;
        let registry = graph.registry();
        entry
            .input_slots()
            .iter()
            .map(|slot| {
                let mut table = DataTable::new();
                for edge in graph
                    .incoming_edges(entry.id())
                    .filter(|edge| edge.target.slot == slot.name)
                {
                    let source = self
                        .outputs
                        .get(&edge.source.node)
                        .and_then(|slots| slots.iter().find(|(name, _)| *name == edge.source.slot))
                        .map(|(_, table)| table);
                    let Some(source) = source else {
                        continue;
                    };
                    for row in source.rows() {
                        let item = registry.convert(&row.item, &slot.data_type).map_err(|err| {
                            err.with_context(format!("feeding {} into '{}'", edge, slot.name))
                        })?;
                        table.add_row(item, row.annotations.clone());
                    }
                }
                Ok(table)
            })
            .collect()
    }

    fn pass_through(
        &self,
        entry: &NodeEntry,
        tables: Vec<DataTable>,
    ) -> Result<Vec<(String, DataTable)>> {
        let registry = self.executor.graph.registry();
        let first_input = tables.into_iter().next().unwrap_or_default();
        entry
            .output_slots()
            .iter()
            .enumerate()
            .map(|(slot_index, slot)| {
                let mut table = DataTable::new();
                if slot_index == 0 {
                    for row in first_input.rows() {
                        let item = registry.convert(&row.item, &slot.data_type)?;
                        table.add_row(item, row.annotations.clone());
                    }
                }
                Ok((slot.name.clone(), table))
            })
            .collect()
    }

    fn dispatch(&mut self, index: usize) {
        let stopping = self.stopping();
        let registry = self.executor.graph.registry().clone();
        let Phase::Active(run) = &mut self.phases[index] else {
            return;
        };

        let mut rejected = None;
        while !stopping && (run.parallel || run.outstanding == 0) {
            let Some(step) = run.pending.pop_front() else {
                break;
            };
            let step_index = step.index;
            let job = StepJob {
                node_index: index,
                node: run.node.clone(),
                inputs: run.inputs.clone(),
                outputs: run.outputs.clone(),
                registry: registry.clone(),
                progress: self
                    .executor
                    .progress
                    .resolve(run.name.as_str())
                    .resolve(format!("Step {}/{}", step_index + 1, run.total)),
                cancel: self.executor.cancel.clone(),
                halt: self.halt.clone(),
                tx: self.tx.clone(),
                step,
            };
            if !self.pool.execute(move || job.run()) {
                rejected = Some(step_index);
                break;
            }
            run.outstanding += 1;
        }

        if let Some(step_index) = rejected {
            self.fail(
                index,
                Some(step_index),
                anyhow::anyhow!("worker pool rejected step {}", step_index),
            );
        }
    }

    fn handle_message(&mut self, message: StepMessage) {
        let stopping = self.stopping();
        let Phase::Active(run) = &mut self.phases[message.node_index] else {
            return;
        };
        run.outstanding = run.outstanding.saturating_sub(1);

        match message.result {
            StepResult::Completed(tables) => {
                run.completed.insert(message.step_index, tables);
                run.executed += 1;
                self.steps_executed += 1;
            }
            StepResult::Failed(err) => {
                run.failed = true;
                tracing::error!("{} failed at step {}: {:#}", run.name, message.step_index, err);
                if self.failure.is_none() {
                    self.failure = Some(NodeFailure::new(
                        run.id,
                        run.name.clone(),
                        Some(message.step_index),
                        err,
                    ));
                }
                self.halt.store(true, Ordering::SeqCst);
            }
            StepResult::Abandoned => {}
        }

        // Abandoned steps leave the node incomplete; settle_idle_nodes skips it.
        let finished = run.outstanding == 0
            && run.pending.is_empty()
            && !run.failed
            && run.completed.len() == run.total;
        let more = !stopping && !run.failed && !run.pending.is_empty();
        if finished {
            self.finish_node(message.node_index);
        } else if more {
            self.dispatch(message.node_index);
        }
    }

    /// All steps are in: append step outputs in step order and store the result.
    fn finish_node(&mut self, index: usize) {
        let Phase::Active(run) = std::mem::replace(&mut self.phases[index], Phase::Done) else {
            return;
        };
        let run = *run;

        let mut tables: Vec<DataTable> = run.outputs.iter().map(|_| DataTable::new()).collect();
        for step_tables in run.completed.into_values() {
            for (slot_index, table) in step_tables.into_iter().enumerate() {
                if let Some(target) = tables.get_mut(slot_index) {
                    for row in table.into_rows() {
                        target.add_row(row.item, row.annotations);
                    }
                }
            }
        }
        let slots: Vec<(String, DataTable)> = run
            .outputs
            .iter()
            .map(|slot| slot.name.clone())
            .zip(tables)
            .collect();

        if self.executor.options.store_results {
            if let Some(key) = run.cache_key {
                self.executor
                    .cache
                    .store(key, CachedOutput::new(slots.clone()));
            }
        }

        self.complete(index, slots, NodeStatus::Executed, run.executed, run.skipped_rows);
    }

    fn complete(
        &mut self,
        index: usize,
        slots: Vec<(String, DataTable)>,
        status: NodeStatus,
        steps: usize,
        skipped_rows: usize,
    ) {
        let id = self.order[index];
        let name = self.node_name(id);
        self.executor
            .progress
            .resolve(name.as_str())
            .log(format!("{} ({} steps)", status, steps));
        self.phases[index] = Phase::Done;
        self.outputs.insert(id, slots);
        self.reports.insert(
            id,
            NodeReport {
                node: id,
                name,
                status,
                steps,
                skipped_rows,
            },
        );
    }

    fn abort_node(&mut self, index: usize, status: NodeStatus) {
        let id = self.order[index];
        let (steps, skipped_rows) = match &self.phases[index] {
            Phase::Active(run) => (run.executed, run.skipped_rows),
            _ => (0, 0),
        };
        self.phases[index] = Phase::Done;
        self.reports.insert(
            id,
            NodeReport {
                node: id,
                name: self.node_name(id),
                status,
                steps,
                skipped_rows,
            },
        );
    }

    fn fail(&mut self, index: usize, step: Option<usize>, cause: anyhow::Error) {
        let id = self.order[index];
        let name = self.node_name(id);
        tracing::error!("{} failed: {:#}", name, cause);
        if self.failure.is_none() {
            self.failure = Some(NodeFailure::new(id, name, step, cause));
        }
        self.halt.store(true, Ordering::SeqCst);
        if let Phase::Active(run) = &mut self.phases[index] {
            run.failed = true;
            if run.outstanding > 0 {
                return;
            }
        }
        self.abort_node(index, NodeStatus::Failed);
    }

    fn node_name(&self, id: NodeId) -> String {
        self.executor
            .graph
            .node(id)
            .map(|entry| entry.name().to_string())
            .unwrap_or_else(|| id.short())
    }

    fn finish(mut self, plan: &RunPlan) -> ExecutionResult {
        let mut nodes = Vec::with_capacity(plan.order.len() + plan.deactivated.len());
        for id in &plan.order {
            let report = self.reports.remove(id).unwrap_or_else(|| NodeReport {
                node: *id,
                name: self.node_name(*id),
                status: NodeStatus::Skipped,
                steps: 0,
                skipped_rows: 0,
            });
            nodes.push(report);
        }
        for id in &plan.deactivated {
            tracing::warn!("{} is deactivated", self.node_name(*id));
            nodes.push(NodeReport {
                node: *id,
                name: self.node_name(*id),
                status: NodeStatus::Deactivated,
                steps: 0,
                skipped_rows: 0,
            });
        }

        let cancelled = self.failure.is_none()
            && self.executor.cancel.is_cancelled()
            && nodes.iter().any(|node| node.status == NodeStatus::Skipped);

        ExecutionResult {
            nodes,
            outputs: self.outputs,
            failure: self.failure,
            cancelled,
            steps_executed: self.steps_executed,
            cache_hits: self.cache_hits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::nodes::{AnnotateNode, CollectNode, ConstantSourceNode, JoinTextNode};
    use crate::run::progress::ProgressLog;
    use serde_json::json;

    fn execute(graph: &Graph, cache: &ResultCache, targets: &[NodeId]) -> (RunPlan, ExecutionResult) {
        let plan = plan_run(graph, targets);
        assert!(plan.report.is_valid(), "{}", plan.report);
        let progress = ProgressInfo::new(Arc::new(ProgressLog::new()), CancellationToken::new());
        let executor = Executor::new(
            graph,
            cache,
            ExecutorOptions {
                use_cache: true,
                store_results: true,
                worker_threads: 4,
            },
            CancellationToken::new(),
            progress,
        );
        let result = executor.execute(&plan).unwrap();
        (plan, result)
    }

    fn texts(table: &DataTable) -> Vec<String> {
        table
            .rows()
            .map(|row| row.item.to_json().unwrap().as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_parallel_outputs_keep_step_order() {
        let mut graph = Graph::default();
        let values: Vec<String> = (0..40).map(|i| format!("v{}", i)).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let source = graph.add_node(Box::new(ConstantSourceNode::texts(&refs)));
        let annotate = graph.add_node(Box::new(AnnotateNode::new("seen", "yes")));
        graph.connect_slots(source, "output", annotate, "input").unwrap();

        let (_, result) = execute(&graph, &ResultCache::new(), &[]);
        assert!(result.failure.is_none());
        let table = &result.outputs[&annotate][0].1;
        assert_eq!(texts(table), values);
        assert!(table
            .rows()
            .enumerate()
            .all(|(i, row)| row.original_index == i && row.annotation("seen") == Some("yes")));
        assert_eq!(result.steps_executed, 41);
    }

    #[test]
    fn test_join_matches_by_annotation() {
        let mut graph = Graph::default();
        let left = graph.add_node(Box::new(
            ConstantSourceNode::texts(&[])
                .with_row(json!("hello"), &[("id", "1")])
                .with_row(json!("good"), &[("id", "2")]),
        ));
        let right = graph.add_node(Box::new(
            ConstantSourceNode::texts(&[])
                .with_row(json!("morning"), &[("id", "2")])
                .with_row(json!("world"), &[("id", "1")]),
        ));
        let join = graph.add_node(Box::new(JoinTextNode::new(" ")));
        graph.connect_slots(left, "output", join, "left").unwrap();
        graph.connect_slots(right, "output", join, "right").unwrap();

        let (_, result) = execute(&graph, &ResultCache::new(), &[]);
        let table = &result.outputs[&join][0].1;
        assert_eq!(texts(table), vec!["hello world", "good morning"]);
    }

    #[test]
    fn test_second_run_hits_cache() {
        let mut graph = Graph::default();
        let source = graph.add_node(Box::new(ConstantSourceNode::texts(&["a", "b"])));
        let collect = graph.add_node(Box::new(CollectNode::new()));
        graph.connect_slots(source, "output", collect, "input").unwrap();
        let cache = ResultCache::new();

        let (_, first) = execute(&graph, &cache, &[]);
        assert_eq!(first.cache_hits, 0);
        let (_, second) = execute(&graph, &cache, &[]);
        assert_eq!(second.cache_hits, 2);
        assert_eq!(second.steps_executed, 0);
        assert_eq!(
            first.outputs[&collect][0].1.row(0).unwrap().item.to_json(),
            second.outputs[&collect][0].1.row(0).unwrap().item.to_json()
        );
    }

    #[test]
    fn test_targets_limit_run_set() {
        let mut graph = Graph::default();
        let source = graph.add_node(Box::new(ConstantSourceNode::texts(&["a"])));
        let first = graph.add_node(Box::new(AnnotateNode::new("k", "1")));
        let second = graph.add_node(Box::new(AnnotateNode::new("k", "2")));
        graph.connect_slots(source, "output", first, "input").unwrap();
        graph.connect_slots(source, "output", second, "input").unwrap();

        let plan = plan_run(&graph, &[first]);
        assert_eq!(plan.order, vec![source, first]);
    }

    #[test]
    fn test_deactivated_nodes_are_reported() {
        let mut graph = Graph::default();
        let source = graph.add_node(Box::new(ConstantSourceNode::texts(&["a"])));
        let annotate = graph.add_node(Box::new(AnnotateNode::new("k", "v")));
        graph.connect_slots(source, "output", annotate, "input").unwrap();
        graph.set_enabled(source, false).unwrap();

        let plan = plan_run(&graph, &[]);
        assert!(plan.order.is_empty());
        assert_eq!(plan.deactivated, vec![source, annotate]);

        let targeted = plan_run(&graph, &[annotate]);
        assert!(!targeted.report.is_valid());
    }

    #[test]
    fn test_pass_through_copies_first_input() {
        let mut graph = Graph::default();
        let source = graph.add_node(Box::new(ConstantSourceNode::texts(&["a", "b"])));
        let annotate = graph.add_node(Box::new(AnnotateNode::new("k", "v")));
        graph.connect_slots(source, "output", annotate, "input").unwrap();
        graph.set_pass_through(annotate, true).unwrap();

        let (_, result) = execute(&graph, &ResultCache::new(), &[]);
        let table = &result.outputs[&annotate][0].1;
        assert_eq!(texts(table), vec!["a", "b"]);
        assert!(table.rows().all(|row| row.annotation("k").is_none()));
        assert_eq!(result.nodes[1].status, NodeStatus::PassedThrough);
    }
}
