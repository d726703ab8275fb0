//! Run scheduler
//!
//! Runs execute one at a time. The scheduler owns the only global mutable
//! state, the run queue, behind a single lock:
//!
//! ```text
//!            enqueue()
//!               │
//!   ┌───────────▼───────────┐
//!   │ RunQueue              │   current: Option<Run>
//!   │   waiting: [R2, R3]   │   waiting: FIFO
//!   └───────────┬───────────┘
//!               │ promoted when the current run is terminal
//!   ┌───────────▼───────────┐
//!   │ run thread            │── validate ── Running ── Executor ──┐
//!   └───────────────────────┘                                     │
//!      Finished / Failed / Cancelled ◄────────────────────────────┘
//! ```
//!
//! A single run thread lives while the queue is non-empty: after a run
//! finishes it takes the next waiting one. A run's terminal event goes out
//! before the next run is promoted, so listeners see one run's events end
//! before the next run's `Started`. Listeners receive [`RunEvent`]s as
//! callbacks or through a crossbeam channel; a panicking callback is logged
//! and skipped. A panic while executing a run fails that run only.
//!
//! Lock order is queue first, then a run's status.

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{panic_message, EngineError, Result};
use crate::graph::{Graph, NodeId};
use crate::run::executor::{self, Executor, ExecutorOptions};
use crate::run::progress::{CancellationToken, ProgressInfo, ProgressLog, ProgressSink};
use crate::run::state::{RunEvent, RunId, RunOutcome, RunState};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

// ==================== Run Settings ====================

/// Per-run options. Cache flags are combined with the engine config: a
/// feature is active only if both allow it.
#[derive(Clone)]
pub struct RunSettings {
    /// Nodes to run along with their upstream closure. Empty runs every
    /// active node.
    pub targets: Vec<NodeId>,
    pub use_cache: bool,
    pub store_results: bool,
    /// Overrides the configured pool size
    pub worker_threads: Option<usize>,
    pub label: Option<String>,
    /// Receives progress events in addition to the run's own log
    pub progress_sink: Option<Arc<dyn ProgressSink>>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            use_cache: true,
            store_results: true,
            worker_threads: None,
            label: None,
            progress_sink: None,
        }
    }
}

impl fmt::Debug for RunSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunSettings")
            .field("targets", &self.targets)
            .field("use_cache", &self.use_cache)
            .field("store_results", &self.store_results)
            .field("worker_threads", &self.worker_threads)
            .field("label", &self.label)
            .field("progress_sink", &self.progress_sink.is_some())
            .finish()
    }
}

impl RunSettings {
    pub fn targets(targets: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }
}

// ==================== Run Records ====================

struct RunStatus {
    state: RunState,
    outcome: Option<Arc<RunOutcome>>,
    /// The Enqueued event has gone out; Started may follow.
    announced: bool,
    /// The terminal event has gone out; waiters may return.
    settled: bool,
}

struct RunRecord {
    id: RunId,
    label: String,
    graph: Arc<Graph>,
    settings: RunSettings,
    cancel: CancellationToken,
    progress: Arc<ProgressLog>,
    queued_at: DateTime<Utc>,
    status: Mutex<RunStatus>,
    changed: Condvar,
}

impl RunRecord {
    fn state(&self) -> RunState {
        self.status.lock().state
    }

    fn set_running(&self) {
        self.status.lock().state = RunState::Running;
    }

    fn wait_announced(&self) {
        let mut status = self.status.lock();
        while !status.announced {
            self.changed.wait(&mut status);
        }
    }

    fn announce(&self) {
        self.status.lock().announced = true;
        self.changed.notify_all();
    }

    fn settle(&self) {
        self.status.lock().settled = true;
        self.changed.notify_all();
    }
}

#[derive(Default)]
struct RunQueue {
    current: Option<Arc<RunRecord>>,
    waiting: VecDeque<Arc<RunRecord>>,
}

// ==================== Listeners ====================

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type RunListener = Arc<dyn Fn(&RunEvent) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Callback(RunListener),
    Channel(Sender<RunEvent>),
}

// ==================== Scheduler ====================

struct SchedulerInner {
    config: EngineConfig,
    cache: Arc<ResultCache>,
    queue: Mutex<RunQueue>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_run: AtomicU64,
    next_listener: AtomicU64,
}

/// Run queue service. Cheap to clone; clones share the queue and the cache.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("current", &self.current())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Scheduler {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_cache(config, Arc::new(ResultCache::new()))
    }

    /// Scheduler sharing an existing result cache.
    pub fn with_cache(config: EngineConfig, cache: Arc<ResultCache>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                cache,
                queue: Mutex::new(RunQueue::default()),
                listeners: RwLock::new(Vec::new()),
                next_run: AtomicU64::new(1),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    /// Queue a run over a snapshot of `graph`. Later edits to `graph` do not
    /// affect it.
    pub fn enqueue(&self, graph: &Graph, settings: RunSettings) -> Result<RunHandle> {
        let id = RunId(self.inner.next_run.fetch_add(1, Ordering::SeqCst));
        let label = settings
            .label
            .clone()
            .unwrap_or_else(|| format!("run {}", id));
        let progress = Arc::new(match &settings.progress_sink {
            Some(sink) => ProgressLog::forwarding_to(sink.clone()),
            None => ProgressLog::new(),
        });
        let record = Arc::new(RunRecord {
            id,
            label: label.clone(),
            graph: graph.snapshot(),
            settings,
            cancel: CancellationToken::new(),
            progress,
            queued_at: Utc::now(),
            status: Mutex::new(RunStatus {
                state: RunState::Queued,
                outcome: None,
                announced: false,
                settled: false,
            }),
            changed: Condvar::new(),
        });

        let start_now = {
            let mut queue = self.inner.queue.lock();
            let limit = self.inner.config.scheduler.max_queued_runs;
            if queue.current.is_some() && limit > 0 && queue.waiting.len() >= limit {
                return Err(EngineError::QueueFull(queue.waiting.len()));
            }
            if queue.current.is_none() {
                queue.current = Some(record.clone());
                true
            } else {
                queue.waiting.push_back(record.clone());
                false
            }
        };

        if start_now {
            let inner = self.inner.clone();
            let first = record.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("slotflow-run-{}", id.0))
                .spawn(move || inner.run_loop(first));
            if let Err(err) = spawned {
                self.inner.queue.lock().current = None;
                tracing::error!("Failed to start run thread: {}", err);
                return Err(err.into());
            }
        }

        tracing::info!("Enqueued {} ({})", id, label);
        self.inner.emit(&RunEvent::Enqueued { run: id, label });
        record.announce();

        Ok(RunHandle {
            record,
            scheduler: Arc::downgrade(&self.inner),
        })
    }

    /// Cancel a run. A queued run is removed and marked cancelled right away;
    /// the current run stops cooperatively. Returns false for unknown or
    /// finished runs.
    pub fn cancel(&self, run: RunId) -> bool {
        self.inner.cancel(run)
    }

    pub fn current(&self) -> Option<RunId> {
        self.inner.queue.lock().current.as_ref().map(|record| record.id)
    }

    /// Waiting runs in FIFO order.
    pub fn queued(&self) -> Vec<RunId> {
        self.inner
            .queue
            .lock()
            .waiting
            .iter()
            .map(|record| record.id)
            .collect()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.inner.add_listener(Listener::Callback(Arc::new(listener)))
    }

    /// Events delivered through a channel. Dropping the receiver unsubscribes.
    pub fn subscribe_channel(&self) -> Receiver<RunEvent> {
        let (tx, rx) = unbounded();
        self.inner.add_listener(Listener::Channel(tx));
        rx
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

impl SchedulerInner {
    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    fn emit(&self, event: &RunEvent) {
        let listeners = self.listeners.read().clone();
        let mut closed = Vec::new();
        for (id, listener) in listeners {
            match listener {
                Listener::Callback(callback) => {
                    let delivered = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
                    if let Err(payload) = delivered {
                        tracing::error!(
                            "Listener {:?} panicked on an event of {}: {}",
                            id,
                            event.run(),
                            panic_message(payload.as_ref())
                        );
                    }
                }
                Listener::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            self.listeners
                .write()
                .retain(|(id, _)| !closed.contains(id));
        }
    }

    fn cancel(&self, run: RunId) -> bool {
        let mut queue = self.queue.lock();
        if let Some(current) = queue.current.as_ref().filter(|record| record.id == run) {
            if current.state().is_terminal() {
                return false;
            }
            tracing::info!("Cancelling {}", run);
            current.cancel.cancel();
            return true;
        }

        let Some(position) = queue.waiting.iter().position(|record| record.id == run) else {
            return false;
        };
        let Some(record) = queue.waiting.remove(position) else {
            return false;
        };
        record.cancel.cancel();
        let mut outcome = RunOutcome::new(record.id, record.label.clone(), RunState::Cancelled);
        outcome.stats.queued_at = Some(record.queued_at);
        outcome.stats.finished_at = Some(Utc::now());
        let outcome = Arc::new(outcome);
        {
            let mut status = record.status.lock();
            status.state = RunState::Cancelled;
            status.outcome = Some(outcome.clone());
        }
        drop(queue);

        tracing::info!("Cancelled queued {}", run);
        self.emit(&RunEvent::Interrupted {
            run,
            cause: None,
            outcome,
        });
        record.settle();
        true
    }

    /// Body of the run thread: execute runs until the queue is empty.
    fn run_loop(self: Arc<Self>, first: Arc<RunRecord>) {
        let mut next = Some(first);
        while let Some(record) = next.take() {
            let outcome = Arc::new(self.execute_guarded(&record));
            {
                let mut status = record.status.lock();
                status.state = outcome.state;
                status.outcome = Some(outcome.clone());
            }

            let event = match outcome.state {
                RunState::Finished => {
                    tracing::info!("{} finished", record.id);
                    RunEvent::Finished {
                        run: record.id,
                        outcome: outcome.clone(),
                    }
                }
                _ => {
                    let cause = match (&outcome.failure, outcome.state) {
                        (Some(failure), _) => Some(failure.to_string()),
                        (None, RunState::Failed) => Some(
                            outcome
                                .report
                                .errors()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join("; "),
                        ),
                        _ => None,
                    };
                    tracing::warn!("{} ended {}", record.id, outcome.state);
                    RunEvent::Interrupted {
                        run: record.id,
                        cause,
                        outcome: outcome.clone(),
                    }
                }
            };
            self.emit(&event);

            next = {
                let mut queue = self.queue.lock();
                queue.current = queue.waiting.pop_front();
                queue.current.clone()
            };
            record.settle();
        }
    }

    fn execute_guarded(&self, record: &RunRecord) -> RunOutcome {
        panic::catch_unwind(AssertUnwindSafe(|| self.execute(record))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!("{} panicked: {}", record.id, message);
            let mut outcome = RunOutcome::new(record.id, record.label.clone(), RunState::Failed);
            outcome.stats.queued_at = Some(record.queued_at);
            outcome.stats.finished_at = Some(Utc::now());
            outcome.report.graph_error(format!("run panicked: {}", message));
            outcome
        })
    }

    fn execute(&self, record: &RunRecord) -> RunOutcome {
        record.wait_announced();
        let mut outcome = RunOutcome::new(record.id, record.label.clone(), RunState::Queued);
        outcome.stats.queued_at = Some(record.queued_at);

        if record.cancel.is_cancelled() {
            outcome.state = RunState::Cancelled;
            outcome.stats.finished_at = Some(Utc::now());
            return outcome;
        }

        let plan = executor::plan_run(&record.graph, &record.settings.targets);
        outcome.report = plan.report.clone();
        if !plan.report.is_valid() {
            tracing::warn!(
                "{} failed validation with {} error(s)",
                record.id,
                plan.report.error_count()
            );
            outcome.state = RunState::Failed;
            outcome.stats.finished_at = Some(Utc::now());
            return outcome;
        }

        record.set_running();
        outcome.state = RunState::Running;
        outcome.stats.started_at = Some(Utc::now());
        tracing::info!("{} started ({} nodes)", record.id, plan.order.len());
        self.emit(&RunEvent::Started { run: record.id });

        let settings = &record.settings;
        let options = ExecutorOptions {
            use_cache: settings.use_cache && self.config.cache.enabled,
            store_results: settings.store_results && self.config.cache.store_results,
            worker_threads: settings
                .worker_threads
                .unwrap_or(self.config.scheduler.worker_threads)
                .max(1),
        };
        let progress = ProgressInfo::new(record.progress.clone(), record.cancel.clone())
            .resolve(record.label.as_str());
        let executor = Executor::new(
            &record.graph,
            &self.cache,
            options,
            record.cancel.clone(),
            progress,
        );

        match executor.execute(&plan) {
            Ok(result) => {
                outcome.state = if result.failure.is_some() {
                    RunState::Failed
                } else if result.cancelled {
                    RunState::Cancelled
                } else {
                    RunState::Finished
                };
                if let Some(failure) = &result.failure {
                    let node_name = failure.node_name.clone();
                    let ctx = crate::validation::ValidityContext {
                        node: failure.node,
                        node_name: &node_name,
                    };
                    outcome.report.error(&ctx, None, failure.message.clone());
                }
                outcome.failure = result.failure;
                outcome.nodes = result.nodes;
                outcome.outputs = result.outputs;
                outcome.stats.steps_executed = result.steps_executed;
                outcome.stats.cache_hits = result.cache_hits;
            }
            Err(err) => {
                tracing::error!("{} could not execute: {}", record.id, err);
                outcome.state = RunState::Failed;
                outcome.report.graph_error(err.to_string());
            }
        }
        outcome.stats.finished_at = Some(Utc::now());
        outcome
    }
}

// ==================== Run Handle ====================

/// Caller's view of a queued run.
#[derive(Clone)]
pub struct RunHandle {
    record: Arc<RunRecord>,
    scheduler: Weak<SchedulerInner>,
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.record.id)
            .field("label", &self.record.label)
            .field("state", &self.state())
            .finish()
    }
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.record.id
    }

    pub fn label(&self) -> &str {
        &self.record.label
    }

    pub fn state(&self) -> RunState {
        self.record.state()
    }

    /// Block until the run is terminal and its final event has been delivered.
    pub fn wait(&self) -> Arc<RunOutcome> {
        let mut status = self.record.status.lock();
        loop {
            if let (true, Some(outcome)) = (status.settled, &status.outcome) {
                return outcome.clone();
            }
            self.record.changed.wait(&mut status);
        }
    }

    /// Like [`RunHandle::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<RunOutcome>> {
        let deadline = Instant::now() + timeout;
        let mut status = self.record.status.lock();
        loop {
            if let (true, Some(outcome)) = (status.settled, &status.outcome) {
                return Some(outcome.clone());
            }
            if self
                .record
                .changed
                .wait_until(&mut status, deadline)
                .timed_out()
            {
                return match (status.settled, &status.outcome) {
                    (true, Some(outcome)) => Some(outcome.clone()),
                    _ => None,
                };
            }
        }
    }

    /// Final outcome, if the run is terminal.
    pub fn outcome(&self) -> Option<Arc<RunOutcome>> {
        self.record.status.lock().outcome.clone()
    }

    pub fn cancel(&self) -> bool {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.cancel(self.record.id),
            None => {
                self.record.cancel.cancel();
                true
            }
        }
    }

    pub fn progress_log(&self) -> &Arc<ProgressLog> {
        &self.record.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::nodes::{AnnotateNode, ConstantSourceNode};

    fn simple_graph() -> (Graph, NodeId) {
        let mut graph = Graph::default();
        let source = graph.add_node(Box::new(ConstantSourceNode::texts(&["a", "b"])));
        let annotate = graph.add_node(Box::new(AnnotateNode::new("k", "v")));
        graph.connect_slots(source, "output", annotate, "input").unwrap();
        (graph, annotate)
    }

    #[test]
    fn test_run_finishes() {
        let scheduler = Scheduler::new(EngineConfig::default());
        let (graph, annotate) = simple_graph();
        let handle = scheduler.enqueue(&graph, RunSettings::default()).unwrap();
        let outcome = handle.wait();
        assert_eq!(outcome.state, RunState::Finished);
        assert_eq!(handle.state(), RunState::Finished);
        assert_eq!(outcome.output(annotate, "output").unwrap().len(), 2);
        assert!(outcome.stats.started_at.is_some());
        assert!(!handle.progress_log().is_empty());
    }

    #[test]
    fn test_validation_failure_never_runs() {
        let scheduler = Scheduler::new(EngineConfig::default());
        let mut graph = Graph::default();
        graph.add_node(Box::new(AnnotateNode::new("k", "v")));
        let events = scheduler.subscribe_channel();

        let outcome = scheduler.enqueue(&graph, RunSettings::default()).unwrap().wait();
        assert_eq!(outcome.state, RunState::Failed);
        assert!(outcome.stats.started_at.is_none());
        assert!(outcome.nodes.is_empty());

        let received: Vec<RunEvent> = events.try_iter().collect();
        assert!(matches!(received[0], RunEvent::Enqueued { .. }));
        assert!(matches!(received[1], RunEvent::Interrupted { cause: Some(_), .. }));
        assert_eq!(received.len(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let scheduler = Scheduler::new(EngineConfig::default());
        let id = scheduler.subscribe(|_| {});
        assert!(scheduler.unsubscribe(id));
        assert!(!scheduler.unsubscribe(id));
    }

    #[test]
    fn test_cancel_unknown_run() {
        let scheduler = Scheduler::new(EngineConfig::default());
        assert!(!scheduler.cancel(RunId(42)));
    }
}
