//! Instrumented nodes for integration tests

use serde_json::json;
use slotflow::data::SlotInfo;
use slotflow::error::{EngineError, Result};
use slotflow::iteration::{IterationSettings, IterationStrategy};
use slotflow::node::{GraphNode, ParameterDescriptor, ParameterHolder, ParameterKind, StepContext};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const COUNTING_TYPE: &str = "test:counting";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Forward,
    Fail,
    Panic,
    /// Panics when asked for its iteration strategy
    BrokenStrategy,
}

/// When one step of a node ran
#[derive(Debug, Clone)]
pub struct Span {
    pub label: String,
    pub start: Instant,
    pub end: Instant,
}

/// Step spans shared by every node of a test graph
pub type Timeline = Arc<Mutex<Vec<Span>>>;

pub fn timeline() -> Timeline {
    Arc::new(Mutex::new(Vec::new()))
}

/// Spans recorded under `label`, in completion order
pub fn spans(timeline: &Timeline, label: &str) -> Vec<Span> {
    timeline
        .lock()
        .iter()
        .filter(|span| span.label == label)
        .cloned()
        .collect()
}

/// Forwards its single input row, counting every step it runs.
///
/// The `tag` parameter only feeds the cache key.
#[derive(Debug, Clone)]
pub struct CountingNode {
    tag: String,
    behavior: Behavior,
    delay: Duration,
    parallel: bool,
    timeline: Option<(String, Timeline)>,
    runs: Arc<AtomicUsize>,
}

impl CountingNode {
    pub fn new(runs: Arc<AtomicUsize>) -> Self {
        Self {
            tag: String::new(),
            behavior: Behavior::Forward,
            delay: Duration::ZERO,
            parallel: false,
            timeline: None,
            runs,
        }
    }

    pub fn failing(runs: Arc<AtomicUsize>) -> Self {
        Self {
            behavior: Behavior::Fail,
            ..Self::new(runs)
        }
    }

    pub fn panicking(runs: Arc<AtomicUsize>) -> Self {
        Self {
            behavior: Behavior::Panic,
            ..Self::new(runs)
        }
    }

    pub fn slow(runs: Arc<AtomicUsize>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(runs)
        }
    }

    pub fn broken_strategy(runs: Arc<AtomicUsize>) -> Self {
        Self {
            behavior: Behavior::BrokenStrategy,
            ..Self::new(runs)
        }
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Record a span per step under `label`
    pub fn with_timeline(mut self, label: impl Into<String>, timeline: Timeline) -> Self {
        self.timeline = Some((label.into(), timeline));
        self
    }
}

impl ParameterHolder for CountingNode {
    fn list_parameters(&self) -> BTreeMap<String, ParameterDescriptor> {
        let descriptor = ParameterDescriptor::new("tag", "Tag", ParameterKind::Text, json!(""));
        BTreeMap::from([(descriptor.key.clone(), descriptor)])
    }

    fn get_parameter(&self, key: &str) -> Option<serde_json::Value> {
        (key == "tag").then(|| json!(self.tag))
    }

    fn set_parameter(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        match (key, value) {
            ("tag", serde_json::Value::String(tag)) => {
                self.tag = tag;
                Ok(())
            }
            (key, _) => Err(EngineError::parameter(key, "unsupported")),
        }
    }
}

impl GraphNode for CountingNode {
    fn node_type(&self) -> &str {
        COUNTING_TYPE
    }

    fn input_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new("input", "any")]
    }

    fn output_slots(&self) -> Vec<SlotInfo> {
        vec![SlotInfo::new("output", "any")]
    }

    fn iteration_strategy(&self) -> IterationStrategy {
        if self.behavior == Behavior::BrokenStrategy {
            panic!("strategy table corrupted");
        }
        IterationStrategy::SingleRow(IterationSettings::default())
    }

    fn supports_parallelization(&self) -> bool {
        self.parallel
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some((label, timeline)) = &self.timeline {
            timeline.lock().push(Span {
                label: label.clone(),
                start,
                end: Instant::now(),
            });
        }
        match self.behavior {
            Behavior::Forward | Behavior::BrokenStrategy => {
                let item = ctx.single_input("input")?.item.clone();
                ctx.add_output("output", item)?;
                Ok(())
            }
            Behavior::Fail => anyhow::bail!("forced failure at step {}", ctx.step_index()),
            Behavior::Panic => panic!("forced panic"),
        }
    }

    fn duplicate(&self) -> Box<dyn GraphNode> {
        Box::new(self.clone())
    }
}
