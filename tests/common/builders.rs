//! Graph builders shared by the integration tests

use super::nodes::CountingNode;
use slotflow::graph::{Graph, NodeId};
use slotflow::node::nodes::ConstantSourceNode;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

/// `source -> a -> b -> c`, every counting node sharing one run counter per node.
pub struct ChainGraph {
    pub graph: Graph,
    pub source: NodeId,
    pub nodes: Vec<NodeId>,
    pub runs: Vec<Arc<AtomicUsize>>,
}

pub struct ChainBuilder {
    rows: Vec<String>,
    factories: Vec<Box<dyn Fn(Arc<AtomicUsize>) -> CountingNode>>,
}

impl ChainBuilder {
    pub fn new(rows: &[&str]) -> Self {
        Self {
            rows: rows.iter().map(|row| row.to_string()).collect(),
            factories: Vec::new(),
        }
    }

    pub fn counting(mut self) -> Self {
        self.factories.push(Box::new(CountingNode::new));
        self
    }

    pub fn failing(mut self) -> Self {
        self.factories.push(Box::new(CountingNode::failing));
        self
    }

    pub fn panicking(mut self) -> Self {
        self.factories.push(Box::new(CountingNode::panicking));
        self
    }

    pub fn broken_strategy(mut self) -> Self {
        self.factories.push(Box::new(CountingNode::broken_strategy));
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.factories
            .push(Box::new(move |runs| CountingNode::slow(runs, delay)));
        self
    }

    pub fn build(self) -> ChainGraph {
        let mut graph = Graph::default();
        let rows: Vec<&str> = self.rows.iter().map(String::as_str).collect();
        let source = graph.add_named_node(Box::new(ConstantSourceNode::texts(&rows)), "source");

        let mut nodes = Vec::new();
        let mut runs = Vec::new();
        let mut previous = source;
        for (index, make) in self.factories.iter().enumerate() {
            let counter = Arc::new(AtomicUsize::new(0));
            let node = graph.add_named_node(Box::new(make(counter.clone())), format!("node-{}", index));
            graph
                .connect_slots(previous, "output", node, "input")
                .expect("chain edge");
            nodes.push(node);
            runs.push(counter);
            previous = node;
        }

        ChainGraph {
            graph,
            source,
            nodes,
            runs,
        }
    }
}
