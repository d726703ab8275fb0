//! Property tests for graph structure: acyclicity and topological order

use proptest::prelude::*;
use slotflow::error::EngineError;
use slotflow::graph::{Graph, NodeId};
use slotflow::node::nodes::AnnotateNode;

fn chain_of(count: usize) -> (Graph, Vec<NodeId>) {
    let mut graph = Graph::default();
    let nodes = (0..count)
        .map(|i| graph.add_node(Box::new(AnnotateNode::new("k", i.to_string()))))
        .collect();
    (graph, nodes)
}

proptest! {
    /// Whatever edges are attempted, accepted ones never close a cycle and the
    /// order always puts sources before targets.
    #[test]
    fn accepted_edges_respect_topological_order(
        count in 2usize..8,
        attempts in prop::collection::vec((0usize..8, 0usize..8), 0..24),
    ) {
        let (mut graph, nodes) = chain_of(count);
        for (from, to) in attempts {
            let (from, to) = (nodes[from % count], nodes[to % count]);
            match graph.connect_slots(from, "output", to, "input") {
                Ok(_) => {}
                Err(EngineError::CycleDetected { .. }) => {
                    prop_assert!(graph.is_reachable(to, from));
                }
                Err(EngineError::DuplicateEdge(_)) => {}
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }

        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.len(), count);
        let position = |id: NodeId| order.iter().position(|n| *n == id).unwrap();
        for edge in graph.edges() {
            prop_assert!(position(edge.source.node) < position(edge.target.node));
        }
    }

    /// Closing a chain back onto itself is always refused.
    #[test]
    fn closing_a_chain_is_rejected(count in 1usize..8) {
        let (mut graph, nodes) = chain_of(count);
        for pair in nodes.windows(2) {
            graph.connect_slots(pair[0], "output", pair[1], "input").unwrap();
        }
        let before = graph.edge_count();
        let result = graph.connect_slots(nodes[count - 1], "output", nodes[0], "input");
        let is_cycle = matches!(result, Err(EngineError::CycleDetected { .. }));
        prop_assert!(is_cycle);
        prop_assert_eq!(graph.edge_count(), before);
    }
}
