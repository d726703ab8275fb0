//! Integration tests for result caching across runs

mod common;

use common::builders::ChainBuilder;
use common::nodes::CountingNode;
use common::texts;
use serde_json::json;
use slotflow::config::EngineConfig;
use slotflow::run::{NodeStatus, RunSettings, RunState, Scheduler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_unchanged_graph_is_served_from_cache() {
    let scheduler = Scheduler::new(EngineConfig::default());
    let chain = ChainBuilder::new(&["a", "b", "c"]).counting().counting().build();

    let first = scheduler
        .enqueue(&chain.graph, RunSettings::default())
        .unwrap()
        .wait();
    assert!(first.is_success());
    assert_eq!(chain.runs[0].load(Ordering::SeqCst), 3);
    assert_eq!(chain.runs[1].load(Ordering::SeqCst), 3);

    let second = scheduler
        .enqueue(&chain.graph, RunSettings::default())
        .unwrap()
        .wait();
    assert!(second.is_success());
    assert_eq!(chain.runs[0].load(Ordering::SeqCst), 3);
    assert_eq!(chain.runs[1].load(Ordering::SeqCst), 3);
    for node in &chain.nodes {
        assert_eq!(second.node_status(*node), Some(NodeStatus::Cached));
    }
    assert_eq!(second.stats.steps_executed, 0);

    let last = chain.nodes[1];
    let before = first.output(last, "output").unwrap();
    let after = second.output(last, "output").unwrap();
    assert_eq!(texts(before), texts(after));
    for (old, new) in before.rows().zip(after.rows()) {
        assert_eq!(old.annotations, new.annotations);
    }
}

#[test]
fn test_parameter_change_invalidates_only_that_node() {
    let scheduler = Scheduler::new(EngineConfig::default());
    let mut chain = ChainBuilder::new(&["a", "b"]).counting().counting().counting().build();
    let (a, b, c) = (chain.nodes[0], chain.nodes[1], chain.nodes[2]);

    assert!(scheduler
        .enqueue(&chain.graph, RunSettings::default())
        .unwrap()
        .wait()
        .is_success());

    chain.graph.set_parameter(b, "tag", json!("changed")).unwrap();
    let outcome = scheduler
        .enqueue(&chain.graph, RunSettings::default())
        .unwrap()
        .wait();

    assert!(outcome.is_success());
    assert_eq!(outcome.node_status(a), Some(NodeStatus::Cached));
    assert_eq!(outcome.node_status(b), Some(NodeStatus::Executed));
    // b forwards the same rows, so c's input fingerprint is unchanged.
    assert_eq!(outcome.node_status(c), Some(NodeStatus::Cached));
    assert_eq!(chain.runs[0].load(Ordering::SeqCst), 2);
    assert_eq!(chain.runs[1].load(Ordering::SeqCst), 4);
    assert_eq!(chain.runs[2].load(Ordering::SeqCst), 2);
}

#[test]
fn test_retry_after_failure_resumes_from_cache() {
    let scheduler = Scheduler::new(EngineConfig::default());
    let mut chain = ChainBuilder::new(&["a", "b"]).counting().failing().build();
    let (a, broken) = (chain.nodes[0], chain.nodes[1]);

    let failed = scheduler
        .enqueue(&chain.graph, RunSettings::default())
        .unwrap()
        .wait();
    assert_eq!(failed.state, RunState::Failed);

    chain.graph.remove_node(broken).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let fixed = chain.graph.add_node(Box::new(CountingNode::new(runs.clone())));
    chain.graph.connect_slots(a, "output", fixed, "input").unwrap();

    let retry = scheduler
        .enqueue(&chain.graph, RunSettings::default())
        .unwrap()
        .wait();
    assert!(retry.is_success());
    assert_eq!(retry.node_status(a), Some(NodeStatus::Cached));
    assert_eq!(chain.runs[0].load(Ordering::SeqCst), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_disabled_cache_always_executes() {
    let mut config = EngineConfig::default();
    config.cache.enabled = false;
    let scheduler = Scheduler::new(config);
    let chain = ChainBuilder::new(&["a"]).counting().build();

    for _ in 0..2 {
        let outcome = scheduler
            .enqueue(&chain.graph, RunSettings::default())
            .unwrap()
            .wait();
        assert_eq!(outcome.node_status(chain.nodes[0]), Some(NodeStatus::Executed));
    }
    assert_eq!(chain.runs[0].load(Ordering::SeqCst), 2);
    assert!(!scheduler.cache().is_empty());
}

#[test]
fn test_clearing_a_node_forces_reexecution() {
    let scheduler = Scheduler::new(EngineConfig::default());
    let chain = ChainBuilder::new(&["a"]).counting().build();
    let counted = chain.nodes[0];

    scheduler
        .enqueue(&chain.graph, RunSettings::default())
        .unwrap()
        .wait();
    assert_eq!(scheduler.cache().clear(counted), 1);

    let outcome = scheduler
        .enqueue(&chain.graph, RunSettings::default())
        .unwrap()
        .wait();
    assert_eq!(outcome.node_status(chain.source), Some(NodeStatus::Cached));
    assert_eq!(outcome.node_status(counted), Some(NodeStatus::Executed));
    assert_eq!(chain.runs[0].load(Ordering::SeqCst), 2);
}
