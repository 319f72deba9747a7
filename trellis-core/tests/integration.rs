//! Integration Tests for the Assembly Engine
//!
//! These tests drive the public engine surface the way a resolver would:
//! productions arrive (concurrently, in some tests), the graph is built,
//! and the committed structure is checked against the engine's core
//! guarantees: no dangling edges, no cycles, order independence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use indexmap::IndexSet;

use trellis_core::assembler::{BuildFailure, GraphAssembler, PumpHandle, ResolutionContext};
use trellis_core::graph::{GraphNode, NodeId};
use trellis_core::value::{Producer, Production, PropertySet, Requirement, Target, ValueSpec};

/// A context that discards everything; the engine must not rely on it.
struct NullContext;

impl ResolutionContext for NullContext {
    fn report_failure(&self, _failure: BuildFailure) {}
    fn release_pump(&self, _pump: PumpHandle) {}
}

fn target(id: &str) -> Target {
    Target::new("security", id)
}

fn spec(name: &str, id: &str) -> ValueSpec {
    ValueSpec::new(name, target(id), PropertySet::none())
}

fn requirement(name: &str, id: &str) -> Requirement {
    Requirement::new(name, target(id), PropertySet::none())
}

/// A two-level production chain on one target: Raw -> Derived.
fn chain(id: &str) -> (Production, Production) {
    let raw = spec("Raw", id);
    let derived = spec("Derived", id);
    let leaf = Production::leaf(raw.clone(), Producer::plain("feed"));
    let inner = Production::new(
        derived.clone(),
        Producer::plain("calc"),
        IndexSet::from([raw]),
        IndexSet::from([derived]),
    );
    (leaf, inner)
}

/// Every input value of every committed node must be produced by exactly
/// one committed node, and that node must be listed as an input node.
fn assert_no_dangling_edges(nodes: &[GraphNode]) {
    let by_id: HashMap<NodeId, &GraphNode> = nodes.iter().map(|n| (n.id, n)).collect();
    for node in nodes {
        for input in &node.input_values {
            let producers: Vec<&GraphNode> = nodes
                .iter()
                .filter(|candidate| candidate.output_values.contains(input))
                .collect();
            assert_eq!(
                producers.len(),
                1,
                "input {} of node {} has {} producers",
                input,
                node.id,
                producers.len()
            );
            assert!(
                node.input_nodes.contains(&producers[0].id),
                "input {} of node {} is not wired to its producer",
                input,
                node.id
            );
        }
        for input_node in &node.input_nodes {
            assert!(by_id.contains_key(input_node), "edge to unknown node");
        }
    }
}

/// The committed graph, read along input edges, must be acyclic.
fn assert_acyclic(nodes: &[GraphNode]) {
    fn visit(
        id: NodeId,
        by_id: &HashMap<NodeId, &GraphNode>,
        path: &mut Vec<NodeId>,
        done: &mut HashSet<NodeId>,
    ) {
        if done.contains(&id) {
            return;
        }
        assert!(!path.contains(&id), "cycle through node {}", id);
        path.push(id);
        for input in &by_id[&id].input_nodes {
            visit(*input, by_id, path, done);
        }
        path.pop();
        done.insert(id);
    }

    let by_id: HashMap<NodeId, &GraphNode> = nodes.iter().map(|n| (n.id, n)).collect();
    let mut done: HashSet<NodeId> = HashSet::new();
    for node in nodes {
        let mut path: Vec<NodeId> = Vec::new();
        visit(node.id, &by_id, &mut path, &mut done);
    }
}

/// Shape of the graph with node identity erased, for order-independence
/// comparisons.
fn graph_shape(nodes: &[GraphNode]) -> Vec<String> {
    let mut shape: Vec<String> = nodes
        .iter()
        .map(|node| {
            let mut outputs: Vec<String> =
                node.output_values.iter().map(|o| o.to_string()).collect();
            outputs.sort();
            let mut inputs: Vec<String> =
                node.input_values.iter().map(|i| i.to_string()).collect();
            inputs.sort();
            format!(
                "{}@{} <- [{}] -> [{}]",
                node.producer,
                node.target,
                inputs.join(", "),
                outputs.join(", ")
            )
        })
        .collect();
    shape.sort();
    shape
}

#[test]
fn two_node_chain_wires_and_terminates() {
    let assembler = GraphAssembler::new();

    let (leaf, inner) = chain("ABC");
    assembler.resolved(&NullContext, requirement("Raw", "ABC"), leaf, None);
    assembler.resolved(&NullContext, requirement("Derived", "ABC"), inner, None);

    let nodes = assembler.graph_nodes();
    assert_eq!(nodes.len(), 2);
    assert_no_dangling_edges(&nodes);
    assert_acyclic(&nodes);

    let derived_node = nodes
        .iter()
        .find(|n| n.output_values.contains(&spec("Derived", "ABC")))
        .expect("derived node");
    let raw_node = nodes
        .iter()
        .find(|n| n.output_values.contains(&spec("Raw", "ABC")))
        .expect("raw node");
    assert!(derived_node.input_nodes.contains(&raw_node.id));

    let terminals = assembler.terminal_values();
    assert_eq!(terminals.get(&requirement("Raw", "ABC")), Some(&spec("Raw", "ABC")));
    assert_eq!(
        terminals.get(&requirement("Derived", "ABC")),
        Some(&spec("Derived", "ABC"))
    );
}

#[test]
fn re_resolution_changes_nothing() {
    let assembler = GraphAssembler::new();

    let (leaf, inner) = chain("ABC");
    assembler.resolved(&NullContext, requirement("Raw", "ABC"), leaf.clone(), None);
    assembler.resolved(&NullContext, requirement("Derived", "ABC"), inner.clone(), None);
    let before_nodes = graph_shape(&assembler.graph_nodes());
    let before_terminals = assembler.terminal_values();

    assembler.resolved(&NullContext, requirement("Raw", "ABC"), leaf, None);
    assembler.resolved(&NullContext, requirement("Derived", "ABC"), inner, None);

    assert_eq!(graph_shape(&assembler.graph_nodes()), before_nodes);
    assert_eq!(assembler.terminal_values(), before_terminals);
}

#[test]
fn concurrent_resolutions_match_the_sequential_graph() {
    let thread_count = 8;

    // Sequential reference build.
    let sequential = GraphAssembler::new();
    for index in 0..thread_count {
        let id = format!("SEC{}", index);
        let (leaf, inner) = chain(&id);
        sequential.resolved(&NullContext, requirement("Raw", &id), leaf, None);
        sequential.resolved(&NullContext, requirement("Derived", &id), inner, None);
    }

    // The same productions delivered from eight racing threads.
    let concurrent = Arc::new(GraphAssembler::new());
    let mut handles = Vec::new();
    for index in 0..thread_count {
        let engine = Arc::clone(&concurrent);
        handles.push(thread::spawn(move || {
            let id = format!("SEC{}", index);
            let (leaf, inner) = chain(&id);
            engine.resolved(&NullContext, requirement("Raw", &id), leaf, None);
            engine.resolved(&NullContext, requirement("Derived", &id), inner, None);
        }));
    }
    for handle in handles {
        handle.join().expect("worker thread");
    }

    let nodes = concurrent.graph_nodes();
    assert_eq!(nodes.len(), 2 * thread_count);
    assert_no_dangling_edges(&nodes);
    assert_acyclic(&nodes);
    assert_eq!(graph_shape(&nodes), graph_shape(&sequential.graph_nodes()));
    assert_eq!(concurrent.terminal_values(), sequential.terminal_values());
}

#[test]
fn queued_work_is_drained_by_whichever_thread_arrives() {
    // Entries left behind by earlier callers must be picked up by any
    // later resolution, even from a different thread.
    let assembler = Arc::new(GraphAssembler::new());

    let (leaf, inner) = chain("ABC");
    assembler.resolved(&NullContext, requirement("Raw", "ABC"), leaf, None);

    let engine = Arc::clone(&assembler);
    thread::spawn(move || {
        engine.resolved(&NullContext, requirement("Derived", "ABC"), inner, None);
    })
    .join()
    .expect("late thread");

    assert_eq!(assembler.graph_nodes().len(), 2);
}

#[test]
fn deep_chain_builds_through_the_buffer() {
    let assembler = GraphAssembler::new();

    // Pre-declare every level but the top; only the top-level production
    // arrives through the queue, pulling the rest in recursively.
    let depth = 16;
    let mut below: Option<ValueSpec> = None;
    for level in 0..depth {
        let this = spec(&format!("Level{}", level), "ABC");
        let production = match below.take() {
            None => Production::leaf(this.clone(), Producer::plain("feed")),
            Some(input) => Production::new(
                this.clone(),
                Producer::plain(format!("calc{}", level)),
                IndexSet::from([input]),
                IndexSet::from([this.clone()]),
            ),
        };
        if level + 1 < depth {
            assembler.declare_production(production);
        } else {
            assembler.resolved(
                &NullContext,
                requirement(&format!("Level{}", level), "ABC"),
                production,
                None,
            );
        }
        below = Some(this);
    }

    let nodes = assembler.graph_nodes();
    assert_eq!(nodes.len(), depth);
    assert_no_dangling_edges(&nodes);
    assert_acyclic(&nodes);

    let terminals = assembler.terminal_values();
    assert_eq!(
        terminals.get(&requirement(&format!("Level{}", depth - 1), "ABC")),
        Some(&spec(&format!("Level{}", depth - 1), "ABC"))
    );
}

#[test]
fn shared_input_is_reused_not_duplicated() {
    let assembler = GraphAssembler::new();

    let raw = spec("Raw", "ABC");
    assembler.resolved(
        &NullContext,
        requirement("Raw", "ABC"),
        Production::leaf(raw.clone(), Producer::plain("feed")),
        None,
    );
    for name in ["Mean", "Variance"] {
        let out = spec(name, "ABC");
        assembler.resolved(
            &NullContext,
            requirement(name, "ABC"),
            Production::new(
                out.clone(),
                Producer::plain(name.to_lowercase()),
                IndexSet::from([raw.clone()]),
                IndexSet::from([out.clone()]),
            ),
            None,
        );
    }

    let nodes = assembler.graph_nodes();
    assert_eq!(nodes.len(), 3);
    assert_no_dangling_edges(&nodes);

    let feed = nodes
        .iter()
        .find(|n| n.output_values.contains(&raw))
        .expect("feed node");
    assert!(feed.is_leaf());
    assert_eq!(feed.dependents.len(), 2);
}

#[test]
fn cyclic_productions_fail_the_path_only() {
    let assembler = GraphAssembler::new();

    // X needs Y, Y needs X; both pre-declared, X resolved.
    let sx = spec("X", "ABC");
    let sy = spec("Y", "ABC");
    let px = Production::new(
        sx.clone(),
        Producer::plain("fx"),
        IndexSet::from([sy.clone()]),
        IndexSet::from([sx.clone()]),
    );
    let py = Production::new(
        sy.clone(),
        Producer::plain("fy"),
        IndexSet::from([sx.clone()]),
        IndexSet::from([sy.clone()]),
    );
    assembler.declare_production(px.clone());
    assembler.declare_production(py.clone());
    assembler.resolved(&NullContext, requirement("X", "ABC"), px, None);

    assert!(assembler.graph_nodes().is_empty());
    assert!(assembler.terminal_values().is_empty());
    // Both buffered productions remain available to other call paths.
    assert_eq!(
        assembler.get_production(&sy).as_ref().map(Production::specification),
        Some(&sy)
    );
    assert_eq!(
        assembler.get_production(&sx).as_ref().map(Production::specification),
        Some(&sx)
    );

    // An unrelated chain still resolves afterwards.
    let (leaf, inner) = chain("XYZ");
    assembler.resolved(&NullContext, requirement("Raw", "XYZ"), leaf, None);
    assembler.resolved(&NullContext, requirement("Derived", "XYZ"), inner, None);
    assert_eq!(assembler.graph_nodes().len(), 2);
}

#[test]
fn snapshot_survives_serde_and_reimport() {
    let assembler = GraphAssembler::new();
    let (leaf, inner) = chain("ABC");
    assembler.resolved(&NullContext, requirement("Raw", "ABC"), leaf, None);
    assembler.resolved(&NullContext, requirement("Derived", "ABC"), inner, None);

    let snapshot = assembler.snapshot();
    let json = serde_json::to_string(&snapshot).expect("serialize snapshot");
    let restored = serde_json::from_str(&json).expect("deserialize snapshot");

    let seeded = GraphAssembler::new();
    seeded.populate_state(&restored);

    assert_eq!(
        graph_shape(&seeded.graph_nodes()),
        graph_shape(&assembler.graph_nodes())
    );
    assert_eq!(seeded.terminal_values(), assembler.terminal_values());
}
