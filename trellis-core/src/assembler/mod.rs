//! Graph Assembly Engine
//!
//! The assembler receives completed resolutions from any number of
//! resolver threads and incrementally wires them into a dependency graph,
//! tracking which top-level requirements terminate at which graph
//! outputs.
//!
//! # How It Works
//!
//! 1. Resolver threads call [`GraphAssembler::resolved`] as productions
//!    complete. Each call enqueues the result and returns quickly.
//!
//! 2. Exactly one of the calling threads wins an atomic writer token and
//!    drains the queue, running the assembly algorithm for each entry:
//!    node reuse or creation, recursive input wiring through the
//!    production buffer, output reconciliation, and optional target
//!    collapsing.
//!
//! 3. When the graph is quiescent, [`GraphAssembler::graph_nodes`] and
//!    [`GraphAssembler::terminal_values`] copy the result out.
//!
//! # Thread Safety
//!
//! All structural state lives behind one `parking_lot::Mutex`, taken only
//! by the queue-draining thread, bulk import, and the read-side queries.
//! The writer token (compare-and-swap on an `AtomicBool`) guarantees at
//! most one drainer without ever blocking a producer thread: a thread
//! that loses the race leaves its entry on the queue and returns. The
//! production buffer is an independently synchronized map, so declaring
//! productions never contends with graph mutation.

mod collapse;
mod failure;
mod state;

pub use collapse::TargetCollapser;
pub use failure::{
    BuildFailure, FailureEvent, FailureVisitor, PumpHandle, ResolutionContext, ResolutionFailure,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::graph::{DependencyGraph, GraphNode};
use crate::value::{Production, Requirement, ValueSpec};
use state::{BuildState, WireContext};

/// The concurrent dependency-graph construction engine.
pub struct GraphAssembler {
    /// Productions declared ahead of time, keyed by their specification.
    /// Synchronized independently of the graph state.
    buffer: DashMap<ValueSpec, Production>,

    /// Completed resolutions not yet processed into the graph.
    queue: SegQueue<(Requirement, Production)>,

    /// Ownership token for the queue drain. Any thread may enqueue; only
    /// the thread holding this token processes entries and mutates the
    /// graph.
    writer_token: AtomicBool,

    /// All structural graph state, behind the single mutation lock.
    state: Mutex<BuildState>,

    /// Optional diagnostic visitor for resolution failures.
    failure_visitor: Option<Arc<dyn FailureVisitor>>,

    /// Optional policy for merging nodes on compatible targets.
    target_collapser: Option<Arc<dyn TargetCollapser>>,
}

impl GraphAssembler {
    pub fn new() -> Self {
        Self {
            buffer: DashMap::new(),
            queue: SegQueue::new(),
            writer_token: AtomicBool::new(false),
            state: Mutex::new(BuildState::new()),
            failure_visitor: None,
            target_collapser: None,
        }
    }

    /// Install or clear the failure visitor. Configure before sharing the
    /// assembler across threads.
    pub fn set_failure_visitor(&mut self, visitor: Option<Arc<dyn FailureVisitor>>) {
        self.failure_visitor = visitor;
    }

    /// Install or clear the target-collapsing policy. Configure before
    /// sharing the assembler across threads.
    pub fn set_target_collapser(&mut self, collapser: Option<Arc<dyn TargetCollapser>>) {
        self.target_collapser = collapser;
    }

    // -----------------------------------------------------------------
    // Production buffer
    // -----------------------------------------------------------------

    /// Store a production for later reuse by the assembly algorithm. It
    /// is consumed once committed into a node.
    pub fn declare_production(&self, production: Production) {
        self.buffer
            .insert(production.specification().clone(), production);
    }

    /// A production able to yield `spec`, if one is already known.
    ///
    /// Prefers the buffer; otherwise a production is synthesized from a
    /// committed node, but only when some other committed node actually
    /// consumes the specification. An output nobody reads may be a mere
    /// advisory left over from reconciliation and is not offered.
    pub fn get_production(&self, spec: &ValueSpec) -> Option<Production> {
        if let Some(buffered) = self.buffer.get(spec) {
            return Some(buffered.value().clone());
        }
        let state = self.state.lock();
        let id = state.store.lookup(spec)?;
        let node = state.store.node(id);
        let consumed = node
            .dependents()
            .iter()
            .any(|dependent| state.store.node(*dependent).has_input_value(spec));
        if !consumed {
            return None;
        }
        Some(Production::new(
            spec.clone(),
            node.producer().clone(),
            node.input_values().clone(),
            node.output_values().clone(),
        ))
    }

    // -----------------------------------------------------------------
    // Resolver callbacks
    // -----------------------------------------------------------------

    /// Report a successful resolution of a top-level requirement.
    ///
    /// Safe to call from any thread. The pump token, when present, is
    /// released through the context first so the external search can
    /// continue scanning. The pair is enqueued and the calling thread
    /// then either becomes the (sole) graph writer and drains the queue,
    /// or returns immediately because another thread already is.
    pub fn resolved(
        &self,
        context: &dyn ResolutionContext,
        requirement: Requirement,
        production: Production,
        pump: Option<PumpHandle>,
    ) {
        info!("resolved {} to {}", requirement, production.specification());
        if let Some(pump) = pump {
            context.release_pump(pump);
        }
        self.queue.push((requirement, production));
        self.drain();
    }

    /// Report a requirement the resolver could not satisfy at all.
    ///
    /// Logs, routes any failure detail through the configured visitor,
    /// and pushes a structured condition into the context. Never panics
    /// inside the callback.
    pub fn failed(
        &self,
        context: &dyn ResolutionContext,
        requirement: &Requirement,
        failure: Option<ResolutionFailure>,
    ) {
        error!("couldn't resolve {}", requirement);
        match failure {
            Some(failure) => {
                if let Some(visitor) = &self.failure_visitor {
                    visitor.visit(&failure);
                }
                context.report_failure(BuildFailure::Unsatisfiable {
                    requirement: requirement.clone(),
                    failure,
                });
            }
            None => {
                warn!("no failure state for {}", requirement);
                context.report_failure(BuildFailure::Unresolved {
                    requirement: requirement.clone(),
                });
            }
        }
    }

    /// Drain the resolution queue while holding the writer token.
    ///
    /// The token is re-checked against the queue after release: an entry
    /// pushed between the last pop and the token clearing would otherwise
    /// be stranded until the next `resolved` call.
    fn drain(&self) {
        while !self.queue.is_empty()
            && self
                .writer_token
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            {
                let mut state = self.state.lock();
                let ctx = WireContext {
                    buffer: &self.buffer,
                    collapser: self.target_collapser.as_deref(),
                };
                while let Some((requirement, production)) = self.queue.pop() {
                    state.process(requirement, production, &ctx);
                }
            }
            self.writer_token.store(false, Ordering::Release);
        }
    }

    // -----------------------------------------------------------------
    // Bulk import and queries
    // -----------------------------------------------------------------

    /// Merge an externally built graph into the live state, seeding
    /// further construction from a previously computed partial graph.
    pub fn populate_state(&self, graph: &DependencyGraph) {
        self.state.lock().import(graph);
    }

    /// Copies of all committed graph nodes. Call only when no `resolved`
    /// call is in flight; a concurrent drain makes the snapshot torn in
    /// time (each node is still internally consistent).
    pub fn graph_nodes(&self) -> Vec<GraphNode> {
        self.state.lock().export_nodes()
    }

    /// The requirement-to-specification map for everything resolved so
    /// far. Same quiescence expectation as [`GraphAssembler::graph_nodes`].
    pub fn terminal_values(&self) -> HashMap<Requirement, ValueSpec> {
        self.state.lock().terminal_values()
    }

    /// A self-contained copy of the committed graph and terminal map,
    /// suitable for [`GraphAssembler::populate_state`] on another engine.
    pub fn snapshot(&self) -> DependencyGraph {
        let state = self.state.lock();
        DependencyGraph::new(state.export_nodes(), state.export_terminals())
    }

    /// Log the sizes of the internal structures.
    pub fn report_state_size(&self) {
        let state = self.state.lock();
        info!(
            "graph = {} nodes for {} terminal outputs",
            state.store.graph_nodes().len(),
            state.terminals.len()
        );
        info!(
            "resolved buffer = {}, resolved queue = {}",
            self.buffer.len(),
            self.queue.len()
        );
    }
}

impl Default for GraphAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Producer, PropertySet, Target};
    use indexmap::IndexSet;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct RecordingContext {
        failures: PlMutex<Vec<BuildFailure>>,
        pumps: PlMutex<Vec<PumpHandle>>,
    }

    impl ResolutionContext for RecordingContext {
        fn report_failure(&self, failure: BuildFailure) {
            self.failures.lock().push(failure);
        }

        fn release_pump(&self, pump: PumpHandle) {
            self.pumps.lock().push(pump);
        }
    }

    struct RecordingVisitor {
        seen: PlMutex<Vec<Requirement>>,
    }

    impl FailureVisitor for RecordingVisitor {
        fn visit(&self, failure: &ResolutionFailure) {
            self.seen.lock().push(failure.requirement().clone());
        }
    }

    fn target(id: &str) -> Target {
        Target::new("security", id)
    }

    fn spec(name: &str) -> ValueSpec {
        ValueSpec::new(name, target("T"), PropertySet::none())
    }

    fn requirement(name: &str) -> Requirement {
        Requirement::new(name, target("T"), PropertySet::none())
    }

    #[test]
    fn resolved_builds_the_graph_and_releases_the_pump() {
        let assembler = GraphAssembler::new();
        let context = RecordingContext::default();

        let s1 = spec("X");
        let p1 = Production::leaf(s1.clone(), Producer::plain("source"));
        assembler.resolved(&context, requirement("X"), p1, Some(PumpHandle(9)));

        assert_eq!(*context.pumps.lock(), vec![PumpHandle(9)]);
        assert_eq!(assembler.graph_nodes().len(), 1);
        assert_eq!(assembler.terminal_values().get(&requirement("X")), Some(&s1));
    }

    #[test]
    fn get_production_prefers_the_buffer() {
        let assembler = GraphAssembler::new();
        let s1 = spec("X");
        let buffered = Production::leaf(s1.clone(), Producer::plain("source"));
        assembler.declare_production(buffered.clone());

        assert_eq!(assembler.get_production(&s1), Some(buffered));
    }

    #[test]
    fn get_production_synthesizes_only_consumed_outputs() {
        let assembler = GraphAssembler::new();
        let context = RecordingContext::default();

        let s1 = spec("X");
        let s2 = spec("Y");
        let p1 = Production::leaf(s1.clone(), Producer::plain("source"));
        let p2 = Production::new(
            s2.clone(),
            Producer::plain("derive"),
            IndexSet::from([s1.clone()]),
            IndexSet::from([s2.clone()]),
        );
        assembler.resolved(&context, requirement("X"), p1, None);
        assembler.resolved(&context, requirement("Y"), p2, None);

        // X is consumed by Y's node: a production can be synthesized.
        let synthesized = assembler.get_production(&s1).expect("consumed output");
        assert_eq!(synthesized.specification(), &s1);
        assert_eq!(synthesized.producer(), &Producer::plain("source"));

        // Y is consumed by nobody: no production is offered.
        assert_eq!(assembler.get_production(&s2), None);
    }

    #[test]
    fn failed_reports_unsatisfiable_through_the_visitor() {
        let visitor = Arc::new(RecordingVisitor {
            seen: PlMutex::new(Vec::new()),
        });
        let mut assembler = GraphAssembler::new();
        assembler.set_failure_visitor(Some(visitor.clone()));
        let context = RecordingContext::default();

        let detail = ResolutionFailure::new(requirement("X")).with_event(FailureEvent::NoProducers);
        assembler.failed(&context, &requirement("X"), Some(detail));

        assert_eq!(*visitor.seen.lock(), vec![requirement("X")]);
        let failures = context.failures.lock();
        assert!(matches!(failures[0], BuildFailure::Unsatisfiable { .. }));
    }

    #[test]
    fn failed_without_detail_reports_unresolved() {
        let assembler = GraphAssembler::new();
        let context = RecordingContext::default();

        assembler.failed(&context, &requirement("X"), None);

        let failures = context.failures.lock();
        assert_eq!(
            failures[0],
            BuildFailure::Unresolved {
                requirement: requirement("X")
            }
        );
    }

    #[test]
    fn snapshot_round_trips_through_populate_state() {
        let assembler = GraphAssembler::new();
        let context = RecordingContext::default();

        let s1 = spec("X");
        let s2 = spec("Y");
        assembler.resolved(
            &context,
            requirement("X"),
            Production::leaf(s1.clone(), Producer::plain("source")),
            None,
        );
        assembler.resolved(
            &context,
            requirement("Y"),
            Production::new(
                s2.clone(),
                Producer::plain("derive"),
                IndexSet::from([s1.clone()]),
                IndexSet::from([s2.clone()]),
            ),
            None,
        );

        let snapshot = assembler.snapshot();
        let seeded = GraphAssembler::new();
        seeded.populate_state(&snapshot);

        assert_eq!(seeded.graph_nodes().len(), 2);
        assert_eq!(seeded.terminal_values(), assembler.terminal_values());
        // The seeded engine reuses the imported node for new consumers.
        let s3 = spec("Z");
        seeded.resolved(
            &context,
            requirement("Z"),
            Production::new(
                s3.clone(),
                Producer::plain("extend"),
                IndexSet::from([s2.clone()]),
                IndexSet::from([s3.clone()]),
            ),
            None,
        );
        assert_eq!(seeded.graph_nodes().len(), 3);
    }

    #[test]
    fn report_state_size_is_quiet_about_content() {
        let assembler = GraphAssembler::new();
        // Emission only; nothing to assert beyond not panicking.
        assembler.report_state_size();
    }
}
