//! Build state and the graph assembly algorithm.
//!
//! Everything in this module runs under the engine's single structural
//! lock; the owning [`GraphAssembler`](super::GraphAssembler) guarantees
//! at most one thread is in here at a time.
//!
//! The central routine is [`BuildState::get_or_create_node`]: given a
//! resolved production, return the committed node that produces its
//! specification, creating and wiring one (recursively, through the
//! production buffer) when the graph does not have it yet. Dead ends
//! (a cyclic production, an input with neither a committed node nor a
//! buffered production) abort the branch by returning `None`; nothing
//! partially wired is ever committed.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::{debug, error, warn};

use super::collapse::TargetCollapser;
use crate::graph::{DependencyGraph, DependencyNode, GraphNode, GraphStore, NodeId};
use crate::value::{Production, Requirement, Target, ValueSpec};

/// Shared collaborators the assembly algorithm reads while wiring.
pub(crate) struct WireContext<'a> {
    /// Productions declared ahead of time, keyed by specification.
    pub(crate) buffer: &'a DashMap<ValueSpec, Production>,
    /// Optional policy for merging nodes on compatible targets.
    pub(crate) collapser: Option<&'a dyn TargetCollapser>,
}

/// The mutable graph-construction state behind the engine lock.
#[derive(Debug, Default)]
pub(crate) struct BuildState {
    pub(crate) store: GraphStore,
    /// Terminal output specification -> requirements it answers.
    pub(crate) terminals: HashMap<ValueSpec, Vec<Requirement>>,
}

impl BuildState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Process one completed resolution from the queue: wire the
    /// production into the graph and record the terminal mapping.
    pub(crate) fn process(
        &mut self,
        requirement: Requirement,
        production: Production,
        ctx: &WireContext<'_>,
    ) {
        let downstream = HashSet::new();
        let Some(node) = self.get_or_create_node(&production, &downstream, ctx) else {
            error!(
                "resolved {} to {} but couldn't construct a graph node",
                requirement,
                production.specification()
            );
            return;
        };
        let node_target = self.store.node(node).target().clone();
        let spec = production.specification();
        let output = if *spec.target() == node_target {
            spec.clone()
        } else {
            spec.with_target(node_target)
        };
        let terminal = if self.store.node(node).output_values().contains(&output) {
            output
        } else {
            // Reconciliation composed the output away; find its refined form.
            let refined = self
                .store
                .node(node)
                .output_values()
                .iter()
                .find(|o| o.name() == output.name() && o.target() == output.target())
                .cloned();
            match refined {
                Some(refined) => refined,
                None => {
                    error!("no output of {} answers terminal {}", self.store.node(node), output);
                    return;
                }
            }
        };
        let requirements = self.terminals.entry(terminal).or_default();
        if !requirements.contains(&requirement) {
            requirements.push(requirement);
        }
    }

    /// Resolve a production to a committed node, creating one if needed.
    pub(crate) fn get_or_create_node(
        &mut self,
        production: &Production,
        downstream: &HashSet<ValueSpec>,
        ctx: &WireContext<'_>,
    ) -> Option<NodeId> {
        debug!("resolved {}", production.specification());
        if downstream.contains(production.specification()) {
            debug!(
                "already wiring a production of {} on this path",
                production.specification()
            );
            return None;
        }
        if let Some(existing) = self.store.lookup(production.specification()) {
            debug!("existing production of {} found in graph set", production.specification());
            return Some(existing);
        }
        let target = production.specification().target().clone();
        match self.find_existing_node(production, &target) {
            Some(existing) => self.wire_node(production, downstream, existing, false, ctx),
            None => {
                let node = self.store.insert(DependencyNode::new(
                    target.clone(),
                    production.producer().clone(),
                    production.outputs().clone(),
                ));
                let committed = self.wire_node(production, downstream, node, true, ctx)?;
                self.store.bucket_insert(production.producer(), &target, committed);
                Some(committed)
            }
        }
    }

    /// Wire the production's inputs into `node` and, for a new node,
    /// commit it: index outputs, attempt collapsing, register, and drop
    /// the production from the buffer.
    fn wire_node(
        &mut self,
        production: &Production,
        downstream: &HashSet<ValueSpec>,
        node: NodeId,
        new_node: bool,
        ctx: &WireContext<'_>,
    ) -> Option<NodeId> {
        let mut resolved_inputs: Vec<(ValueSpec, NodeId)> =
            Vec::with_capacity(production.inputs().len());
        let mut extended_downstream: Option<HashSet<ValueSpec>> = None;
        for input in production.inputs() {
            if let Some(existing) = self.store.lookup(input) {
                debug!("found node {} for input {}", existing, input);
                resolved_inputs.push((input.clone(), existing));
                continue;
            }
            debug!("finding node production for {}", input);
            let Some(buffered) = ctx.buffer.get(input).map(|entry| entry.value().clone()) else {
                warn!("no registered production for {}", input);
                return None;
            };
            let extended = extended_downstream.get_or_insert_with(|| {
                let mut copy = downstream.clone();
                copy.insert(production.specification().clone());
                copy
            });
            let Some(input_node) = self.get_or_create_node(&buffered, extended, ctx) else {
                warn!("no node production for {}", buffered);
                return None;
            };
            let actual_target = self.store.node(input_node).target().clone();
            let value = if *input.target() == actual_target {
                input.clone()
            } else {
                // The producing node is a substitute following a target
                // collapse; re-home the input value onto it.
                let substitute = input.with_target(actual_target);
                debug_assert!(self
                    .store
                    .node(input_node)
                    .output_values()
                    .contains(&substitute));
                substitute
            };
            resolved_inputs.push((value, input_node));
        }
        // Every input resolved; only now does the node gain edges.
        for (value, input_node) in resolved_inputs {
            self.store.node_mut(node).add_input_value(value);
            self.store.add_edge(node, input_node);
        }
        if !new_node {
            return Some(node);
        }
        debug!("adding {} to graph set", self.store.node(node));
        let outputs: Vec<ValueSpec> = production.outputs().iter().cloned().collect();
        for output in outputs {
            if self.store.lookup(&output).is_none() {
                self.store.index_output(output, node);
            } else {
                // Another committed node already produces this value;
                // keep the indexed one and drop ours.
                self.store.node_mut(node).remove_output_value(&output);
            }
        }
        let mut result = node;
        match ctx.collapser {
            Some(collapser) if collapser.can_apply(self.store.node(node).target()) => {
                let collapsed = self.collapse_node(node, collapser);
                if collapsed == node {
                    self.store.register_graph_node(node);
                } else {
                    debug!("rewrite after collapse to {}", self.store.node(collapsed));
                    result = collapsed;
                }
            }
            _ => self.store.register_graph_node(node),
        }
        ctx.buffer.remove(production.specification());
        Some(result)
    }

    /// Look for a committed node under the production's `(producer,
    /// target)` bucket whose outputs can be reconciled with the
    /// production's, composing properties where both sides name the same
    /// value.
    fn find_existing_node(&mut self, production: &Production, target: &Target) -> Option<NodeId> {
        let candidates = self.store.bucket(production.producer(), target);
        for candidate in candidates {
            if mismatch_union(self.store.node(candidate).output_values(), production.outputs()) {
                debug!("can't reuse {} for {}", self.store.node(candidate), production);
                continue;
            }
            debug!("considering {} for {}", self.store.node(candidate), production);
            let mut matched = false;
            let mut replacements: SmallVec<[(ValueSpec, ValueSpec); 2]> = SmallVec::new();
            let outputs = self.store.node(candidate).output_values();
            for output in production.outputs() {
                if outputs.contains(output) {
                    matched = true;
                    continue;
                }
                for existing in outputs {
                    if existing.name() == output.name()
                        && existing.properties().is_satisfied_by(output.properties())
                    {
                        matched = true;
                        let composed = existing.properties().compose(output.properties());
                        if composed != *existing.properties() {
                            let replacement = ValueSpec::new(
                                existing.name(),
                                existing.target().clone(),
                                composed,
                            );
                            debug!("replacing {} with {} in reused node", existing, replacement);
                            replacements.push((existing.clone(), replacement));
                        }
                    }
                }
            }
            if !matched {
                continue;
            }
            for (old, new) in replacements {
                self.apply_output_replacement(candidate, &old, &new);
            }
            return Some(candidate);
        }
        None
    }

    /// Replace one output of `node` everywhere it is referenced: the
    /// node's own output set, its consumers' input values, the index, and
    /// the terminal map. When the composed value collides with a
    /// specification another node already produces, prefer whichever side
    /// keeps the larger number of active consumers; ties keep the
    /// already-indexed one. The losing side's consumers are rewired to
    /// the winner.
    fn apply_output_replacement(&mut self, node: NodeId, old: &ValueSpec, new: &ValueSpec) {
        let new_consumers = self.store.replace_output_value(node, old, new);
        let unindexed = self.store.unindex_output(old);
        debug_assert_eq!(unindexed, Some(node));
        self.retarget_terminal(old, new);
        match self.store.lookup(new) {
            None => self.store.index_output(new.clone(), node),
            Some(other) if other == node => {}
            Some(other) => {
                if new_consumers == 0 {
                    self.store.node_mut(node).remove_output_value(new);
                    return;
                }
                let existing_consumers = self.store.consumer_count(other, new);
                if existing_consumers == 0 {
                    self.store.node_mut(other).remove_output_value(new);
                    self.store.index_output(new.clone(), node);
                } else if new_consumers <= existing_consumers {
                    self.store.rewire_consumers(new, node, other);
                    self.store.node_mut(node).remove_output_value(new);
                } else {
                    self.store.rewire_consumers(new, other, node);
                    self.store.node_mut(other).remove_output_value(new);
                    self.store.index_output(new.clone(), node);
                }
            }
        }
    }

    /// Move terminal registrations from one specification to another,
    /// merging requirement lists.
    pub(crate) fn retarget_terminal(&mut self, old: &ValueSpec, new: &ValueSpec) {
        if old == new {
            return;
        }
        if let Some(requirements) = self.terminals.remove(old) {
            let entry = self.terminals.entry(new.clone()).or_default();
            for requirement in requirements {
                if !entry.contains(&requirement) {
                    entry.push(requirement);
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Bulk import and copy-out
    // -----------------------------------------------------------------

    /// Merge an externally built graph into the live indices.
    ///
    /// Imported node ids are local to the snapshot; each node is re-homed
    /// onto a fresh arena handle. A node whose recorded inputs cannot all
    /// be resolved within the import has its inputs cleared rather than
    /// being left half-connected; dependent references pointing outside
    /// the import are dropped.
    pub(crate) fn import(&mut self, graph: &DependencyGraph) {
        let mut id_map: HashMap<NodeId, NodeId> = HashMap::with_capacity(graph.nodes.len());
        for imported in &graph.nodes {
            let node = DependencyNode::new(
                imported.target.clone(),
                imported.producer.clone(),
                imported.output_values.clone(),
            );
            id_map.insert(imported.id, self.store.insert(node));
        }
        for imported in &graph.nodes {
            let me = id_map[&imported.id];
            let complete = imported
                .input_nodes
                .iter()
                .all(|input| id_map.contains_key(input));
            if complete {
                for input in &imported.input_nodes {
                    self.store.add_edge(me, id_map[input]);
                }
                for value in &imported.input_values {
                    self.store.node_mut(me).add_input_value(value.clone());
                }
            } else {
                debug!("pruning inputs of imported node {}", self.store.node(me));
            }
            let output_specs: Vec<ValueSpec> =
                imported.output_values.iter().cloned().collect();
            for output in output_specs {
                self.store.index_output(output, me);
            }
            self.store.bucket_insert(&imported.producer, &imported.target, me);
            self.store.register_graph_node(me);
        }
        for (spec, requirements) in &graph.terminal_outputs {
            let entry = self.terminals.entry(spec.clone()).or_default();
            for requirement in requirements {
                if !entry.contains(requirement) {
                    entry.push(requirement.clone());
                }
            }
        }
    }

    /// Copies of all committed nodes.
    pub(crate) fn export_nodes(&self) -> Vec<GraphNode> {
        self.store
            .graph_nodes()
            .iter()
            .map(|id| self.export_node(*id))
            .collect()
    }

    fn export_node(&self, id: NodeId) -> GraphNode {
        let node = self.store.node(id);
        GraphNode {
            id,
            target: node.target().clone(),
            producer: node.producer().clone(),
            input_values: node.input_values().clone(),
            input_nodes: node.input_nodes().iter().copied().collect(),
            output_values: node.output_values().clone(),
            dependents: node.dependents().iter().copied().collect(),
        }
    }

    /// The terminal map inverted into its query shape.
    pub(crate) fn terminal_values(&self) -> HashMap<Requirement, ValueSpec> {
        let mut result = HashMap::new();
        for (spec, requirements) in &self.terminals {
            for requirement in requirements {
                result.insert(requirement.clone(), spec.clone());
            }
        }
        result
    }

    /// The terminal map in its exchange shape, deterministically ordered.
    pub(crate) fn export_terminals(&self) -> Vec<(ValueSpec, Vec<Requirement>)> {
        let mut entries: Vec<(ValueSpec, Vec<Requirement>)> = self
            .terminals
            .iter()
            .map(|(spec, requirements)| (spec.clone(), requirements.clone()))
            .collect();
        entries.sort_by_key(|(spec, _)| spec.to_string());
        entries
    }
}

/// True when the two output sets cannot be composed: some value name
/// present in both has properties neither side can satisfy.
pub(crate) fn mismatch_union(a: &IndexSet<ValueSpec>, b: &IndexSet<ValueSpec>) -> bool {
    mismatch_union_impl(a, b) || mismatch_union_impl(b, a)
}

fn mismatch_union_impl(a: &IndexSet<ValueSpec>, b: &IndexSet<ValueSpec>) -> bool {
    'next_a: for sa in a {
        if b.contains(sa) {
            continue;
        }
        let mut mismatch = false;
        for sb in b {
            if sa.name() == sb.name() {
                if sa.properties().is_satisfied_by(sb.properties()) {
                    continue 'next_a;
                }
                mismatch = true;
            }
        }
        if mismatch {
            return true;
        }
    }
    false
}
