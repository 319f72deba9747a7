//! Graph Store
//!
//! The store owns every node in an arena and maintains the indices the
//! assembly algorithm works against:
//!
//! - `spec_to_node`: which committed node produces a given value
//! - `producer_buckets`: candidate nodes per (producer, target), used to
//!   find reusable peers before creating a new node
//! - `graph_nodes` / `leaf_nodes`: the committed graph and its leaves
//!
//! The store also provides the low-level surgery primitives (edge
//! wiring, output renames, consumer rewiring) that higher layers compose
//! into reconciliation and collapsing. None of these primitives are
//! synchronized; the caller serializes access (one coarse lock around all
//! structural mutation).
//!
//! Index invariant: every specification in `spec_to_node` is an output
//! value of exactly the node it maps to.

use std::collections::HashMap;

use indexmap::IndexSet;

use super::node::{DependencyNode, NodeId};
use crate::value::{Producer, Target, ValueSpec};

/// Arena of nodes plus the lookup indices over the committed graph.
#[derive(Debug, Default)]
pub struct GraphStore {
    /// All nodes ever created, indexed by handle. Slots are never freed;
    /// a collapsed-away node just drops out of the indices below.
    nodes: Vec<DependencyNode>,

    /// Output specification -> producing committed node.
    spec_to_node: HashMap<ValueSpec, NodeId>,

    /// (producer, target) -> candidate nodes for reuse.
    producer_buckets: HashMap<Producer, HashMap<Target, IndexSet<NodeId>>>,

    /// All committed graph nodes.
    graph_nodes: IndexSet<NodeId>,

    /// Committed nodes with no inputs.
    leaf_nodes: IndexSet<NodeId>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the arena, returning its handle. The node is not yet
    /// part of the committed graph.
    pub fn insert(&mut self, node: DependencyNode) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut DependencyNode {
        &mut self.nodes[id.index()]
    }

    // -----------------------------------------------------------------
    // Specification index
    // -----------------------------------------------------------------

    pub fn lookup(&self, spec: &ValueSpec) -> Option<NodeId> {
        self.spec_to_node.get(spec).copied()
    }

    pub(crate) fn index_output(&mut self, spec: ValueSpec, id: NodeId) {
        self.spec_to_node.insert(spec, id);
    }

    pub(crate) fn unindex_output(&mut self, spec: &ValueSpec) -> Option<NodeId> {
        self.spec_to_node.remove(spec)
    }

    // -----------------------------------------------------------------
    // Producer buckets
    // -----------------------------------------------------------------

    /// Candidate nodes registered under `(producer, target)`.
    pub(crate) fn bucket(&self, producer: &Producer, target: &Target) -> Vec<NodeId> {
        self.producer_buckets
            .get(producer)
            .and_then(|targets| targets.get(target))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn bucket_insert(&mut self, producer: &Producer, target: &Target, id: NodeId) {
        self.producer_buckets
            .entry(producer.clone())
            .or_default()
            .entry(target.clone())
            .or_default()
            .insert(id);
    }

    /// Remove a node from every bucket of its producer. Used when the node
    /// is collapsed away; the bucket it was registered under may differ
    /// from its current target.
    pub(crate) fn bucket_remove(&mut self, producer: &Producer, id: NodeId) {
        if let Some(targets) = self.producer_buckets.get_mut(producer) {
            for ids in targets.values_mut() {
                ids.shift_remove(&id);
            }
        }
    }

    // -----------------------------------------------------------------
    // Committed graph membership
    // -----------------------------------------------------------------

    pub fn graph_nodes(&self) -> &IndexSet<NodeId> {
        &self.graph_nodes
    }

    pub fn leaf_nodes(&self) -> &IndexSet<NodeId> {
        &self.leaf_nodes
    }

    pub(crate) fn register_graph_node(&mut self, id: NodeId) {
        self.graph_nodes.insert(id);
        if self.node(id).is_leaf() {
            self.leaf_nodes.insert(id);
        }
    }

    pub(crate) fn unregister_graph_node(&mut self, id: NodeId) {
        self.graph_nodes.shift_remove(&id);
        self.leaf_nodes.shift_remove(&id);
    }

    // -----------------------------------------------------------------
    // Surgery primitives
    // -----------------------------------------------------------------

    /// Wire `producer_node` as an input of `consumer`, both directions.
    pub(crate) fn add_edge(&mut self, consumer: NodeId, producer_node: NodeId) {
        self.node_mut(consumer).add_input_node(producer_node);
        self.node_mut(producer_node).add_dependent(consumer);
    }

    /// Number of dependents of `id` that actually consume `spec`.
    pub(crate) fn consumer_count(&self, id: NodeId, spec: &ValueSpec) -> usize {
        self.node(id)
            .dependents()
            .iter()
            .filter(|dep| self.node(**dep).has_input_value(spec))
            .count()
    }

    /// Rename an output of `id` and rewrite every consumer's matching
    /// input value, returning how many consumers were switched over.
    pub(crate) fn replace_output_value(
        &mut self,
        id: NodeId,
        old: &ValueSpec,
        new: &ValueSpec,
    ) -> usize {
        self.node_mut(id).rename_output_value(old, new.clone());
        let dependents: Vec<NodeId> = self.node(id).dependents().iter().copied().collect();
        let mut switched = 0;
        for dep in dependents {
            if self.node_mut(dep).replace_input_value(old, new.clone()) {
                switched += 1;
            }
        }
        switched
    }

    /// Move every consumer of `spec` from node `from` to node `to`,
    /// dropping the old edge when the consumer reads nothing else from
    /// `from`.
    pub(crate) fn rewire_consumers(&mut self, spec: &ValueSpec, from: NodeId, to: NodeId) {
        let dependents: Vec<NodeId> = self.node(from).dependents().iter().copied().collect();
        for dep in dependents {
            if !self.node(dep).has_input_value(spec) {
                continue;
            }
            let reads_other = self
                .node(from)
                .output_values()
                .iter()
                .any(|out| out != spec && self.node(dep).has_input_value(out));
            if !reads_other {
                self.node_mut(from).remove_dependent(dep);
                self.node_mut(dep).remove_input_node(from);
            }
            self.add_edge(dep, to);
        }
    }
}
