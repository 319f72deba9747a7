//! Graph Nodes
//!
//! This module defines the vertex type of the dependency graph. A node is
//! a unit of computation: one producer run against one target, consuming
//! a set of input values from other nodes and yielding a set of output
//! values.
//!
//! Nodes are owned by the arena in [`crate::graph::GraphStore`] and are
//! referred to by [`NodeId`] handles everywhere, including the reverse
//! (dependent) edges. Handle-based back-edges make graph surgery (output
//! renames, consumer rewiring, node collapsing) a matter of rewriting id
//! sets rather than patching pointers.

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::value::{Producer, Target, ValueSpec};

/// Stable handle to a node in the graph arena.
///
/// Handles are never reused within a session; a node that loses a collapse
/// simply becomes unreachable from every index while keeping its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the raw ID value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A vertex in the dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// The computation target this node runs against.
    target: Target,

    /// The producer that computes this node.
    producer: Producer,

    /// Input values consumed by this node. Each resolves to exactly one
    /// node in `input_nodes` once the node is committed.
    input_values: IndexSet<ValueSpec>,

    /// Nodes this node reads from (parents in the DAG).
    input_nodes: IndexSet<NodeId>,

    /// Values this node yields. Never empty while the node is reachable
    /// from the index.
    output_values: IndexSet<ValueSpec>,

    /// Nodes that read from this node (children in the DAG).
    dependents: IndexSet<NodeId>,
}

impl DependencyNode {
    /// Create a new unwired node with its declared outputs.
    pub fn new(target: Target, producer: Producer, output_values: IndexSet<ValueSpec>) -> Self {
        Self {
            target,
            producer,
            input_values: IndexSet::new(),
            input_nodes: IndexSet::new(),
            output_values,
            dependents: IndexSet::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn input_values(&self) -> &IndexSet<ValueSpec> {
        &self.input_values
    }

    pub fn input_nodes(&self) -> &IndexSet<NodeId> {
        &self.input_nodes
    }

    pub fn output_values(&self) -> &IndexSet<ValueSpec> {
        &self.output_values
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// A node with no inputs is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.input_nodes.is_empty()
    }

    pub fn has_input_value(&self, value: &ValueSpec) -> bool {
        self.input_values.contains(value)
    }

    pub(crate) fn add_input_value(&mut self, value: ValueSpec) {
        self.input_values.insert(value);
    }

    pub(crate) fn add_input_node(&mut self, node: NodeId) {
        self.input_nodes.insert(node);
    }

    pub(crate) fn remove_input_node(&mut self, node: NodeId) {
        self.input_nodes.shift_remove(&node);
    }

    pub(crate) fn add_output_value(&mut self, value: ValueSpec) {
        self.output_values.insert(value);
    }

    pub(crate) fn remove_output_value(&mut self, value: &ValueSpec) {
        self.output_values.shift_remove(value);
    }

    pub(crate) fn add_dependent(&mut self, node: NodeId) {
        self.dependents.insert(node);
    }

    pub(crate) fn remove_dependent(&mut self, node: NodeId) {
        self.dependents.shift_remove(&node);
    }

    pub(crate) fn replace_input_value(&mut self, old: &ValueSpec, new: ValueSpec) -> bool {
        if self.input_values.shift_remove(old) {
            self.input_values.insert(new);
            true
        } else {
            false
        }
    }

    pub(crate) fn rename_output_value(&mut self, old: &ValueSpec, new: ValueSpec) -> bool {
        if self.output_values.shift_remove(old) {
            self.output_values.insert(new);
            true
        } else {
            false
        }
    }

    pub(crate) fn clear_inputs(&mut self) {
        self.input_values.clear();
        self.input_nodes.clear();
    }

    pub(crate) fn clear_outputs(&mut self) {
        self.output_values.clear();
    }

    pub(crate) fn clear_dependents(&mut self) {
        self.dependents.clear();
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} ({} in, {} out)",
            self.producer,
            self.target,
            self.input_values.len(),
            self.output_values.len()
        )
    }
}
