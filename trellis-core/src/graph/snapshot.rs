//! Graph exchange types.
//!
//! [`GraphNode`] is a by-value copy of a committed node; [`DependencyGraph`]
//! bundles a set of such nodes with the terminal-output map. Together they
//! form the exchange format for the point-in-time queries and for seeding
//! an engine from a previously computed partial graph.
//!
//! Node references inside a snapshot are the [`NodeId`] handles of the
//! session that produced it; an importing engine re-homes them onto fresh
//! handles of its own.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::node::NodeId;
use crate::value::{Producer, Requirement, Target, ValueSpec};

/// A by-value copy of one committed graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub target: Target,
    pub producer: Producer,
    pub input_values: IndexSet<ValueSpec>,
    pub input_nodes: Vec<NodeId>,
    pub output_values: IndexSet<ValueSpec>,
    pub dependents: Vec<NodeId>,
}

impl GraphNode {
    pub fn is_leaf(&self) -> bool {
        self.input_nodes.is_empty()
    }
}

/// A self-contained copy of a dependency graph: nodes plus the mapping
/// from terminal output specifications to the requirements they answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub terminal_outputs: Vec<(ValueSpec, Vec<Requirement>)>,
}

impl DependencyGraph {
    pub fn new(nodes: Vec<GraphNode>, terminal_outputs: Vec<(ValueSpec, Vec<Requirement>)>) -> Self {
        Self {
            nodes,
            terminal_outputs,
        }
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|node| node.id == id)
    }
}
