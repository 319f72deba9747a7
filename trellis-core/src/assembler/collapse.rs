//! Node collapsing.
//!
//! A collapsing policy can fold two nodes running the same producer on
//! compatible targets into a single node, typically turning many
//! per-item computations into one batched computation over a merged
//! target. The policy itself is an external collaborator; this module
//! implements the peer search and the graph surgery around its verdict.
//!
//! Merging rewrites every reference to the losing node atomically under
//! the engine lock: its outputs are re-homed onto the winner's target and
//! re-indexed, consumers' input values and edges follow, input edges are
//! transferred, and the loser drops out of the committed graph. A policy
//! that declines simply leaves both nodes independent.

use tracing::debug;

use super::state::BuildState;
use crate::graph::{DependencyNode, NodeId};
use crate::value::{Producer, Target, ValueSpec};

/// Policy deciding whether nodes on two targets may be merged, and onto
/// which target the merged node runs.
pub trait TargetCollapser: Send + Sync {
    /// Whether this policy has an opinion about the given target at all.
    fn can_apply(&self, target: &Target) -> bool;

    /// The merged target for two collapsible ones, or `None` to decline.
    /// May return either input target or a brand-new one.
    fn collapse(&self, producer: &Producer, a: &Target, b: &Target) -> Option<Target>;
}

impl BuildState {
    /// Try to merge a freshly committed node with a compatible peer.
    ///
    /// Peers share the producer and target kind; a leaf candidate is
    /// sought among the leaves, a non-leaf candidate among the dependents
    /// of its input nodes, and must consume exactly the same input nodes.
    /// Returns the surviving node, or `node` itself when nothing merged.
    pub(crate) fn collapse_node(&mut self, node: NodeId, collapser: &dyn TargetCollapser) -> NodeId {
        let inputs = self.store.node(node).input_nodes().clone();
        let candidates: Vec<NodeId> = if inputs.is_empty() {
            self.store.leaf_nodes().iter().copied().collect()
        } else {
            let mut peers = Vec::new();
            for input in &inputs {
                for dependent in self.store.node(*input).dependents() {
                    if !peers.contains(dependent) {
                        peers.push(*dependent);
                    }
                }
            }
            peers
        };
        for peer in candidates {
            if peer == node {
                continue;
            }
            if self.store.node(peer).producer() != self.store.node(node).producer() {
                continue;
            }
            if self.store.node(peer).target().kind() != self.store.node(node).target().kind() {
                continue;
            }
            if self.store.node(peer).input_nodes() != &inputs {
                continue;
            }
            if let Some(result) = self.collapse_pair(node, peer, collapser) {
                return result;
            }
        }
        node
    }

    /// Ask the policy about one candidate pair and perform the merge it
    /// prescribes. `None` means the policy declined this pair.
    fn collapse_pair(
        &mut self,
        node: NodeId,
        peer: NodeId,
        collapser: &dyn TargetCollapser,
    ) -> Option<NodeId> {
        let producer = self.store.node(node).producer().clone();
        let collapsed = collapser.collapse(
            &producer,
            self.store.node(peer).target(),
            self.store.node(node).target(),
        )?;
        if collapsed == *self.store.node(peer).target() {
            debug!(
                "collapsing new node {} into existing node {}",
                self.store.node(node),
                self.store.node(peer)
            );
            self.merge_into(node, peer);
            Some(peer)
        } else if collapsed == *self.store.node(node).target() {
            debug!(
                "collapsing existing node {} into new node {}",
                self.store.node(peer),
                self.store.node(node)
            );
            self.merge_into(peer, node);
            Some(node)
        } else {
            debug!(
                "collapsing {} and {} into new target {}",
                self.store.node(node),
                self.store.node(peer),
                collapsed
            );
            let fresh = self
                .store
                .insert(DependencyNode::new(collapsed, producer, Default::default()));
            self.merge_into(peer, fresh);
            self.merge_into(node, fresh);
            self.store.register_graph_node(fresh);
            Some(fresh)
        }
    }

    /// Fold `loser` into `winner`, rewriting every reference.
    fn merge_into(&mut self, loser: NodeId, winner: NodeId) {
        let winner_target = self.store.node(winner).target().clone();
        let loser_producer = self.store.node(loser).producer().clone();

        // Outputs move across, re-homed onto the winner's target; the
        // index and terminal map follow, and consumers keep reading the
        // value under its new identity.
        let loser_outputs: Vec<ValueSpec> =
            self.store.node(loser).output_values().iter().cloned().collect();
        for output in loser_outputs {
            let rewritten = if *output.target() == winner_target {
                output.clone()
            } else {
                output.with_target(winner_target.clone())
            };
            self.store.node_mut(winner).add_output_value(rewritten.clone());
            self.store.unindex_output(&output);
            self.store.index_output(rewritten.clone(), winner);
            if rewritten != output {
                let consumers: Vec<NodeId> =
                    self.store.node(loser).dependents().iter().copied().collect();
                for consumer in consumers {
                    self.store
                        .node_mut(consumer)
                        .replace_input_value(&output, rewritten.clone());
                }
                self.retarget_terminal(&output, &rewritten);
            }
        }

        // Input edges transfer to the winner.
        let loser_inputs: Vec<NodeId> =
            self.store.node(loser).input_nodes().iter().copied().collect();
        let loser_input_values: Vec<ValueSpec> =
            self.store.node(loser).input_values().iter().cloned().collect();
        for input in loser_inputs {
            self.store.node_mut(input).remove_dependent(loser);
            self.store.add_edge(winner, input);
        }
        for value in loser_input_values {
            self.store.node_mut(winner).add_input_value(value);
        }

        // Consumers re-attach to the winner.
        let dependents: Vec<NodeId> =
            self.store.node(loser).dependents().iter().copied().collect();
        for dependent in dependents {
            self.store.node_mut(dependent).remove_input_node(loser);
            self.store.add_edge(dependent, winner);
        }

        self.store.node_mut(loser).clear_inputs();
        self.store.node_mut(loser).clear_outputs();
        self.store.node_mut(loser).clear_dependents();
        self.store.unregister_graph_node(loser);
        self.store.bucket_remove(&loser_producer, loser);
    }
}
