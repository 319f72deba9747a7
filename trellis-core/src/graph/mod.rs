//! Dependency Graph
//!
//! This module implements the storage layer of the dependency graph: the
//! node arena, the lookup indices over committed nodes, and the snapshot
//! types used to copy a graph out of (or into) a running engine.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena and are addressed by stable [`NodeId`]
//!    handles. Reverse (dependent) edges are sets of handles, never
//!    back-pointers, so collapsing and rewiring reduce to id-set edits.
//!
//! 2. The store keeps both forward (inputs) and reverse (dependents)
//!    edges, because reconciliation needs to walk consumers as often as
//!    producers.
//!
//! 3. The store itself is unsynchronized; the assembly layer serializes
//!    every structural mutation behind one lock.

mod node;
mod snapshot;
mod store;

pub use node::{DependencyNode, NodeId};
pub use snapshot::{DependencyGraph, GraphNode};
pub use store::GraphStore;
