//! Trellis Core
//!
//! This crate provides the core graph-construction engine for the Trellis
//! resolution framework. It implements:
//!
//! - Value identity types (specifications, requirements, productions)
//! - A handle-addressed dependency-graph store with reuse indices
//! - The concurrent assembly engine: a resolution queue drained by a
//!   single writer, recursive node wiring, output reconciliation, and
//!   optional target collapsing
//!
//! The crate is a pure in-memory engine: it decides nothing about *what*
//! to compute. An external resolver turns requirements into productions
//! and delivers them, from as many threads as it likes, via
//! [`assembler::GraphAssembler::resolved`]; the engine wires them into a
//! coherent node graph and exposes the structure and the terminal-output
//! mapping.
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - `value`: immutable descriptors of requested and produced values
//! - `graph`: the node arena, lookup indices, and snapshot types
//! - `assembler`: the engine itself, plus its collaborator traits
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::assembler::GraphAssembler;
//! use trellis_core::value::{Producer, Production, PropertySet, Requirement, Target, ValueSpec};
//!
//! let assembler = GraphAssembler::new();
//! let target = Target::new("security", "ABC");
//! let spec = ValueSpec::new("Price", target.clone(), PropertySet::none());
//! let requirement = Requirement::new("Price", target, PropertySet::none());
//!
//! // The resolver reports a completed production.
//! assembler.resolved(
//!     &context,
//!     requirement.clone(),
//!     Production::leaf(spec.clone(), Producer::plain("pricer")),
//!     None,
//! );
//!
//! assert_eq!(assembler.terminal_values()[&requirement], spec);
//! ```

pub mod assembler;
pub mod graph;
pub mod value;
