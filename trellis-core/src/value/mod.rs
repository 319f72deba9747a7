//! Value Identity
//!
//! This module defines the immutable descriptors the engine works in terms
//! of: property sets, produced-value specifications, requested-value
//! requirements, and resolved productions.

mod production;
mod properties;
mod spec;

pub use production::{Producer, Production};
pub use properties::PropertySet;
pub use spec::{Requirement, Target, ValueSpec};
