//! Value identity types.
//!
//! A [`ValueSpec`] names a value that is actually produced: what it is
//! called, which target it is computed on, and the concrete properties it
//! carries. A [`Requirement`] names a value that was asked for, with a
//! constraint pattern instead of concrete properties.
//!
//! Both are immutable with structural equality; they are used as keys
//! throughout the graph indices.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::properties::PropertySet;

/// The computation target a value belongs to.
///
/// Targets have a kind (security, position, portfolio, ...) and an
/// identifier within that kind. Node collapsing only ever merges targets
/// of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    kind: String,
    id: String,
}

impl Target {
    pub fn new<K: Into<String>, I: Into<String>>(kind: K, id: I) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.kind, self.id)
    }
}

/// Identity of a produced value: name, target, and concrete properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueSpec {
    name: String,
    target: Target,
    properties: PropertySet,
}

impl ValueSpec {
    pub fn new<N: Into<String>>(name: N, target: Target, properties: PropertySet) -> Self {
        Self {
            name: name.into(),
            target,
            properties,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// The same value identity re-homed onto another target.
    ///
    /// Used when the node that ends up producing a value sits on a
    /// different (collapsed) target than the one the value was declared
    /// against.
    pub fn with_target(&self, target: Target) -> ValueSpec {
        ValueSpec {
            name: self.name.clone(),
            target,
            properties: self.properties.clone(),
        }
    }
}

impl fmt::Display for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]{}", self.name, self.target, self.properties)
    }
}

/// Identity of a requested value: name, target, and a constraint pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requirement {
    name: String,
    target: Target,
    constraints: PropertySet,
}

impl Requirement {
    pub fn new<N: Into<String>>(name: N, target: Target, constraints: PropertySet) -> Self {
        Self {
            name: name.into(),
            target,
            constraints,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn constraints(&self) -> &PropertySet {
        &self.constraints
    }

    /// Whether a produced value answers this requirement.
    ///
    /// Checks the name and the constraint pattern. The target is left out
    /// on purpose: the producing node may sit on a collapsed target that
    /// subsumes the requested one.
    pub fn is_satisfied_by(&self, spec: &ValueSpec) -> bool {
        self.name == spec.name() && self.constraints.is_satisfied_by(spec.properties())
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?[{}]{}", self.name, self.target, self.constraints)
    }
}
