//! Property sets attached to produced values.
//!
//! A [`PropertySet`] describes the concrete properties of a produced value,
//! or, when used as a constraint pattern, the properties a value must
//! carry to be acceptable. The same type serves both roles:
//!
//! - A producer advertises `{currency: {USD}}` on its output.
//! - A consumer asks for `{currency: {USD, EUR}}` and is satisfied by the
//!   producer, because the producer's values are a subset of what the
//!   consumer allows.
//!
//! An entry with an *empty* value set is a wildcard: the property is
//! defined, and any value is acceptable (pattern side) or producible
//! (value side). An absent entry places no constraint at all.
//!
//! Satisfaction and composition are the two operations the graph engine
//! needs to decide whether two outputs can be reconciled into one, and
//! what the reconciled (more specific) output looks like.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// An immutable set of named properties.
///
/// Properties are held in ordered maps so that equality, hashing, and
/// display are all deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertySet {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl PropertySet {
    /// The empty property set: no properties defined, satisfied trivially.
    pub fn none() -> Self {
        Self::default()
    }

    /// Add a property with an explicit set of values.
    pub fn define<N, V, I>(mut self, name: N, values: I) -> Self
    where
        N: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = V>,
    {
        self.entries
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Add a wildcard property: defined, any value.
    pub fn define_any<N: Into<String>>(mut self, name: N) -> Self {
        self.entries.insert(name.into(), BTreeSet::new());
        self
    }

    /// True if no properties are defined.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The values of a property, if defined. An empty set is a wildcard.
    pub fn values(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(name)
    }

    /// Iterate over `(name, values)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Tests whether this pattern is satisfied by `other`.
    ///
    /// Every property defined here must be defined by `other`. A wildcard
    /// entry on either side matches any definition; otherwise `other`'s
    /// values must be a subset of this pattern's values. Properties that
    /// only `other` defines are ignored.
    pub fn is_satisfied_by(&self, other: &PropertySet) -> bool {
        for (name, allowed) in &self.entries {
            let Some(values) = other.entries.get(name) else {
                return false;
            };
            if allowed.is_empty() || values.is_empty() {
                continue;
            }
            if !values.is_subset(allowed) {
                return false;
            }
        }
        true
    }

    /// Composes two property sets into their most specific combination.
    ///
    /// The result defines the union of both key sets. On keys both sides
    /// define, a wildcard defers to the concrete side and two concrete
    /// sides intersect. Callers compose sets that already satisfy one
    /// another, so shared concrete entries always intersect non-trivially.
    pub fn compose(&self, other: &PropertySet) -> PropertySet {
        let mut entries = BTreeMap::new();
        for (name, values) in &self.entries {
            let composed = match other.entries.get(name) {
                Some(theirs) if values.is_empty() => theirs.clone(),
                Some(theirs) if theirs.is_empty() => values.clone(),
                Some(theirs) => values.intersection(theirs).cloned().collect(),
                None => values.clone(),
            };
            entries.insert(name.clone(), composed);
        }
        for (name, values) in &other.entries {
            entries
                .entry(name.clone())
                .or_insert_with(|| values.clone());
        }
        PropertySet { entries }
    }
}

impl fmt::Display for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (name, values) in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            if values.is_empty() {
                write!(f, "{}=*", name)?;
            } else {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                write!(f, "{}={}", name, joined.join("|"))?;
            }
        }
        write!(f, "}}")
    }
}
