//! Resolved productions.
//!
//! A [`Production`] is the resolver's answer to a requirement: a binding
//! of a [`ValueSpec`] to the producer able to compute it, together with
//! the full input and output value sets that producer needs and yields.
//! Productions are pure data; the graph engine turns them into wired
//! nodes.

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use super::spec::ValueSpec;

/// Identity of a parameterized producer function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Producer {
    function: String,
    parameters: Vec<String>,
}

impl Producer {
    pub fn new<F: Into<String>>(function: F, parameters: Vec<String>) -> Self {
        Self {
            function: function.into(),
            parameters,
        }
    }

    /// A producer with no parameters.
    pub fn plain<F: Into<String>>(function: F) -> Self {
        Self::new(function, Vec::new())
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameters.is_empty() {
            write!(f, "{}", self.function)
        } else {
            write!(f, "{}({})", self.function, self.parameters.join(", "))
        }
    }
}

/// A resolved binding of a specification to its producer.
///
/// Invariant: `specification` is always a member of `outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Production {
    specification: ValueSpec,
    producer: Producer,
    inputs: IndexSet<ValueSpec>,
    outputs: IndexSet<ValueSpec>,
}

impl Production {
    pub fn new(
        specification: ValueSpec,
        producer: Producer,
        inputs: IndexSet<ValueSpec>,
        mut outputs: IndexSet<ValueSpec>,
    ) -> Self {
        if !outputs.contains(&specification) {
            outputs.insert(specification.clone());
        }
        Self {
            specification,
            producer,
            inputs,
            outputs,
        }
    }

    /// A production with no inputs and a single output.
    pub fn leaf(specification: ValueSpec, producer: Producer) -> Self {
        let outputs = IndexSet::from([specification.clone()]);
        Self::new(specification, producer, IndexSet::new(), outputs)
    }

    pub fn specification(&self) -> &ValueSpec {
        &self.specification
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn inputs(&self) -> &IndexSet<ValueSpec> {
        &self.inputs
    }

    pub fn outputs(&self) -> &IndexSet<ValueSpec> {
        &self.outputs
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <- {} ({} in, {} out)",
            self.specification,
            self.producer,
            self.inputs.len(),
            self.outputs.len()
        )
    }
}
