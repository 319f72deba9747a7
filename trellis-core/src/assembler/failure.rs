//! Failure reporting for requirements the resolver could not satisfy.
//!
//! The engine itself never throws out of a resolver callback: internal
//! dead ends (cycles, missing inputs) silently reduce the set of nodes
//! produced, and only a fully unsatisfiable requirement is surfaced, as a
//! structured [`BuildFailure`] pushed through the resolution context.
//!
//! A [`FailureVisitor`] can be plugged in to render the resolver's
//! accumulated diagnostic detail before the failure is reported.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Producer, Requirement, ValueSpec};

/// Opaque token identifying a suspended resolver scan.
///
/// Releasing it through [`ResolutionContext::release_pump`] tells the
/// external search to continue with its next candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PumpHandle(pub u64);

/// The resolver-side context the engine reports back into.
pub trait ResolutionContext: Send + Sync {
    /// Accept a structured failure for a requirement.
    fn report_failure(&self, failure: BuildFailure);

    /// Resume the suspended scan identified by `pump`.
    fn release_pump(&self, pump: PumpHandle);
}

/// Optional visitor over resolution failure detail, for diagnostics.
pub trait FailureVisitor: Send + Sync {
    fn visit(&self, failure: &ResolutionFailure);
}

/// One step in the resolver's account of why a requirement failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureEvent {
    /// No producer was found for the requirement at all.
    NoProducers,
    /// A candidate producer was tried and rejected.
    ProducerRejected { producer: Producer, reason: String },
    /// A producer was viable but one of its inputs could not be resolved.
    MissingInput { input: ValueSpec },
}

/// Diagnostic detail accumulated by the resolver for a failed requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    requirement: Requirement,
    events: Vec<FailureEvent>,
}

impl ResolutionFailure {
    pub fn new(requirement: Requirement) -> Self {
        Self {
            requirement,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: FailureEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    pub fn events(&self) -> &[FailureEvent] {
        &self.events
    }
}

impl std::fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed after {} events", self.requirement, self.events.len())
    }
}

/// The reportable failure conditions of a graph build.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildFailure {
    /// The resolver exhausted all candidates for a requirement.
    #[error("unable to satisfy requirement {requirement}: {failure}")]
    Unsatisfiable {
        requirement: Requirement,
        failure: ResolutionFailure,
    },

    /// The resolver gave up without recording any failure detail.
    #[error("requirement {requirement} was never resolved")]
    Unresolved { requirement: Requirement },
}

impl BuildFailure {
    pub fn requirement(&self) -> &Requirement {
        match self {
            BuildFailure::Unsatisfiable { requirement, .. } => requirement,
            BuildFailure::Unresolved { requirement } => requirement,
        }
    }
}
