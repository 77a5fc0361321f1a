//! Error types for composition, building and dispatch.
//!
//! The taxonomy follows the lifetime of a composite:
//!
//! - [`ResolutionError`]: assembly/compile time, fatal to a model.
//! - [`InjectionError`] and [`BuildError`]: build time, fatal to one instance.
//! - [`ConstraintViolation`]: call time, recoverable by the caller.
//! - [`FragmentError`]: raised by fragment code, propagated unchanged.

use crate::declaration::{CapabilityId, FragmentClass, MethodSignature};
use crate::injection::Scope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

pub mod failure_class {
    pub const FRAGMENT_UNAVAILABLE: &str = "fragment_unavailable";
    pub const UNKNOWN_CAPABILITY: &str = "unknown_capability";
    pub const DECLARATION_CYCLE: &str = "declaration_cycle";
    pub const DUPLICATE_CAPABILITY: &str = "duplicate_capability";
    pub const DUPLICATE_METHOD: &str = "duplicate_method";
    pub const DUPLICATE_FRAGMENT: &str = "duplicate_fragment";
    pub const SLOT_UNSATISFIED: &str = "slot_unsatisfied";
    pub const SLOT_UNDECLARED: &str = "slot_undeclared";
    pub const SLOT_TYPE_MISMATCH: &str = "slot_type_mismatch";
    pub const THIS_CAPABILITY_MISSING: &str = "this_capability_missing";
    pub const STATE_LOAD_FAILED: &str = "state_load_failed";
    pub const CONSTRUCTION_FAILED: &str = "construction_failed";
    pub const LIFECYCLE_FAILED: &str = "lifecycle_failed";
    pub const CONSTRAINT_VIOLATION: &str = "constraint_violation";
    pub const FRAGMENT_FAILED: &str = "fragment_failed";
    pub const UNKNOWN_METHOD: &str = "unknown_method";
    pub const ARITY_MISMATCH: &str = "arity_mismatch";
    pub const COMPOSITE_UNAVAILABLE: &str = "composite_unavailable";
}

/// Compile-time failures. A model is either fully resolved or not produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// No fragment in the walk accepts a method.
    #[error(
        "fragment type not available: no fragment implements {method} (declared on {declared_on}) in composite {capability}{}",
        .module.as_deref().map(|m| format!(" of module {m}")).unwrap_or_default()
    )]
    FragmentUnavailable {
        capability: CapabilityId,
        declared_on: CapabilityId,
        method: MethodSignature,
        module: Option<String>,
    },

    /// A capability (or a super-declaration) is not part of the graph.
    #[error("unknown capability {capability}{}", .referenced_by.as_ref().map(|r| format!(" (referenced by {r})")).unwrap_or_default())]
    UnknownCapability {
        capability: CapabilityId,
        referenced_by: Option<CapabilityId>,
    },

    /// The super-declaration edges do not form a DAG.
    #[error("cyclic capability hierarchy: {}", .path.iter().map(CapabilityId::as_str).collect::<Vec<_>>().join(" -> "))]
    Cycle { path: Vec<CapabilityId> },

    #[error("capability {0} declared more than once")]
    DuplicateCapability(CapabilityId),

    #[error("capability {capability} declares {method} more than once")]
    DuplicateMethod {
        capability: CapabilityId,
        method: MethodSignature,
    },

    /// Two distinct declarations share a fragment class within one role.
    #[error("fragment class {class} on {capability} conflicts with an earlier declaration of the same class")]
    DuplicateFragment {
        class: FragmentClass,
        capability: CapabilityId,
    },
}

impl ResolutionError {
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::FragmentUnavailable { .. } => failure_class::FRAGMENT_UNAVAILABLE,
            Self::UnknownCapability { .. } => failure_class::UNKNOWN_CAPABILITY,
            Self::Cycle { .. } => failure_class::DECLARATION_CYCLE,
            Self::DuplicateCapability(_) => failure_class::DUPLICATE_CAPABILITY,
            Self::DuplicateMethod { .. } => failure_class::DUPLICATE_METHOD,
            Self::DuplicateFragment { .. } => failure_class::DUPLICATE_FRAGMENT,
        }
    }
}

/// A required injection slot could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectionError {
    #[error("slot '{slot}' ({scope}) of fragment {fragment} cannot be satisfied")]
    Unsatisfied {
        fragment: FragmentClass,
        slot: String,
        scope: Scope,
    },

    #[error("slot '{slot}' of fragment {fragment} requires capability {capability}, which the composite does not implement")]
    ThisCapabilityMissing {
        fragment: FragmentClass,
        slot: String,
        capability: CapabilityId,
    },

    #[error("fragment {fragment} requested undeclared slot '{slot}'")]
    Undeclared { fragment: FragmentClass, slot: String },

    #[error("slot '{slot}' of fragment {fragment} does not hold a {expected}")]
    TypeMismatch {
        fragment: FragmentClass,
        slot: String,
        expected: &'static str,
    },

    #[error("state for slot '{slot}' of fragment {fragment} failed to load: {message}")]
    StateLoad {
        fragment: FragmentClass,
        slot: String,
        message: String,
    },
}

impl InjectionError {
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::Unsatisfied { .. } => failure_class::SLOT_UNSATISFIED,
            Self::ThisCapabilityMissing { .. } => failure_class::THIS_CAPABILITY_MISSING,
            Self::Undeclared { .. } => failure_class::SLOT_UNDECLARED,
            Self::TypeMismatch { .. } => failure_class::SLOT_TYPE_MISMATCH,
            Self::StateLoad { .. } => failure_class::STATE_LOAD_FAILED,
        }
    }

    pub fn fragment(&self) -> &FragmentClass {
        match self {
            Self::Unsatisfied { fragment, .. }
            | Self::ThisCapabilityMissing { fragment, .. }
            | Self::Undeclared { fragment, .. }
            | Self::TypeMismatch { fragment, .. }
            | Self::StateLoad { fragment, .. } => fragment,
        }
    }
}

/// Failure of one instance build. No partially built composite escapes.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error("fragment {fragment} failed to construct: {source}")]
    Construction {
        fragment: FragmentClass,
        #[source]
        source: FragmentError,
    },

    #[error("post-construction hook of fragment {fragment} failed: {source}")]
    Lifecycle {
        fragment: FragmentClass,
        #[source]
        source: FragmentError,
    },
}

impl BuildError {
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::Resolution(err) => err.failure_class(),
            Self::Injection(err) => err.failure_class(),
            Self::Construction { .. } => failure_class::CONSTRUCTION_FAILED,
            Self::Lifecycle { .. } => failure_class::LIFECYCLE_FAILED,
        }
    }
}

/// One failing argument constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub parameter: String,
    pub value: Value,
    pub constraint: String,
}

/// Every constraint that failed for one call, in parameter order.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "constraint violation in {capability}.{method}: {}",
    .violations.iter().map(|v| format!("{} ({})", v.parameter, v.constraint)).collect::<Vec<_>>().join(", ")
)]
pub struct ConstraintViolation {
    pub capability: CapabilityId,
    pub method: MethodSignature,
    pub violations: Vec<Violation>,
}

impl ConstraintViolation {
    /// Whether `parameter` is among the failing arguments.
    pub fn names(&self, parameter: &str) -> bool {
        self.violations.iter().any(|v| v.parameter == parameter)
    }
}

/// An error raised by fragment, wrapper or post-call code.
#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    #[error("{0}")]
    Message(String),

    /// A call made by the fragment through a composite handle failed.
    #[error(transparent)]
    Nested(Box<InvocationError>),

    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FragmentError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<InvocationError> for FragmentError {
    fn from(err: InvocationError) -> Self {
        Self::Nested(Box::new(err))
    }
}

impl From<InjectionError> for FragmentError {
    fn from(err: InjectionError) -> Self {
        Self::Other(Box::new(err))
    }
}

/// Errors returned to the caller of a composite method.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Rejected(#[from] ConstraintViolation),

    /// Raised inside the implementation or a wrapper; passed through as is.
    #[error(transparent)]
    Fragment(#[from] FragmentError),

    #[error("composite {capability} has no method '{method}' accepting the given arguments")]
    UnknownMethod {
        capability: CapabilityId,
        method: String,
    },

    #[error("{method} expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        method: MethodSignature,
        expected: usize,
        actual: usize,
    },

    /// A `this` handle outlived its composite, or was used before the build finished.
    #[error("composite {0} is not available")]
    Unavailable(CapabilityId),
}

impl InvocationError {
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::Rejected(_) => failure_class::CONSTRAINT_VIOLATION,
            Self::Fragment(_) => failure_class::FRAGMENT_FAILED,
            Self::UnknownMethod { .. } => failure_class::UNKNOWN_METHOD,
            Self::ArityMismatch { .. } => failure_class::ARITY_MISMATCH,
            Self::Unavailable(_) => failure_class::COMPOSITE_UNAVAILABLE,
        }
    }

    /// The constraint violation, when the call was rejected before dispatch.
    pub fn violation(&self) -> Option<&ConstraintViolation> {
        match self {
            Self::Rejected(violation) => Some(violation),
            _ => None,
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid runtime config: {0}")]
    Parse(#[from] toml::de::Error),
}
