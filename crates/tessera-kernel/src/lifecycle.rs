//! Host-side observation of composite creation and destruction.

use crate::composite::{Composite, CompositeInfo};

/// Registered on a module; notified for every composite it builds.
///
/// Sinks are not required for correctness and cannot veto a build.
pub trait LifecycleSink: Send + Sync {
    fn on_built(&self, _composite: &Composite) {}

    /// Runs while the composite is being dropped, after its fragments'
    /// `on_discard` hooks.
    fn on_discarded(&self, _info: &CompositeInfo) {}
}
