//! Live composites and handles to them.

use crate::declaration::{CapabilityId, Mixin, PostCall, Wrapper};
use crate::error::{FragmentError, InvocationError};
use crate::injection::Injected;
use crate::invocation::dispatch;
use crate::model::{CompositeModel, FragmentSource};
use crate::module::Module;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

static NEXT_COMPOSITE_ID: AtomicU64 = AtomicU64::new(1);

/// One instantiated fragment.
pub(crate) enum FragmentInstance {
    Mixin(Box<dyn Mixin>),
    Wrapper(Box<dyn Wrapper>),
    PostCall(Box<dyn PostCall>),
}

impl FragmentInstance {
    pub(crate) fn construct(source: &FragmentSource, injected: &Injected) -> Result<Self, FragmentError> {
        Ok(match source {
            FragmentSource::Mixin(decl) => Self::Mixin((decl.factory)(injected)?),
            FragmentSource::Wrapper(decl) => Self::Wrapper((decl.factory)(injected)?),
            FragmentSource::PostCall(decl) => Self::PostCall((decl.factory)(injected)?),
        })
    }

    pub(crate) fn as_mixin(&self) -> Option<&dyn Mixin> {
        match self {
            Self::Mixin(mixin) => Some(mixin.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn as_wrapper(&self) -> Option<&dyn Wrapper> {
        match self {
            Self::Wrapper(wrapper) => Some(wrapper.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn as_post_call(&self) -> Option<&dyn PostCall> {
        match self {
            Self::PostCall(post_call) => Some(post_call.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn on_built(&self) -> Result<(), FragmentError> {
        match self {
            Self::Mixin(fragment) => fragment.on_built(),
            Self::Wrapper(fragment) => fragment.on_built(),
            Self::PostCall(fragment) => fragment.on_built(),
        }
    }

    fn on_discard(&self) {
        match self {
            Self::Mixin(fragment) => fragment.on_discard(),
            Self::Wrapper(fragment) => fragment.on_discard(),
            Self::PostCall(fragment) => fragment.on_discard(),
        }
    }
}

/// Shared state of one composite. The fragment table is installed once,
/// after every fragment has been constructed.
pub(crate) struct CompositeCore {
    id: u64,
    module: Module,
    model: Arc<CompositeModel>,
    fragments: OnceCell<Vec<FragmentInstance>>,
    built: AtomicBool,
}

impl CompositeCore {
    pub(crate) fn new(module: Module, model: Arc<CompositeModel>) -> Self {
        Self {
            id: NEXT_COMPOSITE_ID.fetch_add(1, Ordering::Relaxed),
            module,
            model,
            fragments: OnceCell::new(),
            built: AtomicBool::new(false),
        }
    }

    pub(crate) fn model(&self) -> &Arc<CompositeModel> {
        &self.model
    }

    pub(crate) fn module(&self) -> &Module {
        &self.module
    }

    /// `None` until the build installs the table.
    pub(crate) fn fragments(&self) -> Option<&[FragmentInstance]> {
        self.fragments.get().map(Vec::as_slice)
    }

    pub(crate) fn install(&self, fragments: Vec<FragmentInstance>) -> Result<(), FragmentError> {
        self.fragments
            .set(fragments)
            .map_err(|_| FragmentError::msg("fragment table installed twice"))
    }

    pub(crate) fn mark_built(&self) {
        self.built.store(true, Ordering::Release);
    }

    fn info(&self) -> CompositeInfo {
        CompositeInfo {
            id: self.id,
            capability: self.model.capability.clone(),
            digest: self.model.digest.clone(),
        }
    }
}

impl Drop for CompositeCore {
    fn drop(&mut self) {
        if !self.built.load(Ordering::Acquire) {
            return;
        }
        if let Some(fragments) = self.fragments.get() {
            for fragment in fragments {
                fragment.on_discard();
            }
        }
        let info = self.info();
        debug!(id = info.id, capability = %info.capability, "composite discarded");
        if self.module.config().notify_lifecycle_sinks {
            for sink in self.module.sinks() {
                sink.on_discarded(&info);
            }
        }
    }
}

/// Identity of a composite, as reported to lifecycle sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeInfo {
    pub id: u64,
    pub capability: CapabilityId,
    pub digest: String,
}

/// A built composite. Owned by whoever built it; dropping it discards the
/// instance. Share it explicitly (e.g. in an `Arc`) when needed.
pub struct Composite {
    core: Arc<CompositeCore>,
}

impl Composite {
    pub(crate) fn new(core: Arc<CompositeCore>) -> Self {
        Self { core }
    }

    pub fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, InvocationError> {
        dispatch(&self.core, method, args)
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn capability(&self) -> &CapabilityId {
        &self.core.model.capability
    }

    pub fn implements(&self, capability: &CapabilityId) -> bool {
        self.core.model.implements(capability)
    }

    pub fn model(&self) -> &Arc<CompositeModel> {
        &self.core.model
    }

    pub fn info(&self) -> CompositeInfo {
        self.core.info()
    }

    /// A non-owning handle, as injected into `this` slots.
    pub fn handle(&self) -> CompositeRef {
        CompositeRef::new(Arc::downgrade(&self.core), self.core.model.capability.clone())
    }
}

impl fmt::Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composite")
            .field("id", &self.core.id)
            .field("capability", &self.core.model.capability)
            .finish_non_exhaustive()
    }
}

/// A weak handle to a composite, viewed as one of its capabilities.
///
/// Calls go through the full pipeline, so constraints and wrappers apply to
/// calls a fragment makes on its own composite. A handle never keeps its
/// composite alive.
#[derive(Clone)]
pub struct CompositeRef {
    core: Weak<CompositeCore>,
    capability: CapabilityId,
}

impl CompositeRef {
    pub(crate) fn new(core: Weak<CompositeCore>, capability: CapabilityId) -> Self {
        Self { core, capability }
    }

    pub fn capability(&self) -> &CapabilityId {
        &self.capability
    }

    pub fn is_alive(&self) -> bool {
        self.core.strong_count() > 0
    }

    /// The same composite viewed as another of its capabilities.
    pub(crate) fn viewed_as(&self, capability: CapabilityId) -> Self {
        Self::new(self.core.clone(), capability)
    }

    /// Invoke a method reachable from the viewed capability.
    pub fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, InvocationError> {
        let core = self
            .core
            .upgrade()
            .ok_or_else(|| InvocationError::Unavailable(self.capability.clone()))?;
        let visible = core.model().method(method).is_some_and(|plan| {
            core.module()
                .graph()
                .extends(&self.capability, &plan.declared_on)
        });
        if !visible {
            return Err(InvocationError::UnknownMethod {
                capability: self.capability.clone(),
                method: method.to_string(),
            });
        }
        dispatch(&core, method, args)
    }
}

impl fmt::Debug for CompositeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeRef")
            .field("capability", &self.capability)
            .field("alive", &self.is_alive())
            .finish()
    }
}
