//! Service registry contract and an in-memory implementation.
//!
//! Service-scope slots are resolved through [`ServiceRegistry`] only; the
//! kernel never constructs services itself.

use crate::injection::TypeKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How far a service is visible from where it was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Only composites of the registering module.
    Module,
    /// Every module of the registering layer.
    Layer,
    Application,
}

/// Narrows service candidates. Every qualifier of a slot must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualifier {
    Identity(String),
    Tagged(String),
}

impl Qualifier {
    pub fn identity(identity: impl Into<String>) -> Self {
        Self::Identity(identity.into())
    }

    pub fn tagged(tag: impl Into<String>) -> Self {
        Self::Tagged(tag.into())
    }

    pub fn accepts(&self, reference: &ServiceReference) -> bool {
        match self {
            Qualifier::Identity(identity) => reference.identity == *identity,
            Qualifier::Tagged(tag) => reference.tags.contains(tag),
        }
    }
}

/// A registered service instance and where it lives.
#[derive(Clone)]
pub struct ServiceReference {
    pub identity: String,
    pub type_key: TypeKey,
    pub module: String,
    pub layer: String,
    pub visibility: Visibility,
    pub tags: BTreeSet<String>,
    instance: Arc<dyn Any + Send + Sync>,
}

impl ServiceReference {
    /// Wrap `instance`, which may be a trait object such as `Arc<dyn Clock>`.
    pub fn new<T: ?Sized + Send + Sync + 'static>(
        identity: impl Into<String>,
        instance: Arc<T>,
    ) -> Self {
        Self {
            identity: identity.into(),
            type_key: TypeKey::of::<T>(),
            module: String::new(),
            layer: String::new(),
            visibility: Visibility::Module,
            tags: BTreeSet::new(),
            instance: Arc::new(instance),
        }
    }

    /// Register under `module` of `layer`.
    pub fn in_module(mut self, module: impl Into<String>, layer: impl Into<String>) -> Self {
        self.module = module.into();
        self.layer = layer.into();
        self
    }

    pub fn visible_to(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.instance.downcast_ref::<Arc<T>>().cloned()
    }

    /// Whether a composite of `module` in `layer` may see this service.
    pub fn visible_from(&self, visibility: Visibility, module: &str, layer: &str) -> bool {
        match visibility {
            Visibility::Module => self.module == module,
            Visibility::Layer => self.layer == layer,
            Visibility::Application => true,
        }
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("identity", &self.identity)
            .field("type", &self.type_key.name())
            .field("module", &self.module)
            .field("layer", &self.layer)
            .field("visibility", &self.visibility)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Source of service-scope candidates.
pub trait ServiceRegistry: Send + Sync {
    /// Candidates of `type_key` accepted by every qualifier, in registration order.
    fn find_by_type(&self, type_key: &TypeKey, qualifiers: &[Qualifier]) -> Vec<ServiceReference>;

    fn visibility_of(&self, candidate: &ServiceReference) -> Visibility {
        candidate.visibility
    }
}

/// Registration-ordered in-memory registry.
#[derive(Default)]
pub struct MemoryServiceRegistry {
    references: RwLock<Vec<ServiceReference>>,
}

impl MemoryServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, reference: ServiceReference) {
        debug!(
            identity = %reference.identity,
            service_type = reference.type_key.name(),
            module = %reference.module,
            visibility = ?reference.visibility,
            "registering service"
        );
        self.references.write().push(reference);
    }

    pub fn len(&self) -> usize {
        self.references.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.read().is_empty()
    }
}

impl ServiceRegistry for MemoryServiceRegistry {
    fn find_by_type(&self, type_key: &TypeKey, qualifiers: &[Qualifier]) -> Vec<ServiceReference> {
        self.references
            .read()
            .iter()
            .filter(|r| r.type_key == *type_key)
            .filter(|r| qualifiers.iter().all(|q| q.accepts(r)))
            .cloned()
            .collect()
    }
}
