//! Injection slots and their scope-specific resolution.
//!
//! Every fragment lists its dependencies as [`InjectionSlot`]s. When a
//! composite is built each slot is resolved once, against the scope it is
//! tagged with, and the results are handed to the fragment factory as an
//! [`Injected`] bag.
//!
//! | scope     | source                                    |
//! |-----------|-------------------------------------------|
//! | structure | the enclosing module, its config, the model |
//! | this      | the composite under construction          |
//! | service   | the module's [`ServiceRegistry`]          |
//! | uses      | values passed to this one build           |
//! | state     | the module's [`StateLoader`]              |
//!
//! [`ServiceRegistry`]: crate::services::ServiceRegistry
//! [`StateLoader`]: crate::state::StateLoader

use crate::composite::CompositeRef;
use crate::config::RuntimeConfig;
use crate::declaration::{CapabilityId, FragmentClass};
use crate::error::InjectionError;
use crate::model::CompositeModel;
use crate::module::Module;
use crate::services::{Qualifier, ServiceReference};
use crate::state::StateKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Structure,
    This,
    Service,
    Uses,
    State,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Structure => "structure",
            Scope::This => "this",
            Scope::Service => "service",
            Scope::Uses => "uses",
            Scope::State => "state",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime identity of a Rust type, used to key services and uses values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Composition services available in structure scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureItem {
    /// The enclosing [`Module`], able to build further composites.
    Module,
    /// The module's [`RuntimeConfig`].
    Config,
    /// The compiled model of the composite being built.
    Model,
}

/// What a slot asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotTarget {
    Structure(StructureItem),
    Capability(CapabilityId),
    Type(TypeKey),
    State,
}

impl fmt::Display for SlotTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotTarget::Structure(item) => write!(f, "{item:?}"),
            SlotTarget::Capability(id) => write!(f, "{id}"),
            SlotTarget::Type(key) => write!(f, "{key}"),
            SlotTarget::State => f.write_str("value"),
        }
    }
}

type Shared = Arc<dyn Any + Send + Sync>;

/// A dependency requirement of one fragment.
#[derive(Clone)]
pub struct InjectionSlot {
    pub name: String,
    pub scope: Scope,
    pub target: SlotTarget,
    pub optional: bool,
    pub multi: bool,
    pub qualifiers: Vec<Qualifier>,
    default: Option<Shared>,
}

impl InjectionSlot {
    fn new(name: impl Into<String>, scope: Scope, target: SlotTarget) -> Self {
        Self {
            name: name.into(),
            scope,
            target,
            optional: false,
            multi: false,
            qualifiers: Vec::new(),
            default: None,
        }
    }

    pub fn structure(name: impl Into<String>, item: StructureItem) -> Self {
        Self::new(name, Scope::Structure, SlotTarget::Structure(item))
    }

    /// The composite itself, seen as `capability`.
    pub fn this(name: impl Into<String>, capability: impl Into<CapabilityId>) -> Self {
        Self::new(name, Scope::This, SlotTarget::Capability(capability.into()))
    }

    pub fn service<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::new(name, Scope::Service, SlotTarget::Type(TypeKey::of::<T>()))
    }

    pub fn uses<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::new(name, Scope::Uses, SlotTarget::Type(TypeKey::of::<T>()))
    }

    pub fn state(name: impl Into<String>) -> Self {
        Self::new(name, Scope::State, SlotTarget::State)
    }

    /// Tolerate absence. Structure slots are always satisfied and ignore this.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Collect every visible match instead of the first.
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    pub fn qualified(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    /// Value used for a uses slot the caller did not supply.
    pub fn with_default<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        let shared: Shared = Arc::new(Arc::new(value));
        self.default = Some(shared);
        self
    }
}

impl fmt::Debug for InjectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionSlot")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("target", &self.target)
            .field("optional", &self.optional)
            .field("multi", &self.multi)
            .field("qualifiers", &self.qualifiers)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Values supplied by the caller of one build, keyed by type.
#[derive(Clone, Default)]
pub struct Uses {
    values: BTreeMap<TypeKey, Shared>,
}

impl Uses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.with_shared(Arc::new(value))
    }

    /// Supply an already shared value, possibly a trait object.
    pub fn with_shared<T: ?Sized + Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.values.insert(TypeKey::of::<T>(), Arc::new(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn get(&self, key: &TypeKey) -> Option<&Shared> {
        self.values.get(key)
    }
}

impl fmt::Debug for Uses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Every visible service matching a multi-valued slot, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Services {
    references: Vec<ServiceReference>,
}

impl Services {
    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn references(&self) -> impl Iterator<Item = &ServiceReference> {
        self.references.iter()
    }

    /// Instances, downcast as they are iterated.
    pub fn instances<T: ?Sized + Send + Sync + 'static>(&self) -> impl Iterator<Item = Arc<T>> + '_ {
        self.references.iter().filter_map(ServiceReference::get::<T>)
    }
}

/// A resolved slot value.
#[derive(Clone)]
pub enum Injection {
    Module(Module),
    Config(Arc<RuntimeConfig>),
    Model(Arc<CompositeModel>),
    This(CompositeRef),
    Service(ServiceReference),
    Services(Services),
    Uses(Shared),
    State(Value),
    /// An optional slot nothing satisfied.
    Absent,
}

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Injection::Module(module) => f.debug_tuple("Module").field(&module.name()).finish(),
            Injection::Config(_) => f.write_str("Config"),
            Injection::Model(model) => f.debug_tuple("Model").field(&model.capability).finish(),
            Injection::This(this) => f.debug_tuple("This").field(this).finish(),
            Injection::Service(reference) => f.debug_tuple("Service").field(reference).finish(),
            Injection::Services(services) => f.debug_tuple("Services").field(&services.len()).finish(),
            Injection::Uses(_) => f.write_str("Uses"),
            Injection::State(value) => f.debug_tuple("State").field(value).finish(),
            Injection::Absent => f.write_str("Absent"),
        }
    }
}

/// The resolved slots of one fragment, handed to its factory.
#[derive(Debug, Clone)]
pub struct Injected {
    fragment: FragmentClass,
    values: BTreeMap<String, Injection>,
}

impl Injected {
    pub(crate) fn new(fragment: FragmentClass) -> Self {
        Self {
            fragment,
            values: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, slot: &str, value: Injection) {
        self.values.insert(slot.to_string(), value);
    }

    pub fn fragment(&self) -> &FragmentClass {
        &self.fragment
    }

    pub fn get(&self, slot: &str) -> Result<&Injection, InjectionError> {
        self.values.get(slot).ok_or_else(|| InjectionError::Undeclared {
            fragment: self.fragment.clone(),
            slot: slot.to_string(),
        })
    }

    pub fn is_absent(&self, slot: &str) -> bool {
        matches!(self.values.get(slot), Some(Injection::Absent) | None)
    }

    pub fn module(&self, slot: &str) -> Result<Module, InjectionError> {
        match self.get(slot)? {
            Injection::Module(module) => Ok(module.clone()),
            _ => Err(self.mismatch(slot, "module")),
        }
    }

    pub fn config(&self, slot: &str) -> Result<Arc<RuntimeConfig>, InjectionError> {
        match self.get(slot)? {
            Injection::Config(config) => Ok(Arc::clone(config)),
            _ => Err(self.mismatch(slot, "runtime config")),
        }
    }

    pub fn model(&self, slot: &str) -> Result<Arc<CompositeModel>, InjectionError> {
        match self.get(slot)? {
            Injection::Model(model) => Ok(Arc::clone(model)),
            _ => Err(self.mismatch(slot, "composite model")),
        }
    }

    pub fn this(&self, slot: &str) -> Result<CompositeRef, InjectionError> {
        match self.get(slot)? {
            Injection::This(this) => Ok(this.clone()),
            _ => Err(self.mismatch(slot, "composite handle")),
        }
    }

    pub fn service_reference(&self, slot: &str) -> Result<&ServiceReference, InjectionError> {
        match self.get(slot)? {
            Injection::Service(reference) => Ok(reference),
            _ => Err(self.mismatch(slot, "service reference")),
        }
    }

    pub fn service<T: ?Sized + Send + Sync + 'static>(&self, slot: &str) -> Result<Arc<T>, InjectionError> {
        self.service_reference(slot)?
            .get::<T>()
            .ok_or_else(|| self.mismatch(slot, std::any::type_name::<T>()))
    }

    pub fn optional_service<T: ?Sized + Send + Sync + 'static>(
        &self,
        slot: &str,
    ) -> Result<Option<Arc<T>>, InjectionError> {
        match self.get(slot)? {
            Injection::Absent => Ok(None),
            _ => self.service::<T>(slot).map(Some),
        }
    }

    pub fn services(&self, slot: &str) -> Result<&Services, InjectionError> {
        match self.get(slot)? {
            Injection::Services(services) => Ok(services),
            _ => Err(self.mismatch(slot, "service collection")),
        }
    }

    pub fn uses<T: ?Sized + Send + Sync + 'static>(&self, slot: &str) -> Result<Arc<T>, InjectionError> {
        match self.get(slot)? {
            Injection::Uses(value) => value
                .downcast_ref::<Arc<T>>()
                .cloned()
                .ok_or_else(|| self.mismatch(slot, std::any::type_name::<T>())),
            _ => Err(self.mismatch(slot, std::any::type_name::<T>())),
        }
    }

    pub fn optional_uses<T: ?Sized + Send + Sync + 'static>(
        &self,
        slot: &str,
    ) -> Result<Option<Arc<T>>, InjectionError> {
        match self.get(slot)? {
            Injection::Absent => Ok(None),
            _ => self.uses::<T>(slot).map(Some),
        }
    }

    /// Loaded state, or `None` for an optional slot with nothing stored.
    pub fn state(&self, slot: &str) -> Result<Option<&Value>, InjectionError> {
        match self.get(slot)? {
            Injection::State(value) => Ok(Some(value)),
            Injection::Absent => Ok(None),
            _ => Err(self.mismatch(slot, "state value")),
        }
    }

    fn mismatch(&self, slot: &str, expected: &'static str) -> InjectionError {
        InjectionError::TypeMismatch {
            fragment: self.fragment.clone(),
            slot: slot.to_string(),
            expected,
        }
    }
}

/// Everything slot resolution may draw on during one build.
pub(crate) struct BuildContext<'a> {
    pub module: &'a Module,
    pub model: &'a Arc<CompositeModel>,
    pub this: CompositeRef,
    pub uses: &'a Uses,
}

/// Resolve one slot of `fragment`.
pub(crate) fn resolve_slot(
    fragment: &FragmentClass,
    slot: &InjectionSlot,
    ctx: &BuildContext<'_>,
) -> Result<Injection, InjectionError> {
    let unsatisfied = || InjectionError::Unsatisfied {
        fragment: fragment.clone(),
        slot: slot.name.clone(),
        scope: slot.scope,
    };

    match (&slot.scope, &slot.target) {
        (Scope::Structure, SlotTarget::Structure(item)) => Ok(match item {
            StructureItem::Module => Injection::Module(ctx.module.clone()),
            StructureItem::Config => Injection::Config(ctx.module.config()),
            StructureItem::Model => Injection::Model(Arc::clone(ctx.model)),
        }),

        (Scope::This, SlotTarget::Capability(capability)) => {
            if ctx.model.implements(capability) {
                Ok(Injection::This(ctx.this.viewed_as(capability.clone())))
            } else if slot.optional {
                Ok(Injection::Absent)
            } else {
                Err(InjectionError::ThisCapabilityMissing {
                    fragment: fragment.clone(),
                    slot: slot.name.clone(),
                    capability: capability.clone(),
                })
            }
        }

        (Scope::Service, SlotTarget::Type(key)) => {
            let visible = ctx.module.visible_services(key, &slot.qualifiers);
            if slot.multi {
                if visible.is_empty() && !slot.optional {
                    return Err(unsatisfied());
                }
                return Ok(Injection::Services(Services { references: visible }));
            }
            match visible.into_iter().next() {
                Some(reference) => Ok(Injection::Service(reference)),
                None if slot.optional => Ok(Injection::Absent),
                None => Err(unsatisfied()),
            }
        }

        (Scope::Uses, SlotTarget::Type(key)) => match ctx.uses.get(key).or(slot.default.as_ref()) {
            Some(value) => Ok(Injection::Uses(Arc::clone(value))),
            None if slot.optional => Ok(Injection::Absent),
            None => Err(unsatisfied()),
        },

        (Scope::State, SlotTarget::State) => {
            let key = StateKey::new(fragment.clone(), slot.name.clone());
            match ctx.module.state_loader().load_state(&key) {
                Ok(Some(value)) => Ok(Injection::State(value)),
                Ok(None) if slot.optional => Ok(Injection::Absent),
                Ok(None) => Err(unsatisfied()),
                Err(message) => Err(InjectionError::StateLoad {
                    fragment: fragment.clone(),
                    slot: slot.name.clone(),
                    message,
                }),
            }
        }

        _ => Err(unsatisfied()),
    }
}
