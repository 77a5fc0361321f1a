//! Declarations: capabilities, methods, and the composition directives
//! attached to them.
//!
//! Declarations are plain data built once at assembly time. Nothing here is
//! discovered at runtime; the resolver walks these tables in a fixed order.
//!
//! A capability carries three kinds of fragment directive:
//!
//! - [`FragmentDeclaration`]: an implementation unit (a *mixin*). Exactly
//!   one is chosen per method, first match wins.
//! - [`WrapperDeclaration`]: a decorator around the implementation. Every
//!   applicable wrapper joins the chain, outermost first.
//! - [`PostCallDeclaration`]: an observer run after the implementation,
//!   whatever its outcome.

use crate::constraint::{Constraint, ConstraintDeclaration};
use crate::error::FragmentError;
use crate::graph::DeclarationGraph;
use crate::injection::{Injected, InjectionSlot};
use crate::invocation::{Call, Next, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Identity of a capability (a declared interface type).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(pub String);

impl CapabilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CapabilityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&CapabilityId> for CapabilityId {
    fn from(id: &CapabilityId) -> Self {
        id.clone()
    }
}

/// Identity of a fragment class. Fragments are deduplicated by class.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentClass(pub String);

impl FragmentClass {
    pub fn new(class: impl Into<String>) -> Self {
        Self(class.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FragmentClass {
    fn from(class: &str) -> Self {
        Self::new(class)
    }
}

impl From<String> for FragmentClass {
    fn from(class: String) -> Self {
        Self(class)
    }
}

/// Shape of an argument or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Any,
    Null,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Any => "any",
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }

    /// Whether `value` has this shape. `Null` arguments are judged separately
    /// against the parameter's optionality.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueKind::Any => true,
            ValueKind::Null => value.is_null(),
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Number => value.is_number(),
            ValueKind::String => value.is_string(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method identity: name plus parameter kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<ValueKind>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, params: Vec<ValueKind>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(ValueKind::as_str).collect();
        write!(f, "{}({})", self.name, params.join(", "))
    }
}

/// A named, typed method parameter with its validation rules.
#[derive(Debug, Clone)]
pub struct ParameterDeclaration {
    pub name: String,
    pub kind: ValueKind,
    pub optional: bool,
    pub constraints: Vec<ConstraintDeclaration>,
}

impl ParameterDeclaration {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            constraints: Vec::new(),
        }
    }

    /// Accept `null` for this parameter.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn constrain(mut self, constraint: Constraint) -> Self {
        self.constraints
            .push(ConstraintDeclaration::new(self.name.clone(), constraint));
        self
    }
}

/// A method as declared on exactly one capability.
#[derive(Debug, Clone)]
pub struct MethodDeclaration {
    pub name: String,
    pub params: Vec<ParameterDeclaration>,
    pub returns: ValueKind,
    /// Marker tags, matched by [`AppliesTo::Tagged`].
    pub tags: BTreeSet<String>,
    /// Wrappers attached to this method only.
    pub wrappers: Vec<Arc<WrapperDeclaration>>,
    /// Post-call observers attached to this method only.
    pub post_calls: Vec<Arc<PostCallDeclaration>>,
}

impl MethodDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: ValueKind::Any,
            tags: BTreeSet::new(),
            wrappers: Vec::new(),
            post_calls: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParameterDeclaration) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, kind: ValueKind) -> Self {
        self.returns = kind;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn wrapper(mut self, wrapper: impl Into<Arc<WrapperDeclaration>>) -> Self {
        self.wrappers.push(wrapper.into());
        self
    }

    pub fn post_call(mut self, post_call: impl Into<Arc<PostCallDeclaration>>) -> Self {
        self.post_calls.push(post_call.into());
        self
    }

    pub fn signature(&self) -> MethodSignature {
        MethodSignature::new(
            self.name.clone(),
            self.params.iter().map(|p| p.kind).collect(),
        )
    }
}

/// A capability interface: methods, super-declarations and directives.
#[derive(Debug, Clone)]
pub struct CapabilityDeclaration {
    pub id: CapabilityId,
    /// Super-declarations, in the order the resolver visits them.
    pub supers: Vec<CapabilityId>,
    pub methods: Vec<MethodDeclaration>,
    pub fragments: Vec<Arc<FragmentDeclaration>>,
    pub wrappers: Vec<Arc<WrapperDeclaration>>,
    pub post_calls: Vec<Arc<PostCallDeclaration>>,
}

impl CapabilityDeclaration {
    pub fn new(id: impl Into<CapabilityId>) -> Self {
        Self {
            id: id.into(),
            supers: Vec::new(),
            methods: Vec::new(),
            fragments: Vec::new(),
            wrappers: Vec::new(),
            post_calls: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: impl Into<CapabilityId>) -> Self {
        self.supers.push(parent.into());
        self
    }

    pub fn method(mut self, method: MethodDeclaration) -> Self {
        self.methods.push(method);
        self
    }

    pub fn fragment(mut self, fragment: impl Into<Arc<FragmentDeclaration>>) -> Self {
        self.fragments.push(fragment.into());
        self
    }

    pub fn wrapper(mut self, wrapper: impl Into<Arc<WrapperDeclaration>>) -> Self {
        self.wrappers.push(wrapper.into());
        self
    }

    pub fn post_call(mut self, post_call: impl Into<Arc<PostCallDeclaration>>) -> Self {
        self.post_calls.push(post_call.into());
        self
    }
}

/// What an applicability filter sees when judging one method.
pub struct AppliesToContext<'a> {
    pub graph: &'a DeclarationGraph,
    /// The composite being compiled.
    pub composite: &'a CapabilityId,
    /// The capability that declares the method.
    pub declared_on: &'a CapabilityId,
    pub method: &'a MethodDeclaration,
}

type AppliesToPredicate = Arc<dyn Fn(&AppliesToContext<'_>) -> bool + Send + Sync>;

/// Restricts which methods a fragment, wrapper or post-call may service.
#[derive(Clone)]
pub enum AppliesTo {
    /// Methods with one of these names.
    Methods(BTreeSet<String>),
    /// Methods declared on this capability or anything it extends.
    Capability(CapabilityId),
    /// Methods carrying this tag.
    Tagged(String),
    /// Arbitrary predicate, named for diagnostics.
    Filter {
        name: String,
        predicate: AppliesToPredicate,
    },
}

impl AppliesTo {
    pub fn methods<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Methods(names.into_iter().map(Into::into).collect())
    }

    pub fn capability(id: impl Into<CapabilityId>) -> Self {
        Self::Capability(id.into())
    }

    pub fn tagged(tag: impl Into<String>) -> Self {
        Self::Tagged(tag.into())
    }

    pub fn filter<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&AppliesToContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self::Filter {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn accepts(&self, ctx: &AppliesToContext<'_>) -> bool {
        match self {
            AppliesTo::Methods(names) => names.contains(&ctx.method.name),
            AppliesTo::Capability(id) => ctx.graph.extends(id, ctx.declared_on),
            AppliesTo::Tagged(tag) => ctx.method.tags.contains(tag),
            AppliesTo::Filter { predicate, .. } => predicate(ctx),
        }
    }
}

impl fmt::Debug for AppliesTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppliesTo::Methods(names) => f.debug_tuple("Methods").field(names).finish(),
            AppliesTo::Capability(id) => f.debug_tuple("Capability").field(id).finish(),
            AppliesTo::Tagged(tag) => f.debug_tuple("Tagged").field(tag).finish(),
            AppliesTo::Filter { name, .. } => f.debug_tuple("Filter").field(name).finish(),
        }
    }
}

/// An empty filter list accepts every method; otherwise any entry may accept.
fn filters_accept(filters: &[AppliesTo], ctx: &AppliesToContext<'_>) -> bool {
    filters.is_empty() || filters.iter().any(|filter| filter.accepts(ctx))
}

/// An implementation unit servicing the methods it is eligible for.
pub trait Mixin: Send + Sync {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError>;

    /// Runs once after every fragment of the composite has been injected.
    fn on_built(&self) -> Result<(), FragmentError> {
        Ok(())
    }

    /// Runs when the composite is dropped.
    fn on_discard(&self) {}
}

/// A decorator around the rest of the call chain.
///
/// Delegate with [`Next::proceed`], or return without calling it to
/// short-circuit.
pub trait Wrapper: Send + Sync {
    fn around(&self, call: &Call<'_>, next: &Next<'_>) -> Result<Value, FragmentError>;

    fn on_built(&self) -> Result<(), FragmentError> {
        Ok(())
    }

    fn on_discard(&self) {}
}

/// An observer of a finished call. Its result never replaces the caller's.
pub trait PostCall: Send + Sync {
    fn after(&self, call: &Call<'_>, outcome: Outcome<'_>) -> Result<(), FragmentError>;

    fn on_built(&self) -> Result<(), FragmentError> {
        Ok(())
    }

    fn on_discard(&self) {}
}

pub type MixinFactory =
    Arc<dyn Fn(&Injected) -> Result<Box<dyn Mixin>, FragmentError> + Send + Sync>;
pub type WrapperFactory =
    Arc<dyn Fn(&Injected) -> Result<Box<dyn Wrapper>, FragmentError> + Send + Sync>;
pub type PostCallFactory =
    Arc<dyn Fn(&Injected) -> Result<Box<dyn PostCall>, FragmentError> + Send + Sync>;

/// Implementation fragment declaration.
///
/// A *typed* fragment implements the capabilities listed in `implements`
/// (and everything they extend). A *generic* fragment can dispatch any
/// method; it is only consulted once no typed fragment matched.
#[derive(Clone)]
pub struct FragmentDeclaration {
    pub class: FragmentClass,
    pub implements: Vec<CapabilityId>,
    pub generic: bool,
    pub applies_to: Vec<AppliesTo>,
    pub slots: Vec<InjectionSlot>,
    pub factory: MixinFactory,
}

impl FragmentDeclaration {
    pub fn new<F, M>(class: impl Into<FragmentClass>, factory: F) -> Self
    where
        F: Fn(&Injected) -> Result<M, FragmentError> + Send + Sync + 'static,
        M: Mixin + 'static,
    {
        Self {
            class: class.into(),
            implements: Vec::new(),
            generic: false,
            applies_to: Vec::new(),
            slots: Vec::new(),
            factory: Arc::new(move |injected: &Injected| {
                factory(injected).map(|mixin| Box::new(mixin) as Box<dyn Mixin>)
            }),
        }
    }

    pub fn implements(mut self, id: impl Into<CapabilityId>) -> Self {
        self.implements.push(id.into());
        self
    }

    pub fn generic(mut self) -> Self {
        self.generic = true;
        self
    }

    pub fn applies_to(mut self, filter: AppliesTo) -> Self {
        self.applies_to.push(filter);
        self
    }

    pub fn slot(mut self, slot: InjectionSlot) -> Self {
        self.slots.push(slot);
        self
    }

    /// Typed eligibility: the fragment implements the declaring capability,
    /// directly or through a sub-capability. Inherited methods are claimed
    /// too unless `applies_to` narrows them away.
    pub fn implements_method(&self, ctx: &AppliesToContext<'_>) -> bool {
        self.implements
            .iter()
            .any(|id| ctx.graph.extends(id, ctx.declared_on))
            && filters_accept(&self.applies_to, ctx)
    }

    /// Generic eligibility: the fragment claims the method through dispatch.
    pub fn dispatches_method(&self, ctx: &AppliesToContext<'_>) -> bool {
        self.generic && filters_accept(&self.applies_to, ctx)
    }
}

impl fmt::Debug for FragmentDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentDeclaration")
            .field("class", &self.class)
            .field("implements", &self.implements)
            .field("generic", &self.generic)
            .field("applies_to", &self.applies_to)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

/// Wrapper declaration.
#[derive(Clone)]
pub struct WrapperDeclaration {
    pub class: FragmentClass,
    pub applies_to: Vec<AppliesTo>,
    pub slots: Vec<InjectionSlot>,
    pub factory: WrapperFactory,
}

impl WrapperDeclaration {
    pub fn new<F, W>(class: impl Into<FragmentClass>, factory: F) -> Self
    where
        F: Fn(&Injected) -> Result<W, FragmentError> + Send + Sync + 'static,
        W: Wrapper + 'static,
    {
        Self {
            class: class.into(),
            applies_to: Vec::new(),
            slots: Vec::new(),
            factory: Arc::new(move |injected: &Injected| {
                factory(injected).map(|wrapper| Box::new(wrapper) as Box<dyn Wrapper>)
            }),
        }
    }

    pub fn applies_to(mut self, filter: AppliesTo) -> Self {
        self.applies_to.push(filter);
        self
    }

    pub fn slot(mut self, slot: InjectionSlot) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn accepts(&self, ctx: &AppliesToContext<'_>) -> bool {
        filters_accept(&self.applies_to, ctx)
    }
}

impl fmt::Debug for WrapperDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapperDeclaration")
            .field("class", &self.class)
            .field("applies_to", &self.applies_to)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

/// Post-call declaration.
#[derive(Clone)]
pub struct PostCallDeclaration {
    pub class: FragmentClass,
    pub applies_to: Vec<AppliesTo>,
    pub slots: Vec<InjectionSlot>,
    pub factory: PostCallFactory,
}

impl PostCallDeclaration {
    pub fn new<F, P>(class: impl Into<FragmentClass>, factory: F) -> Self
    where
        F: Fn(&Injected) -> Result<P, FragmentError> + Send + Sync + 'static,
        P: PostCall + 'static,
    {
        Self {
            class: class.into(),
            applies_to: Vec::new(),
            slots: Vec::new(),
            factory: Arc::new(move |injected: &Injected| {
                factory(injected).map(|post_call| Box::new(post_call) as Box<dyn PostCall>)
            }),
        }
    }

    pub fn applies_to(mut self, filter: AppliesTo) -> Self {
        self.applies_to.push(filter);
        self
    }

    pub fn slot(mut self, slot: InjectionSlot) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn accepts(&self, ctx: &AppliesToContext<'_>) -> bool {
        filters_accept(&self.applies_to, ctx)
    }
}

impl fmt::Debug for PostCallDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostCallDeclaration")
            .field("class", &self.class)
            .field("applies_to", &self.applies_to)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}
