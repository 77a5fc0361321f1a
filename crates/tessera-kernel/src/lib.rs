//! # Tessera Kernel
//!
//! A composite-object runtime: capability declarations annotated with
//! composition directives are compiled into immutable build plans, and
//! composites built from those plans dispatch every call through a fixed
//! pipeline of validation, wrappers, the resolved implementation fragment and
//! post-call observers.
//!
//! ## Architecture
//!
//! ```text
//! DeclarationGraph      ← Capabilities, methods, directives, DFS walk order
//!     │
//! resolver              ← First-match fragments, collect-all wrapper chains
//!     │
//! ModelCompiler         ← CompositeModel per capability, cached once
//!     │
//! injection             ← Slot resolution per scope (structure/this/service/uses/state)
//!     │
//! builder               ← Allocate-then-inject composite construction
//!     │
//! invocation            ← Validating → Wrapping → Implementing → PostCall → Done
//! ```
//!
//! Storage and service discovery are external: the kernel reaches them only
//! through [`ServiceRegistry`] and [`StateLoader`].

pub mod builder;
pub mod compiler;
pub mod composite;
pub mod config;
pub mod constraint;
pub mod declaration;
pub mod error;
pub mod graph;
pub mod injection;
pub mod invocation;
pub mod lifecycle;
pub mod model;
pub mod module;
pub mod resolver;
pub mod services;
pub mod state;

pub use builder::build_composite;
pub use compiler::{ModelCompiler, compile_model};
pub use composite::{Composite, CompositeInfo, CompositeRef};
pub use config::{PostCallPolicy, RuntimeConfig};
pub use constraint::{Constraint, ConstraintDeclaration};
pub use declaration::{
    AppliesTo, AppliesToContext, CapabilityDeclaration, CapabilityId, FragmentClass,
    FragmentDeclaration, MethodDeclaration, MethodSignature, Mixin, ParameterDeclaration,
    PostCall, PostCallDeclaration, ValueKind, Wrapper, WrapperDeclaration,
};
pub use error::{
    BuildError, ConfigError, ConstraintViolation, FragmentError, InjectionError,
    InvocationError, ResolutionError, Violation,
};
pub use graph::DeclarationGraph;
pub use injection::{Injected, Injection, InjectionSlot, Scope, Services, StructureItem, TypeKey, Uses};
pub use invocation::{Call, CallPhase, Next, Outcome};
pub use lifecycle::LifecycleSink;
pub use model::{CompositeModel, FragmentRole, MethodPlan, ModelProjection};
pub use module::{Module, ModuleBuilder};
pub use services::{MemoryServiceRegistry, Qualifier, ServiceReference, ServiceRegistry, Visibility};
pub use state::{MemoryStateLoader, NoStateLoader, StateKey, StateLoader};
