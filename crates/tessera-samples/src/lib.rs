//! A small sample assembly for the Tessera kernel.
//!
//! | capability    | shows                                                     |
//! |---------------|-----------------------------------------------------------|
//! | `Describable` | generic fragment, structure-scope model injection         |
//! | `Greeter`     | constraints, uses-scope defaults, a wrapper               |
//! | `Counter`     | shared fragment state, `this` callbacks, audited post-calls |
//!
//! The audit trail and clock are registered as services.

pub mod counter;
pub mod describe;
pub mod greeter;
pub mod services;

pub use counter::{AUDITED, COUNTER};
pub use describe::DESCRIBABLE;
pub use greeter::{GREETER, Greeting};
pub use services::{AuditEntry, AuditTrail, Clock, ManualClock, SystemClock};

use std::sync::Arc;
use tessera_kernel::{
    CapabilityDeclaration, Module, NoStateLoader, ResolutionError, RuntimeConfig, ServiceReference,
    StateLoader, Visibility,
};

/// Every sample capability, in declaration order.
pub fn declarations() -> Vec<CapabilityDeclaration> {
    vec![describe::describable(), greeter::greeter(), counter::counter()]
}

/// An assembled sample module and the services a host may want to inspect.
pub struct Assembly {
    pub module: Module,
    pub audit: Arc<AuditTrail>,
}

pub fn assemble(
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    state: Arc<dyn StateLoader>,
) -> Result<Assembly, ResolutionError> {
    let audit = Arc::new(AuditTrail::new());
    let module = Module::builder()
        .config(config)
        .declare_all(declarations())
        .service(ServiceReference::new("audit", Arc::clone(&audit)).visible_to(Visibility::Application))
        .service(ServiceReference::new("clock", clock).visible_to(Visibility::Layer))
        .state_loader(state)
        .build()?;
    Ok(Assembly { module, audit })
}

/// The sample assembly with the system clock and no stored state.
pub fn assemble_default(config: RuntimeConfig) -> Result<Assembly, ResolutionError> {
    assemble(config, Arc::new(SystemClock), Arc::new(NoStateLoader))
}
