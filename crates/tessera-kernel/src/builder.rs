//! Instance building.
//!
//! The composite's shared core is allocated first, with an empty fragment
//! table. Every fragment is then constructed from its resolved slots; `this`
//! slots receive weak handles to the core, so sibling fragments may refer to
//! each other regardless of construction order. Only once the whole table is
//! installed do `on_built` hooks run. Any failure drops the core before a
//! [`Composite`] exists, so callers never see a partial instance.

use crate::composite::{Composite, CompositeCore, CompositeRef, FragmentInstance};
use crate::error::BuildError;
use crate::injection::{BuildContext, Injected, Uses, resolve_slot};
use crate::model::CompositeModel;
use crate::module::Module;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn build_composite(
    module: &Module,
    model: Arc<CompositeModel>,
    uses: &Uses,
) -> Result<Composite, BuildError> {
    let core = Arc::new(CompositeCore::new(module.clone(), Arc::clone(&model)));
    let ctx = BuildContext {
        module,
        model: &model,
        this: CompositeRef::new(Arc::downgrade(&core), model.capability.clone()),
        uses,
    };

    let mut instances = Vec::with_capacity(model.fragments.len());
    for plan in &model.fragments {
        let mut injected = Injected::new(plan.class.clone());
        for slot in plan.slots() {
            let value = resolve_slot(&plan.class, slot, &ctx).inspect_err(|err| {
                warn!(
                    capability = %model.capability,
                    fragment = %plan.class,
                    slot = %slot.name,
                    failure_class = err.failure_class(),
                    "injection failed"
                );
            })?;
            injected.insert(&slot.name, value);
        }
        let instance = FragmentInstance::construct(&plan.source, &injected).map_err(|source| {
            BuildError::Construction {
                fragment: plan.class.clone(),
                source,
            }
        })?;
        instances.push(instance);
    }

    core.install(instances)
        .map_err(|source| BuildError::Construction {
            fragment: model.fragments.first().map(|p| p.class.clone()).unwrap_or_default(),
            source,
        })?;

    if let Some(fragments) = core.fragments() {
        for (plan, fragment) in model.fragments.iter().zip(fragments) {
            fragment.on_built().map_err(|source| BuildError::Lifecycle {
                fragment: plan.class.clone(),
                source,
            })?;
        }
    }
    core.mark_built();

    let composite = Composite::new(core);
    debug!(
        id = composite.id(),
        capability = %model.capability,
        fragments = model.fragments.len(),
        "composite built"
    );
    if module.config().notify_lifecycle_sinks {
        for sink in module.sinks() {
            sink.on_built(&composite);
        }
    }
    Ok(composite)
}
