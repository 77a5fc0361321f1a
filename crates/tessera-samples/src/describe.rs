//! `Describable`: served by a generic fragment reading the compiled model.

use serde_json::{Value, json};
use std::sync::Arc;
use tessera_kernel::{
    AppliesTo, Call, CapabilityDeclaration, CompositeModel, FragmentDeclaration, FragmentError,
    InjectionSlot, MethodDeclaration, Mixin, StructureItem, ValueKind,
};

pub const DESCRIBABLE: &str = "Describable";

struct ModelDescriber {
    model: Arc<CompositeModel>,
}

impl Mixin for ModelDescriber {
    fn invoke(&self, _call: &Call<'_>) -> Result<Value, FragmentError> {
        let methods: Vec<String> = self
            .model
            .methods
            .iter()
            .map(|plan| plan.signature.to_string())
            .collect();
        Ok(json!({
            "capability": self.model.capability,
            "methods": methods,
            "digest": self.model.digest,
        }))
    }
}

pub fn describable() -> CapabilityDeclaration {
    CapabilityDeclaration::new(DESCRIBABLE)
        .method(MethodDeclaration::new("describe").returns(ValueKind::Object))
        .fragment(
            FragmentDeclaration::new("ModelDescriber", |injected| {
                Ok(ModelDescriber {
                    model: injected.model("model")?,
                })
            })
            .generic()
            .applies_to(AppliesTo::capability(DESCRIBABLE))
            .slot(InjectionSlot::structure("model", StructureItem::Model)),
        )
}
