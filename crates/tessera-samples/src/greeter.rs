//! `Greeter`: one constrained method, a configurable implementation and an
//! upper-casing wrapper.

use crate::describe::DESCRIBABLE;
use serde_json::Value;
use std::sync::Arc;
use tessera_kernel::{
    AppliesTo, Call, CapabilityDeclaration, Constraint, FragmentDeclaration, FragmentError,
    InjectionSlot, MethodDeclaration, Mixin, Next, ParameterDeclaration, ValueKind, Wrapper,
    WrapperDeclaration,
};

pub const GREETER: &str = "Greeter";

/// Greeting prefix, supplied per build as a uses value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting(pub String);

impl Default for Greeting {
    fn default() -> Self {
        Self("Hello, ".to_string())
    }
}

struct GreeterImpl {
    greeting: Arc<Greeting>,
}

impl Mixin for GreeterImpl {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError> {
        let name = call.arg("name").and_then(Value::as_str).unwrap_or_default();
        Ok(Value::String(format!("{}{}", self.greeting.0, name)))
    }
}

struct UpperCaseWrapper;

impl Wrapper for UpperCaseWrapper {
    fn around(&self, call: &Call<'_>, next: &Next<'_>) -> Result<Value, FragmentError> {
        Ok(match next.proceed(call.args)? {
            Value::String(text) => Value::String(text.to_uppercase()),
            other => other,
        })
    }
}

pub fn greeter() -> CapabilityDeclaration {
    CapabilityDeclaration::new(GREETER)
        .extends(DESCRIBABLE)
        .method(
            MethodDeclaration::new("greet")
                .param(
                    ParameterDeclaration::new("name", ValueKind::String)
                        .constrain(Constraint::NotEmpty)
                        .constrain(Constraint::MaxLength(64)),
                )
                .returns(ValueKind::String),
        )
        .fragment(
            FragmentDeclaration::new("GreeterImpl", |injected| {
                Ok(GreeterImpl {
                    greeting: injected.uses::<Greeting>("greeting")?,
                })
            })
            .implements(GREETER)
            .applies_to(AppliesTo::methods(["greet"]))
            .slot(InjectionSlot::uses::<Greeting>("greeting").with_default(Greeting::default())),
        )
        .wrapper(
            WrapperDeclaration::new("UpperCaseWrapper", |_| Ok(UpperCaseWrapper))
                .applies_to(AppliesTo::methods(["greet"])),
        )
}
