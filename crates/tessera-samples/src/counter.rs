//! `Counter`: one stateful fragment servicing several methods, a fragment
//! calling back into its own composite, and an audited post-call.

use crate::describe::DESCRIBABLE;
use crate::services::{AuditEntry, AuditTrail, Clock};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tessera_kernel::{
    AppliesTo, Call, CapabilityDeclaration, CompositeRef, Constraint, FragmentDeclaration,
    FragmentError, InjectionSlot, MethodDeclaration, Mixin, Outcome, ParameterDeclaration,
    PostCall, PostCallDeclaration, ValueKind,
};
use tracing::debug;

pub const COUNTER: &str = "Counter";
pub const AUDITED: &str = "audited";

fn step() -> ParameterDeclaration {
    ParameterDeclaration::new("by", ValueKind::Integer)
        .optional()
        .constrain(Constraint::range(1.0, 1000.0))
}

/// Holds the count. Its methods share one instance per composite.
struct CounterState {
    value: Mutex<i64>,
}

impl Mixin for CounterState {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError> {
        let mut value = self.value.lock();
        match call.method() {
            "increment" => {
                *value += call.arg("by").and_then(Value::as_i64).unwrap_or(1);
                Ok(json!(*value))
            }
            "current" => Ok(json!(*value)),
            "reset" => Ok(json!(std::mem::take(&mut *value))),
            other => Err(FragmentError::msg(format!("CounterState cannot service {other}"))),
        }
    }

    fn on_built(&self) -> Result<(), FragmentError> {
        debug!(initial = *self.value.lock(), "counter ready");
        Ok(())
    }
}

/// Implements `add_twice` by calling `increment` on its own composite.
struct CounterTwice {
    this: CompositeRef,
}

impl Mixin for CounterTwice {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError> {
        let by = call.arg("by").cloned().unwrap_or(Value::Null);
        self.this.invoke("increment", std::slice::from_ref(&by))?;
        Ok(self.this.invoke("increment", std::slice::from_ref(&by))?)
    }
}

/// Records every audited call, successful or not.
struct AuditPostCall {
    trail: Arc<AuditTrail>,
    clock: Option<Arc<dyn Clock>>,
}

impl PostCall for AuditPostCall {
    fn after(&self, call: &Call<'_>, outcome: Outcome<'_>) -> Result<(), FragmentError> {
        self.trail.record(AuditEntry {
            at_millis: self.clock.as_ref().map(|clock| clock.now_millis()).unwrap_or_default(),
            capability: call.composite.to_string(),
            method: call.method().to_string(),
            succeeded: outcome.is_ok(),
            detail: match outcome {
                Ok(value) => value.to_string(),
                Err(err) => err.to_string(),
            },
        });
        Ok(())
    }
}

pub fn counter() -> CapabilityDeclaration {
    CapabilityDeclaration::new(COUNTER)
        .extends(DESCRIBABLE)
        .method(
            MethodDeclaration::new("increment")
                .param(step())
                .returns(ValueKind::Integer)
                .tag(AUDITED),
        )
        .method(MethodDeclaration::new("current").returns(ValueKind::Integer))
        .method(
            MethodDeclaration::new("reset")
                .returns(ValueKind::Integer)
                .tag(AUDITED),
        )
        .method(
            MethodDeclaration::new("add_twice")
                .param(step())
                .returns(ValueKind::Integer)
                .tag(AUDITED),
        )
        .fragment(
            FragmentDeclaration::new("CounterState", |injected| {
                let initial = injected
                    .state("initial")?
                    .and_then(Value::as_i64)
                    .unwrap_or_default();
                Ok(CounterState {
                    value: Mutex::new(initial),
                })
            })
            .implements(COUNTER)
            .applies_to(AppliesTo::methods(["increment", "current", "reset"]))
            .slot(InjectionSlot::state("initial").optional()),
        )
        .fragment(
            FragmentDeclaration::new("CounterTwice", |injected| {
                Ok(CounterTwice {
                    this: injected.this("self")?,
                })
            })
            .implements(COUNTER)
            .applies_to(AppliesTo::methods(["add_twice"]))
            .slot(InjectionSlot::this("self", COUNTER)),
        )
        .post_call(
            PostCallDeclaration::new("AuditPostCall", |injected| {
                Ok(AuditPostCall {
                    trail: injected.service::<AuditTrail>("trail")?,
                    clock: injected.optional_service::<dyn Clock>("clock")?,
                })
            })
            .applies_to(AppliesTo::tagged(AUDITED))
            .slot(InjectionSlot::service::<AuditTrail>("trail"))
            .slot(InjectionSlot::service::<dyn Clock>("clock").optional()),
        )
}
