//! The per-call pipeline.
//!
//! ```text
//! Validating ──▶ Wrapping ──▶ Implementing ──▶ PostCall ──▶ Done
//!     │
//!     └──▶ Rejected
//! ```
//!
//! Validation collects every failing argument before rejecting. Wrappers run
//! outermost first, each deciding whether to delegate. Post-call observers
//! run once the implementation (or a short-circuiting wrapper) has finished,
//! whether it succeeded or failed; their own failures never reach the caller.

use crate::composite::{CompositeCore, FragmentInstance};
use crate::config::PostCallPolicy;
use crate::declaration::{CapabilityId, MethodSignature};
use crate::error::{ConstraintViolation, FragmentError, InvocationError, Violation};
use crate::model::MethodPlan;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Validating,
    Wrapping,
    Implementing,
    PostCall,
    Done,
    Rejected,
}

/// One method call as seen by fragments.
#[derive(Debug, Clone, Copy)]
pub struct Call<'a> {
    pub composite: &'a CapabilityId,
    pub plan: &'a MethodPlan,
    pub args: &'a [Value],
}

impl<'a> Call<'a> {
    pub fn method(&self) -> &'a str {
        &self.plan.signature.name
    }

    pub fn signature(&self) -> &'a MethodSignature {
        &self.plan.signature
    }

    pub fn declared_on(&self) -> &'a CapabilityId {
        &self.plan.declared_on
    }

    /// Argument bound to the parameter called `name`.
    pub fn arg(&self, name: &str) -> Option<&'a Value> {
        self.plan
            .parameters
            .iter()
            .position(|param| param.name == name)
            .and_then(|index| self.args.get(index))
    }
}

/// What a post-call observer sees: the caller's result or error.
pub type Outcome<'a> = Result<&'a Value, &'a FragmentError>;

/// The rest of the chain behind a wrapper.
pub struct Next<'a> {
    fragments: &'a [FragmentInstance],
    composite: &'a CapabilityId,
    plan: &'a MethodPlan,
    remaining: &'a [usize],
}

impl Next<'_> {
    /// Delegate to the next wrapper, or to the implementation. Wrappers may
    /// pass transformed arguments.
    pub fn proceed(&self, args: &[Value]) -> Result<Value, FragmentError> {
        run_chain(self.fragments, self.composite, self.plan, self.remaining, args)
    }
}

fn run_chain(
    fragments: &[FragmentInstance],
    composite: &CapabilityId,
    plan: &MethodPlan,
    remaining: &[usize],
    args: &[Value],
) -> Result<Value, FragmentError> {
    let call = Call {
        composite,
        plan,
        args,
    };
    match remaining.split_first() {
        Some((index, rest)) => {
            let wrapper = fragments
                .get(*index)
                .and_then(FragmentInstance::as_wrapper)
                .ok_or_else(|| broken_table(plan, *index))?;
            let next = Next {
                fragments,
                composite,
                plan,
                remaining: rest,
            };
            wrapper.around(&call, &next)
        }
        None => {
            trace!(method = %plan.signature, phase = ?CallPhase::Implementing);
            let mixin = fragments
                .get(plan.implementation)
                .and_then(FragmentInstance::as_mixin)
                .ok_or_else(|| broken_table(plan, plan.implementation))?;
            mixin.invoke(&call)
        }
    }
}

fn broken_table(plan: &MethodPlan, index: usize) -> FragmentError {
    FragmentError::msg(format!(
        "fragment #{index} planned for {} has the wrong role",
        plan.signature
    ))
}

/// Run one call through the whole pipeline.
pub(crate) fn dispatch(
    core: &CompositeCore,
    method: &str,
    args: &[Value],
) -> Result<Value, InvocationError> {
    let model = core.model();
    let fragments = core
        .fragments()
        .ok_or_else(|| InvocationError::Unavailable(model.capability.clone()))?;
    let plan = model
        .method(method)
        .ok_or_else(|| InvocationError::UnknownMethod {
            capability: model.capability.clone(),
            method: method.to_string(),
        })?;
    let config = core.module().config();

    trace!(composite = %model.capability, method = %plan.signature, phase = ?CallPhase::Validating);
    let args = bind_arguments(plan, args)?;
    let violations = validate(plan, &args, config.reject_null_arguments);
    if !violations.is_empty() {
        debug!(
            composite = %model.capability,
            method = %plan.signature,
            violations = violations.len(),
            phase = ?CallPhase::Rejected,
            "call rejected"
        );
        return Err(ConstraintViolation {
            capability: model.capability.clone(),
            method: plan.signature.clone(),
            violations,
        }
        .into());
    }

    trace!(method = %plan.signature, phase = ?CallPhase::Wrapping);
    let result = run_chain(fragments, &model.capability, plan, &plan.wrappers, &args);

    trace!(method = %plan.signature, phase = ?CallPhase::PostCall);
    let call = Call {
        composite: &model.capability,
        plan,
        args: &args,
    };
    let outcome: Outcome<'_> = result.as_ref();
    for index in &plan.post_calls {
        let Some(post_call) = fragments.get(*index).and_then(FragmentInstance::as_post_call) else {
            warn!(method = %plan.signature, index, "post-call fragment missing from table");
            continue;
        };
        if let Err(err) = post_call.after(&call, outcome) {
            match config.post_call_policy {
                PostCallPolicy::Log => warn!(
                    composite = %model.capability,
                    method = %plan.signature,
                    fragment = %model.fragments[*index].class,
                    error = %err,
                    "post-call fragment failed"
                ),
                PostCallPolicy::Ignore => {}
            }
        }
    }

    trace!(method = %plan.signature, phase = ?CallPhase::Done);
    result.map_err(InvocationError::from)
}

/// Check arity, padding missing trailing optional parameters with `null`.
fn bind_arguments<'a>(plan: &MethodPlan, args: &'a [Value]) -> Result<Cow<'a, [Value]>, InvocationError> {
    let expected = plan.parameters.len();
    if args.len() == expected {
        return Ok(Cow::Borrowed(args));
    }
    let missing_are_optional = args.len() < expected
        && plan.parameters[args.len()..].iter().all(|param| param.optional);
    if !missing_are_optional {
        return Err(InvocationError::ArityMismatch {
            method: plan.signature.clone(),
            expected,
            actual: args.len(),
        });
    }
    let mut padded = args.to_vec();
    padded.resize(expected, Value::Null);
    Ok(Cow::Owned(padded))
}

/// Every failing argument, in parameter order.
fn validate(plan: &MethodPlan, args: &[Value], reject_null: bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (param, arg) in plan.parameters.iter().zip(args) {
        if arg.is_null() && !param.optional && reject_null {
            violations.push(Violation {
                parameter: param.name.clone(),
                value: Value::Null,
                constraint: "not_null".to_string(),
            });
            continue;
        }
        if !arg.is_null() && !param.kind.accepts(arg) {
            violations.push(Violation {
                parameter: param.name.clone(),
                value: arg.clone(),
                constraint: format!("kind:{}", param.kind),
            });
            continue;
        }
        violations.extend(param.constraints.iter().filter_map(|c| c.check(arg)));
    }
    violations
}
