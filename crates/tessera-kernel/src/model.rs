//! Compiled composite models.
//!
//! A [`CompositeModel`] is the immutable build plan of one capability: a
//! dispatch table from method to call plan, plus the deduplicated fragment
//! table every instance is built from. Models are shared by `Arc` across all
//! instances and threads.

use crate::declaration::{
    CapabilityId, FragmentClass, FragmentDeclaration, MethodSignature, ParameterDeclaration,
    PostCallDeclaration, ValueKind, WrapperDeclaration,
};
use crate::injection::{InjectionSlot, Scope};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentRole {
    Mixin,
    Wrapper,
    PostCall,
}

/// The declaration a fragment plan instantiates.
#[derive(Debug, Clone)]
pub(crate) enum FragmentSource {
    Mixin(Arc<FragmentDeclaration>),
    Wrapper(Arc<WrapperDeclaration>),
    PostCall(Arc<PostCallDeclaration>),
}

impl FragmentSource {
    pub(crate) fn role(&self) -> FragmentRole {
        match self {
            FragmentSource::Mixin(_) => FragmentRole::Mixin,
            FragmentSource::Wrapper(_) => FragmentRole::Wrapper,
            FragmentSource::PostCall(_) => FragmentRole::PostCall,
        }
    }

    pub(crate) fn class(&self) -> &FragmentClass {
        match self {
            FragmentSource::Mixin(decl) => &decl.class,
            FragmentSource::Wrapper(decl) => &decl.class,
            FragmentSource::PostCall(decl) => &decl.class,
        }
    }

    pub(crate) fn slots(&self) -> &[InjectionSlot] {
        match self {
            FragmentSource::Mixin(decl) => &decl.slots,
            FragmentSource::Wrapper(decl) => &decl.slots,
            FragmentSource::PostCall(decl) => &decl.slots,
        }
    }
}

/// One entry of the fragment table. Instances hold one fragment per plan.
#[derive(Debug, Clone)]
pub struct FragmentPlan {
    pub role: FragmentRole,
    pub class: FragmentClass,
    pub(crate) source: FragmentSource,
}

impl FragmentPlan {
    pub(crate) fn new(source: FragmentSource) -> Self {
        Self {
            role: source.role(),
            class: source.class().clone(),
            source,
        }
    }

    pub fn slots(&self) -> &[InjectionSlot] {
        self.source.slots()
    }
}

/// The call plan of one method. Indices point into the fragment table.
#[derive(Debug, Clone)]
pub struct MethodPlan {
    pub signature: MethodSignature,
    pub declared_on: CapabilityId,
    pub parameters: Vec<ParameterDeclaration>,
    pub returns: ValueKind,
    pub implementation: usize,
    /// Outermost first.
    pub wrappers: Vec<usize>,
    pub post_calls: Vec<usize>,
}

#[derive(Debug)]
pub struct CompositeModel {
    pub capability: CapabilityId,
    pub module: Option<String>,
    /// Every capability the composite implements.
    pub closure: BTreeSet<CapabilityId>,
    pub methods: Vec<MethodPlan>,
    pub fragments: Vec<FragmentPlan>,
    pub digest: String,
}

impl CompositeModel {
    pub fn implements(&self, capability: &CapabilityId) -> bool {
        self.closure.contains(capability)
    }

    /// Method names are unique within a composite's closure.
    pub fn method(&self, name: &str) -> Option<&MethodPlan> {
        self.methods.iter().find(|plan| plan.signature.name == name)
    }

    pub fn fragment(&self, index: usize) -> Option<&FragmentPlan> {
        self.fragments.get(index)
    }

    pub fn projection(&self) -> ModelProjection {
        let class_at = |index: &usize| {
            self.fragments
                .get(*index)
                .map(|plan| plan.class.to_string())
                .unwrap_or_default()
        };
        ModelProjection {
            capability: self.capability.clone(),
            module: self.module.clone(),
            closure: self.closure.iter().cloned().collect(),
            methods: self
                .methods
                .iter()
                .map(|plan| MethodProjection {
                    signature: plan.signature.to_string(),
                    declared_on: plan.declared_on.clone(),
                    parameters: plan
                        .parameters
                        .iter()
                        .map(|param| ParameterProjection {
                            name: param.name.clone(),
                            kind: param.kind,
                            optional: param.optional,
                            constraints: param
                                .constraints
                                .iter()
                                .map(|c| c.constraint.kind().to_string())
                                .collect(),
                        })
                        .collect(),
                    returns: plan.returns,
                    implementation: class_at(&plan.implementation),
                    wrappers: plan.wrappers.iter().map(class_at).collect(),
                    post_calls: plan.post_calls.iter().map(class_at).collect(),
                })
                .collect(),
            fragments: self
                .fragments
                .iter()
                .map(|plan| FragmentProjection {
                    role: plan.role,
                    class: plan.class.clone(),
                    slots: plan
                        .slots()
                        .iter()
                        .map(|slot| SlotProjection {
                            name: slot.name.clone(),
                            scope: slot.scope,
                            target: slot.target.to_string(),
                            optional: slot.optional,
                            multi: slot.multi,
                        })
                        .collect(),
                })
                .collect(),
            digest: self.digest.clone(),
        }
    }
}

/// Serializable view of a compiled model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProjection {
    pub capability: CapabilityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub closure: Vec<CapabilityId>,
    pub methods: Vec<MethodProjection>,
    pub fragments: Vec<FragmentProjection>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodProjection {
    pub signature: String,
    pub declared_on: CapabilityId,
    pub parameters: Vec<ParameterProjection>,
    pub returns: ValueKind,
    pub implementation: String,
    pub wrappers: Vec<String>,
    pub post_calls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterProjection {
    pub name: String,
    pub kind: ValueKind,
    pub optional: bool,
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentProjection {
    pub role: FragmentRole,
    pub class: FragmentClass,
    pub slots: Vec<SlotProjection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotProjection {
    pub name: String,
    pub scope: Scope,
    pub target: String,
    pub optional: bool,
    pub multi: bool,
}

/// `cm1_` + SHA-256 over the projection with an empty digest field.
pub(crate) fn model_digest(projection: &ModelProjection) -> String {
    let mut canonical = projection.clone();
    canonical.digest.clear();
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&canonical).unwrap_or_default());
    format!("cm1_{:x}", hasher.finalize())
}
