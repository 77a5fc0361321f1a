//! Fragment resolution over the declaration walk.
//!
//! The two searches deliberately terminate differently:
//!
//! - implementation fragments: first match wins. Typed fragments are searched
//!   across the whole walk before any generic fragment is considered.
//! - wrappers and post-calls: every match applies, in walk order, each class
//!   once at its first position. At the declaring node, directives attached
//!   to the method come before those attached to the capability.

use crate::declaration::{
    AppliesToContext, CapabilityDeclaration, CapabilityId, FragmentClass, FragmentDeclaration,
    MethodDeclaration, PostCallDeclaration, WrapperDeclaration,
};
use crate::error::ResolutionError;
use crate::graph::DeclarationGraph;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One method of a composite, as seen by the resolver.
#[derive(Clone, Copy)]
pub struct MethodSite<'a> {
    pub composite: &'a CapabilityId,
    pub declared_on: &'a CapabilityId,
    pub method: &'a MethodDeclaration,
}

impl<'a> MethodSite<'a> {
    fn context(&self, graph: &'a DeclarationGraph) -> AppliesToContext<'a> {
        AppliesToContext {
            graph,
            composite: self.composite,
            declared_on: self.declared_on,
            method: self.method,
        }
    }
}

/// Pick the implementation fragment for one method.
pub fn resolve_fragment(
    graph: &DeclarationGraph,
    site: MethodSite<'_>,
    module: Option<&str>,
) -> Result<Arc<FragmentDeclaration>, ResolutionError> {
    let ctx = site.context(graph);
    let walk = graph.walk(site.composite)?;
    let candidates = || {
        walk.iter()
            .filter_map(|node| graph.get(node))
            .flat_map(|decl| decl.fragments.iter())
    };

    candidates()
        .find(|fragment| fragment.implements_method(&ctx))
        .or_else(|| candidates().find(|fragment| fragment.dispatches_method(&ctx)))
        .cloned()
        .ok_or_else(|| ResolutionError::FragmentUnavailable {
            capability: site.composite.clone(),
            declared_on: site.declared_on.clone(),
            method: site.method.signature(),
            module: module.map(str::to_string),
        })
}

/// Collect the wrapper chain for one method, outermost first.
pub fn resolve_wrappers(
    graph: &DeclarationGraph,
    site: MethodSite<'_>,
) -> Result<Vec<Arc<WrapperDeclaration>>, ResolutionError> {
    collect_all(
        graph,
        site,
        |method| &method.wrappers,
        |decl| &decl.wrappers,
        |wrapper| &wrapper.class,
        |wrapper, ctx| wrapper.accepts(ctx),
    )
}

/// Collect the post-call observers for one method, in run order.
pub fn resolve_post_calls(
    graph: &DeclarationGraph,
    site: MethodSite<'_>,
) -> Result<Vec<Arc<PostCallDeclaration>>, ResolutionError> {
    collect_all(
        graph,
        site,
        |method| &method.post_calls,
        |decl| &decl.post_calls,
        |post_call| &post_call.class,
        |post_call, ctx| post_call.accepts(ctx),
    )
}

fn collect_all<T>(
    graph: &DeclarationGraph,
    site: MethodSite<'_>,
    on_method: impl Fn(&MethodDeclaration) -> &Vec<Arc<T>>,
    on_capability: impl Fn(&CapabilityDeclaration) -> &Vec<Arc<T>>,
    class_of: impl Fn(&T) -> &FragmentClass,
    accepts: impl Fn(&T, &AppliesToContext<'_>) -> bool,
) -> Result<Vec<Arc<T>>, ResolutionError> {
    let ctx = site.context(graph);
    let mut seen = BTreeSet::new();
    let mut chain = Vec::new();
    for node in graph.walk(site.composite)? {
        let Some(decl) = graph.get(node) else {
            continue;
        };
        let method_level = if node == site.declared_on {
            on_method(site.method).as_slice()
        } else {
            &[]
        };
        for directive in method_level.iter().chain(on_capability(decl)) {
            if accepts(directive, &ctx) && seen.insert(class_of(directive).clone()) {
                chain.push(Arc::clone(directive));
            }
        }
    }
    Ok(chain)
}
