//! Model compilation and the per-module model cache.

use crate::declaration::{CapabilityId, FragmentClass};
use crate::error::ResolutionError;
use crate::graph::DeclarationGraph;
use crate::model::{CompositeModel, FragmentPlan, FragmentRole, FragmentSource, MethodPlan, model_digest};
use crate::resolver::{MethodSite, resolve_fragment, resolve_post_calls, resolve_wrappers};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Compile the model of `capability`. Pure and deterministic: the same graph
/// always yields the same model and digest. Any unresolved method aborts the
/// whole compilation.
pub fn compile_model(
    graph: &DeclarationGraph,
    capability: &CapabilityId,
    module: Option<&str>,
) -> Result<CompositeModel, ResolutionError> {
    let closure = graph.closure(capability)?.clone();
    let mut table = FragmentTable::default();
    let mut methods = Vec::new();

    for reachable in graph.methods(capability)? {
        let site = MethodSite {
            composite: capability,
            declared_on: reachable.declared_on,
            method: reachable.method,
        };
        let implementation = resolve_fragment(graph, site, module)?;
        let implementation = table.intern(FragmentSource::Mixin(implementation));
        let wrappers = resolve_wrappers(graph, site)?
            .into_iter()
            .map(|decl| table.intern(FragmentSource::Wrapper(decl)))
            .collect();
        let post_calls = resolve_post_calls(graph, site)?
            .into_iter()
            .map(|decl| table.intern(FragmentSource::PostCall(decl)))
            .collect();

        methods.push(MethodPlan {
            signature: reachable.method.signature(),
            declared_on: reachable.declared_on.clone(),
            parameters: reachable.method.params.clone(),
            returns: reachable.method.returns,
            implementation,
            wrappers,
            post_calls,
        });
    }

    let mut model = CompositeModel {
        capability: capability.clone(),
        module: module.map(str::to_string),
        closure,
        methods,
        fragments: table.plans,
        digest: String::new(),
    };
    model.digest = model_digest(&model.projection());
    Ok(model)
}

/// Fragment plans deduplicated by role and class, in first-use order.
#[derive(Default)]
struct FragmentTable {
    plans: Vec<FragmentPlan>,
    index: BTreeMap<(FragmentRole, FragmentClass), usize>,
}

impl FragmentTable {
    fn intern(&mut self, source: FragmentSource) -> usize {
        let key = (source.role(), source.class().clone());
        if let Some(existing) = self.index.get(&key) {
            return *existing;
        }
        let position = self.plans.len();
        self.plans.push(FragmentPlan::new(source));
        self.index.insert(key, position);
        position
    }
}

/// Compiles models lazily and caches them for the lifetime of the compiler.
///
/// Each capability is compiled at most once even when many threads ask for
/// it concurrently: callers racing on the same capability block on one
/// `OnceCell` while a single thread compiles. A failed compilation leaves
/// the cell empty.
pub struct ModelCompiler {
    graph: Arc<DeclarationGraph>,
    module: Option<String>,
    models: RwLock<BTreeMap<CapabilityId, Arc<OnceCell<Arc<CompositeModel>>>>>,
    compilations: AtomicUsize,
}

impl ModelCompiler {
    pub fn new(graph: Arc<DeclarationGraph>, module: Option<String>) -> Self {
        Self {
            graph,
            module,
            models: RwLock::new(BTreeMap::new()),
            compilations: AtomicUsize::new(0),
        }
    }

    pub fn graph(&self) -> &Arc<DeclarationGraph> {
        &self.graph
    }

    pub fn model(&self, capability: &CapabilityId) -> Result<Arc<CompositeModel>, ResolutionError> {
        if !self.graph.contains(capability) {
            return Err(ResolutionError::UnknownCapability {
                capability: capability.clone(),
                referenced_by: None,
            });
        }
        let cell = self.cell(capability);
        cell.get_or_try_init(|| {
            debug!(capability = %capability, module = ?self.module, "compiling composite model");
            self.compilations.fetch_add(1, Ordering::Relaxed);
            let model = compile_model(&self.graph, capability, self.module.as_deref())?;
            info!(
                capability = %capability,
                methods = model.methods.len(),
                fragments = model.fragments.len(),
                digest = %model.digest,
                "composite model compiled"
            );
            Ok(Arc::new(model))
        })
        .cloned()
    }

    /// Number of compilations started, successful or not.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    pub fn cached(&self) -> usize {
        self.models
            .read()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    fn cell(&self, capability: &CapabilityId) -> Arc<OnceCell<Arc<CompositeModel>>> {
        if let Some(cell) = self.models.read().get(capability) {
            return Arc::clone(cell);
        }
        Arc::clone(self.models.write().entry(capability.clone()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{
        CapabilityDeclaration, FragmentDeclaration, MethodDeclaration, Mixin, PostCall,
        PostCallDeclaration,
    };
    use crate::error::FragmentError;
    use crate::invocation::{Call, Outcome};
    use serde_json::Value;

    struct Noop;

    impl Mixin for Noop {
        fn invoke(&self, _call: &Call<'_>) -> Result<Value, FragmentError> {
            Ok(Value::Null)
        }
    }

    impl PostCall for Noop {
        fn after(&self, _call: &Call<'_>, _outcome: Outcome<'_>) -> Result<(), FragmentError> {
            Ok(())
        }
    }

    fn graph() -> DeclarationGraph {
        DeclarationGraph::new([CapabilityDeclaration::new("Counter")
            .method(MethodDeclaration::new("increment"))
            .method(MethodDeclaration::new("current"))
            .fragment(FragmentDeclaration::new("CounterState", |_| Ok(Noop)).implements("Counter"))
            .post_call(PostCallDeclaration::new("Audit", |_| Ok(Noop)))])
        .unwrap()
    }

    #[test]
    fn shared_fragment_classes_get_one_table_entry() {
        let model = compile_model(&graph(), &"Counter".into(), None).unwrap();
        assert_eq!(model.fragments.len(), 2);
        assert_eq!(model.methods[0].implementation, model.methods[1].implementation);
        assert_eq!(model.methods[0].post_calls, model.methods[1].post_calls);
    }

    #[test]
    fn digest_is_deterministic() {
        let a = compile_model(&graph(), &"Counter".into(), None).unwrap();
        let b = compile_model(&graph(), &"Counter".into(), None).unwrap();
        assert!(a.digest.starts_with("cm1_"));
        assert_eq!(a.digest, b.digest);
        let other = compile_model(&graph(), &"Counter".into(), Some("app")).unwrap();
        assert_ne!(a.digest, other.digest);
    }

    #[test]
    fn compiler_caches_models() {
        let compiler = ModelCompiler::new(Arc::new(graph()), None);
        let first = compiler.model(&"Counter".into()).unwrap();
        let second = compiler.model(&"Counter".into()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.compilations(), 1);
        assert_eq!(compiler.cached(), 1);
    }

    #[test]
    fn unknown_capability_is_not_cached() {
        let compiler = ModelCompiler::new(Arc::new(graph()), None);
        let err = compiler.model(&"Missing".into()).unwrap_err();
        assert_eq!(err.failure_class(), "unknown_capability");
        assert_eq!(compiler.cached(), 0);
        assert_eq!(compiler.compilations(), 0);
        assert!(compiler.models.read().is_empty());
    }
}
