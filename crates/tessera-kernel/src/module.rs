//! Modules: the assembly unit that owns a declaration graph, its model
//! cache and the collaborators composites are built against.

use crate::builder::build_composite;
use crate::compiler::ModelCompiler;
use crate::composite::Composite;
use crate::config::RuntimeConfig;
use crate::declaration::{CapabilityDeclaration, CapabilityId};
use crate::error::{BuildError, ResolutionError};
use crate::graph::DeclarationGraph;
use crate::injection::{TypeKey, Uses};
use crate::lifecycle::LifecycleSink;
use crate::model::CompositeModel;
use crate::services::{MemoryServiceRegistry, Qualifier, ServiceReference, ServiceRegistry};
use crate::state::{NoStateLoader, StateLoader};
use std::fmt;
use std::sync::Arc;
use tracing::info;

struct ModuleInner {
    name: String,
    layer: String,
    config: Arc<RuntimeConfig>,
    compiler: ModelCompiler,
    services: Arc<dyn ServiceRegistry>,
    state: Arc<dyn StateLoader>,
    sinks: Vec<Arc<dyn LifecycleSink>>,
}

/// A cheaply cloneable handle to an assembled module.
#[derive(Clone)]
pub struct Module {
    inner: Arc<ModuleInner>,
}

impl Module {
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn layer(&self) -> &str {
        &self.inner.layer
    }

    pub fn config(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.inner.config)
    }

    pub fn graph(&self) -> &DeclarationGraph {
        self.inner.compiler.graph()
    }

    pub fn compiler(&self) -> &ModelCompiler {
        &self.inner.compiler
    }

    /// The cached model of `capability`, compiled on first use.
    pub fn model(&self, capability: &CapabilityId) -> Result<Arc<CompositeModel>, ResolutionError> {
        self.inner.compiler.model(capability)
    }

    /// Compile every declared capability, in declaration order.
    pub fn compile_all(&self) -> Vec<(CapabilityId, Result<Arc<CompositeModel>, ResolutionError>)> {
        self.graph()
            .capabilities()
            .map(|id| (id.clone(), self.model(id)))
            .collect()
    }

    pub fn new_composite(
        &self,
        capability: impl Into<CapabilityId>,
        uses: Uses,
    ) -> Result<Composite, BuildError> {
        let model = self.model(&capability.into())?;
        build_composite(self, model, &uses)
    }

    pub(crate) fn sinks(&self) -> &[Arc<dyn LifecycleSink>] {
        &self.inner.sinks
    }

    pub(crate) fn state_loader(&self) -> &dyn StateLoader {
        self.inner.state.as_ref()
    }

    /// Service candidates this module may see, in registration order.
    pub(crate) fn visible_services(&self, key: &TypeKey, qualifiers: &[Qualifier]) -> Vec<ServiceReference> {
        let registry = &self.inner.services;
        registry
            .find_by_type(key, qualifiers)
            .into_iter()
            .filter(|candidate| {
                candidate.visible_from(registry.visibility_of(candidate), self.name(), self.layer())
            })
            .collect()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.inner.name)
            .field("layer", &self.inner.layer)
            .field("sinks", &self.inner.sinks.len())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Module`].
///
/// Services added with [`ModuleBuilder::service`] go into an in-memory
/// registry; references without an owner are registered under this module.
/// A custom registry set with [`ModuleBuilder::registry`] replaces it.
#[derive(Default)]
pub struct ModuleBuilder {
    config: RuntimeConfig,
    declarations: Vec<CapabilityDeclaration>,
    services: Vec<ServiceReference>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    state: Option<Arc<dyn StateLoader>>,
    sinks: Vec<Arc<dyn LifecycleSink>>,
}

impl ModuleBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn declare(mut self, declaration: CapabilityDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    pub fn declare_all(mut self, declarations: impl IntoIterator<Item = CapabilityDeclaration>) -> Self {
        self.declarations.extend(declarations);
        self
    }

    pub fn service(mut self, reference: ServiceReference) -> Self {
        self.services.push(reference);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn state_loader(mut self, loader: Arc<dyn StateLoader>) -> Self {
        self.state = Some(loader);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LifecycleSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate the declarations and assemble the module. Models are not
    /// compiled until first requested.
    pub fn build(self) -> Result<Module, ResolutionError> {
        let graph = DeclarationGraph::new(self.declarations)?;
        let name = self.config.module.clone();
        let layer = self.config.layer.clone();

        let services: Arc<dyn ServiceRegistry> = match self.registry {
            Some(registry) => registry,
            None => {
                let registry = MemoryServiceRegistry::new();
                for reference in self.services {
                    let reference = if reference.module.is_empty() {
                        reference.in_module(name.clone(), layer.clone())
                    } else {
                        reference
                    };
                    registry.register(reference);
                }
                Arc::new(registry)
            }
        };

        info!(
            module = %name,
            layer = %layer,
            capabilities = graph.capabilities().count(),
            "module assembled"
        );

        Ok(Module {
            inner: Arc::new(ModuleInner {
                compiler: ModelCompiler::new(Arc::new(graph), Some(name.clone())),
                name,
                layer,
                config: Arc::new(self.config),
                services,
                state: self.state.unwrap_or_else(|| Arc::new(NoStateLoader)),
                sinks: self.sinks,
            }),
        })
    }
}
