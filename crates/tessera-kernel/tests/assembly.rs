use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tessera_kernel::{
    BuildError, Call, CapabilityDeclaration, Composite, CompositeInfo, FragmentDeclaration,
    FragmentError, InjectionError, InjectionSlot, LifecycleSink, MemoryServiceRegistry,
    MemoryStateLoader, MethodDeclaration, Mixin, Module, Qualifier, RuntimeConfig, Scope,
    ServiceReference, StateKey, StateLoader, Uses, Visibility,
};

#[derive(Debug)]
struct Endpoint(String);

fn config() -> RuntimeConfig {
    RuntimeConfig {
        module: "test".to_string(),
        layer: "domain".to_string(),
        ..RuntimeConfig::default()
    }
}

fn single_method(capability: &str, fragment: FragmentDeclaration) -> CapabilityDeclaration {
    CapabilityDeclaration::new(capability)
        .method(MethodDeclaration::new("call"))
        .fragment(fragment.implements(capability))
}

struct Wiring {
    primary: Arc<Endpoint>,
    backup: Arc<Endpoint>,
    all: Vec<Arc<Endpoint>>,
    missing: Option<Arc<u64>>,
}

impl Mixin for Wiring {
    fn invoke(&self, _call: &Call<'_>) -> Result<Value, FragmentError> {
        let all: Vec<&str> = self.all.iter().map(|e| e.0.as_str()).collect();
        Ok(json!({
            "primary": self.primary.0,
            "backup": self.backup.0,
            "all": all,
            "missing": self.missing.is_none(),
        }))
    }
}

fn wiring() -> FragmentDeclaration {
    FragmentDeclaration::new("Wiring", |injected| {
        Ok(Wiring {
            primary: injected.service::<Endpoint>("primary")?,
            backup: injected.service::<Endpoint>("backup")?,
            all: injected.services("all")?.instances::<Endpoint>().collect(),
            missing: injected.optional_service::<u64>("missing")?,
        })
    })
    .slot(InjectionSlot::service::<Endpoint>("primary"))
    .slot(InjectionSlot::service::<Endpoint>("backup").qualified(Qualifier::tagged("backup")))
    .slot(InjectionSlot::service::<Endpoint>("all").multi())
    .slot(InjectionSlot::service::<u64>("missing").optional())
}

fn endpoints() -> Arc<MemoryServiceRegistry> {
    let registry = MemoryServiceRegistry::new();
    let endpoint = |name: &str| Arc::new(Endpoint(name.to_string()));
    registry.register(
        ServiceReference::new("hidden", endpoint("hidden"))
            .in_module("other", "domain")
            .visible_to(Visibility::Module),
    );
    registry.register(
        ServiceReference::new("main", endpoint("main"))
            .in_module("other", "domain")
            .visible_to(Visibility::Layer),
    );
    registry.register(
        ServiceReference::new("spare", endpoint("spare"))
            .in_module("infra", "platform")
            .visible_to(Visibility::Application)
            .tag("backup"),
    );
    Arc::new(registry)
}

#[test]
fn services_respect_visibility_and_qualifiers() {
    let module = Module::builder()
        .config(config())
        .declare(single_method("Wired", wiring()))
        .registry(endpoints())
        .build()
        .unwrap();
    let wired = module.new_composite("Wired", Uses::new()).unwrap();
    assert_eq!(
        wired.invoke("call", &[]).unwrap(),
        json!({
            "primary": "main",
            "backup": "spare",
            "all": ["main", "spare"],
            "missing": true,
        })
    );
}

#[test]
fn builder_services_default_to_the_module() {
    let module = Module::builder()
        .config(config())
        .declare(single_method("Wired", wiring()))
        .service(ServiceReference::new("local", Arc::new(Endpoint("local".to_string()))).tag("backup"))
        .build()
        .unwrap();
    let wired = module.new_composite("Wired", Uses::new()).unwrap();
    let result = wired.invoke("call", &[]).unwrap();
    assert_eq!(result["primary"], json!("local"));
    assert_eq!(result["all"], json!(["local"]));
}

struct Nothing;

impl Mixin for Nothing {
    fn invoke(&self, _call: &Call<'_>) -> Result<Value, FragmentError> {
        Ok(Value::Null)
    }
}

fn unsatisfied(err: BuildError) -> (String, Scope) {
    match err {
        BuildError::Injection(InjectionError::Unsatisfied { slot, scope, .. }) => (slot, scope),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn required_service_without_candidates_fails_the_build() {
    let module = Module::builder()
        .config(config())
        .declare(single_method(
            "Needy",
            FragmentDeclaration::new("Needy", |_| Ok(Nothing)).slot(InjectionSlot::service::<u64>("count")),
        ))
        .build()
        .unwrap();
    let err = module.new_composite("Needy", Uses::new()).unwrap_err();
    assert_eq!(unsatisfied(err), ("count".to_string(), Scope::Service));
}

#[test]
fn multi_slots_need_a_candidate_unless_optional() {
    let required = Module::builder()
        .config(config())
        .declare(single_method(
            "Fanout",
            FragmentDeclaration::new("Fanout", |_| Ok(Nothing)).slot(InjectionSlot::service::<u32>("sinks").multi()),
        ))
        .build()
        .unwrap();
    let err = required.new_composite("Fanout", Uses::new()).unwrap_err();
    assert_eq!(unsatisfied(err), ("sinks".to_string(), Scope::Service));

    let seen = Arc::new(Mutex::new(None));
    let observed = Arc::clone(&seen);
    let optional = Module::builder()
        .config(config())
        .declare(single_method(
            "Fanout",
            FragmentDeclaration::new("Fanout", move |injected| {
                *observed.lock() = Some(injected.services("sinks")?.len());
                Ok(Nothing)
            })
            .slot(InjectionSlot::service::<u32>("sinks").multi().optional()),
        ))
        .build()
        .unwrap();
    optional.new_composite("Fanout", Uses::new()).unwrap();
    assert_eq!(*seen.lock(), Some(0));
}

struct Stored {
    value: Value,
}

impl Mixin for Stored {
    fn invoke(&self, _call: &Call<'_>) -> Result<Value, FragmentError> {
        Ok(self.value.clone())
    }
}

fn stored(slot: InjectionSlot) -> CapabilityDeclaration {
    single_method(
        "Stored",
        FragmentDeclaration::new("Stored", |injected| {
            Ok(Stored {
                value: injected.state("seed")?.cloned().unwrap_or(json!("fresh")),
            })
        })
        .slot(slot),
    )
}

fn stored_module(slot: InjectionSlot, loader: Arc<dyn StateLoader>) -> Module {
    Module::builder()
        .config(config())
        .declare(stored(slot))
        .state_loader(loader)
        .build()
        .unwrap()
}

#[test]
fn state_slots_read_from_the_loader() {
    let loader = Arc::new(MemoryStateLoader::new());
    let module = stored_module(InjectionSlot::state("seed").optional(), Arc::clone(&loader) as Arc<dyn StateLoader>);

    let fresh = module.new_composite("Stored", Uses::new()).unwrap();
    assert_eq!(fresh.invoke("call", &[]).unwrap(), json!("fresh"));

    loader.store(StateKey::new("Stored", "seed"), json!({"count": 3}));
    let restored = module.new_composite("Stored", Uses::new()).unwrap();
    assert_eq!(restored.invoke("call", &[]).unwrap(), json!({"count": 3}));
}

#[test]
fn required_state_must_exist() {
    let module = stored_module(InjectionSlot::state("seed"), Arc::new(MemoryStateLoader::new()));
    let err = module.new_composite("Stored", Uses::new()).unwrap_err();
    assert_eq!(unsatisfied(err), ("seed".to_string(), Scope::State));
}

struct BrokenLoader;

impl StateLoader for BrokenLoader {
    fn load_state(&self, _key: &StateKey) -> Result<Option<Value>, String> {
        Err("store offline".to_string())
    }
}

#[test]
fn state_loader_failures_are_reported() {
    let module = stored_module(InjectionSlot::state("seed").optional(), Arc::new(BrokenLoader));
    let err = module.new_composite("Stored", Uses::new()).unwrap_err();
    assert_eq!(err.failure_class(), "state_load_failed");
    assert!(err.to_string().contains("store offline"));
}

#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl Events {
    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

impl LifecycleSink for Events {
    fn on_built(&self, composite: &Composite) {
        self.0.lock().push(format!("built:{}", composite.capability()));
    }

    fn on_discarded(&self, info: &CompositeInfo) {
        self.0.lock().push(format!("discarded:{}", info.capability));
    }
}

struct Hooked {
    fail: bool,
    events: Arc<Events>,
}

impl Mixin for Hooked {
    fn invoke(&self, _call: &Call<'_>) -> Result<Value, FragmentError> {
        Ok(Value::Null)
    }

    fn on_built(&self) -> Result<(), FragmentError> {
        if self.fail {
            return Err(FragmentError::msg("not ready"));
        }
        self.events.0.lock().push("hook:built".to_string());
        Ok(())
    }

    fn on_discard(&self) {
        self.events.0.lock().push("hook:discard".to_string());
    }
}

fn hooked(capability: &str, fail: bool) -> CapabilityDeclaration {
    single_method(
        capability,
        FragmentDeclaration::new(format!("{capability}Impl"), move |injected| {
            Ok(Hooked {
                fail,
                events: injected.uses::<Events>("events")?,
            })
        })
        .slot(InjectionSlot::uses::<Events>("events")),
    )
}

fn lifecycle_module(events: &Arc<Events>, notify: bool) -> Module {
    Module::builder()
        .config(RuntimeConfig {
            notify_lifecycle_sinks: notify,
            ..config()
        })
        .declare(hooked("Steady", false))
        .declare(hooked("Fragile", true))
        .sink(Arc::clone(events) as Arc<dyn LifecycleSink>)
        .build()
        .unwrap()
}

#[test]
fn lifecycle_hooks_and_sinks_bracket_the_instance() {
    let events = Arc::new(Events::default());
    let module = lifecycle_module(&events, true);
    let steady = module
        .new_composite("Steady", Uses::new().with_shared(Arc::clone(&events)))
        .unwrap();
    assert_eq!(events.entries(), vec!["hook:built", "built:Steady"]);

    drop(steady);
    assert_eq!(
        events.entries(),
        vec!["hook:built", "built:Steady", "hook:discard", "discarded:Steady"]
    );
}

#[test]
fn failing_on_built_aborts_without_notifications() {
    let events = Arc::new(Events::default());
    let module = lifecycle_module(&events, true);
    let err = module
        .new_composite("Fragile", Uses::new().with_shared(Arc::clone(&events)))
        .unwrap_err();
    match &err {
        BuildError::Lifecycle { fragment, .. } => assert_eq!(fragment.as_str(), "FragileImpl"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(events.entries().is_empty());
}

#[test]
fn sinks_can_be_silenced() {
    let events = Arc::new(Events::default());
    let module = lifecycle_module(&events, false);
    let steady = module
        .new_composite("Steady", Uses::new().with_shared(Arc::clone(&events)))
        .unwrap();
    drop(steady);
    assert_eq!(events.entries(), vec!["hook:built", "hook:discard"]);
}

#[test]
fn factory_failures_name_the_fragment() {
    let module = Module::builder()
        .config(config())
        .declare(single_method(
            "Faulty",
            FragmentDeclaration::new("Faulty", |_| Err::<Nothing, _>(FragmentError::msg("no socket"))),
        ))
        .build()
        .unwrap();
    let err = module.new_composite("Faulty", Uses::new()).unwrap_err();
    assert_eq!(err.failure_class(), "construction_failed");
    assert_eq!(err.to_string(), "fragment Faulty failed to construct: no socket");
}
