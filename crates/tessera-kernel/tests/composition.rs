use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tessera_kernel::{
    AppliesTo, BuildError, Call, CapabilityDeclaration, Constraint, FragmentDeclaration,
    FragmentError, FragmentRole, InjectionSlot, InvocationError, MethodDeclaration, Mixin, Module,
    Next, Outcome, ParameterDeclaration, PostCall, PostCallDeclaration, ResolutionError,
    RuntimeConfig, Uses, ValueKind, Wrapper, WrapperDeclaration,
};

#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

fn journal_slot() -> InjectionSlot {
    InjectionSlot::uses::<Journal>("journal")
}

fn module(declarations: Vec<CapabilityDeclaration>) -> Module {
    module_with(declarations, RuntimeConfig::default())
}

fn module_with(declarations: Vec<CapabilityDeclaration>, config: RuntimeConfig) -> Module {
    Module::builder()
        .config(RuntimeConfig {
            module: "test".to_string(),
            ..config
        })
        .declare_all(declarations)
        .build()
        .unwrap()
}

fn with_journal() -> (Arc<Journal>, Uses) {
    let journal = Arc::new(Journal::default());
    let uses = Uses::new().with_shared(Arc::clone(&journal));
    (journal, uses)
}

struct GreeterImpl {
    journal: Arc<Journal>,
}

impl Mixin for GreeterImpl {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError> {
        self.journal.push("GreeterImpl");
        let name = call.arg("name").and_then(Value::as_str).unwrap_or_default();
        Ok(json!(format!("Hello, {name}")))
    }
}

struct UpperCaseWrapper;

impl Wrapper for UpperCaseWrapper {
    fn around(&self, call: &Call<'_>, next: &Next<'_>) -> Result<Value, FragmentError> {
        let result = next.proceed(call.args)?;
        Ok(result
            .as_str()
            .map(|text| json!(text.to_uppercase()))
            .unwrap_or(result))
    }
}

fn greeter() -> CapabilityDeclaration {
    CapabilityDeclaration::new("Greeter")
        .method(
            MethodDeclaration::new("greet")
                .param(ParameterDeclaration::new("name", ValueKind::String).constrain(Constraint::NotEmpty))
                .returns(ValueKind::String),
        )
        .fragment(
            FragmentDeclaration::new("GreeterImpl", |injected| {
                Ok(GreeterImpl {
                    journal: injected.uses::<Journal>("journal")?,
                })
            })
            .implements("Greeter")
            .slot(journal_slot()),
        )
        .wrapper(WrapperDeclaration::new("UpperCaseWrapper", |_| Ok(UpperCaseWrapper)))
}

#[test]
fn greeter_scenario() {
    let module = module(vec![greeter()]);
    let (journal, uses) = with_journal();
    let greeter = module.new_composite("Greeter", uses).unwrap();

    assert_eq!(greeter.invoke("greet", &[json!("Alice")]).unwrap(), json!("HELLO, ALICE"));
    assert_eq!(journal.entries(), vec!["GreeterImpl"]);

    let err = greeter.invoke("greet", &[json!("")]).unwrap_err();
    let violation = err.violation().expect("rejected before dispatch");
    assert!(violation.names("name"));
    assert_eq!(violation.violations[0].constraint, "not_empty");
    assert_eq!(violation.violations[0].value, json!(""));
    assert_eq!(journal.entries(), vec!["GreeterImpl"], "implementation must not run");
}

#[test]
fn null_arguments_follow_config() {
    let strict = module(vec![greeter()]);
    let (_, uses) = with_journal();
    let strict_greeter = strict.new_composite("Greeter", uses).unwrap();
    let err = strict_greeter.invoke("greet", &[Value::Null]).unwrap_err();
    assert_eq!(err.violation().unwrap().violations[0].constraint, "not_null");

    let lenient = module_with(
        vec![greeter()],
        RuntimeConfig {
            reject_null_arguments: false,
            ..RuntimeConfig::default()
        },
    );
    let (_, uses) = with_journal();
    let lenient_greeter = lenient.new_composite("Greeter", uses).unwrap();
    assert_eq!(lenient_greeter.invoke("greet", &[Value::Null]).unwrap(), json!("HELLO, "));
}

#[test]
fn arity_and_unknown_methods_are_reported() {
    let module = module(vec![greeter()]);
    let (_, uses) = with_journal();
    let greeter = module.new_composite("Greeter", uses).unwrap();

    assert!(matches!(
        greeter.invoke("greet", &[json!("a"), json!("b")]),
        Err(InvocationError::ArityMismatch { expected: 1, actual: 2, .. })
    ));
    assert!(matches!(
        greeter.invoke("wave", &[]),
        Err(InvocationError::UnknownMethod { .. })
    ));
}

struct Tagging {
    label: &'static str,
    journal: Arc<Journal>,
}

impl Wrapper for Tagging {
    fn around(&self, call: &Call<'_>, next: &Next<'_>) -> Result<Value, FragmentError> {
        self.journal.push(format!("{}>", self.label));
        let result = next.proceed(call.args);
        self.journal.push(format!("<{}", self.label));
        result
    }
}

fn tagging(label: &'static str) -> WrapperDeclaration {
    WrapperDeclaration::new(label, move |injected| {
        Ok(Tagging {
            label,
            journal: injected.uses::<Journal>("journal")?,
        })
    })
    .slot(journal_slot())
}

struct Recording {
    journal: Arc<Journal>,
}

impl Mixin for Recording {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError> {
        self.journal.push(call.method());
        if call.arg("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(FragmentError::msg("boom"));
        }
        Ok(json!("done"))
    }
}

fn recording(class: &str) -> FragmentDeclaration {
    FragmentDeclaration::new(class, |injected| {
        Ok(Recording {
            journal: injected.uses::<Journal>("journal")?,
        })
    })
    .slot(journal_slot())
}

#[test]
fn wrapper_chain_follows_walk_order() {
    let module = module(vec![
        CapabilityDeclaration::new("Super").wrapper(tagging("C")),
        CapabilityDeclaration::new("Thing")
            .extends("Super")
            .method(MethodDeclaration::new("run"))
            .fragment(recording("ThingImpl").implements("Thing"))
            .wrapper(tagging("A"))
            .wrapper(tagging("B")),
    ]);
    let (journal, uses) = with_journal();
    let thing = module.new_composite("Thing", uses).unwrap();
    thing.invoke("run", &[]).unwrap();
    assert_eq!(
        journal.entries(),
        vec!["A>", "B>", "C>", "run", "<C", "<B", "<A"]
    );

    let plan = thing.model().method("run").unwrap();
    let classes: Vec<&str> = plan
        .wrappers
        .iter()
        .map(|index| thing.model().fragments[*index].class.as_str())
        .collect();
    assert_eq!(classes, vec!["A", "B", "C"]);
}

struct Cell {
    value: Mutex<i64>,
}

impl Mixin for Cell {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError> {
        let mut value = self.value.lock();
        if call.method() == "set" {
            *value = call.arg("value").and_then(Value::as_i64).unwrap_or_default();
        }
        Ok(json!(*value))
    }
}

#[test]
fn one_fragment_instance_services_every_method_it_resolves() {
    let module = module(vec![CapabilityDeclaration::new("Register")
        .method(MethodDeclaration::new("set").param(ParameterDeclaration::new("value", ValueKind::Integer)))
        .method(MethodDeclaration::new("get"))
        .fragment(
            FragmentDeclaration::new("Cell", |_| {
                Ok(Cell {
                    value: Mutex::new(0),
                })
            })
            .implements("Register"),
        )]);
    let register = module.new_composite("Register", Uses::new()).unwrap();
    let mixins = register
        .model()
        .fragments
        .iter()
        .filter(|plan| plan.role == FragmentRole::Mixin)
        .count();
    assert_eq!(mixins, 1);

    register.invoke("set", &[json!(5)]).unwrap();
    assert_eq!(register.invoke("get", &[]).unwrap(), json!(5));
}

#[test]
fn every_failing_constraint_is_reported() {
    let module = module(vec![CapabilityDeclaration::new("Form")
        .method(
            MethodDeclaration::new("submit")
                .param(ParameterDeclaration::new("title", ValueKind::String).constrain(Constraint::NotEmpty))
                .param(ParameterDeclaration::new("count", ValueKind::Integer).constrain(Constraint::range(0.0, 10.0)))
                .param(
                    ParameterDeclaration::new("slug", ValueKind::String)
                        .constrain(Constraint::matches("[a-z]+").unwrap()),
                ),
        )
        .fragment(recording("FormImpl").implements("Form"))]);
    let (journal, uses) = with_journal();
    let form = module.new_composite("Form", uses).unwrap();

    let err = form
        .invoke("submit", &[json!(""), json!(11), json!("X1")])
        .unwrap_err();
    let violation = err.violation().unwrap();
    let failing: Vec<(&str, &str)> = violation
        .violations
        .iter()
        .map(|v| (v.parameter.as_str(), v.constraint.as_str()))
        .collect();
    assert_eq!(
        failing,
        vec![("title", "not_empty"), ("count", "range"), ("slug", "matches")]
    );
    assert!(journal.entries().is_empty());
}

struct Observer {
    journal: Arc<Journal>,
}

impl PostCall for Observer {
    fn after(&self, call: &Call<'_>, outcome: Outcome<'_>) -> Result<(), FragmentError> {
        let status = match outcome {
            Ok(_) => "ok".to_string(),
            Err(err) => format!("err({err})"),
        };
        self.journal.push(format!("post:{}:{status}", call.method()));
        Err(FragmentError::msg("observer failures stay isolated"))
    }
}

fn observer() -> PostCallDeclaration {
    PostCallDeclaration::new("Observer", |injected| {
        Ok(Observer {
            journal: injected.uses::<Journal>("journal")?,
        })
    })
    .slot(journal_slot())
}

fn job() -> CapabilityDeclaration {
    CapabilityDeclaration::new("Job")
        .method(MethodDeclaration::new("run").param(ParameterDeclaration::new("fail", ValueKind::Bool)))
        .fragment(recording("JobImpl").implements("Job"))
        .post_call(observer())
}

#[test]
fn post_calls_run_once_whatever_the_outcome() {
    let module = module(vec![job()]);
    let (journal, uses) = with_journal();
    let job = module.new_composite("Job", uses).unwrap();

    assert_eq!(job.invoke("run", &[json!(false)]).unwrap(), json!("done"));
    assert_eq!(journal.entries(), vec!["run", "post:run:ok"]);

    let err = job.invoke("run", &[json!(true)]).unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert_eq!(
        journal.entries(),
        vec!["run", "post:run:ok", "run", "post:run:err(boom)"]
    );
}

#[test]
fn rejected_calls_skip_post_calls() {
    let module = module(vec![job()]);
    let (journal, uses) = with_journal();
    let job = module.new_composite("Job", uses).unwrap();
    assert!(job.invoke("run", &[json!("yes")]).is_err());
    assert!(journal.entries().is_empty());
}

struct Timeout;

impl Wrapper for Timeout {
    fn around(&self, _call: &Call<'_>, _next: &Next<'_>) -> Result<Value, FragmentError> {
        Err(FragmentError::msg("deadline exceeded"))
    }
}

#[test]
fn wrapper_may_fail_without_delegating() {
    let module = module(vec![job().wrapper(
        WrapperDeclaration::new("Timeout", |_| Ok(Timeout)).applies_to(AppliesTo::methods(["run"])),
    )]);
    let (journal, uses) = with_journal();
    let job = module.new_composite("Job", uses).unwrap();

    for _ in 0..2 {
        let err = job.invoke("run", &[json!(false)]).unwrap_err();
        assert_eq!(err.to_string(), "deadline exceeded");
    }
    assert_eq!(
        journal.entries(),
        vec![
            "post:run:err(deadline exceeded)",
            "post:run:err(deadline exceeded)"
        ]
    );
}

struct Cached;

impl Wrapper for Cached {
    fn around(&self, _call: &Call<'_>, _next: &Next<'_>) -> Result<Value, FragmentError> {
        Ok(json!("cached"))
    }
}

#[test]
fn wrapper_may_answer_without_delegating() {
    let module = module(vec![job().wrapper(WrapperDeclaration::new("Cached", |_| Ok(Cached)))]);
    let (journal, uses) = with_journal();
    let job = module.new_composite("Job", uses).unwrap();

    assert_eq!(job.invoke("run", &[json!(true)]).unwrap(), json!("cached"));
    assert_eq!(journal.entries(), vec!["post:run:ok"], "implementation must not run");
}

#[derive(Debug)]
struct Prefix(String);

struct Prefixed {
    prefix: Arc<Prefix>,
}

impl Mixin for Prefixed {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError> {
        let text = call.arg("text").and_then(Value::as_str).unwrap_or_default();
        Ok(json!(format!("{}{text}", self.prefix.0)))
    }
}

fn labeller() -> CapabilityDeclaration {
    CapabilityDeclaration::new("Labeller")
        .method(MethodDeclaration::new("label").param(ParameterDeclaration::new("text", ValueKind::String)))
        .fragment(
            FragmentDeclaration::new("Prefixed", |injected| {
                Ok(Prefixed {
                    prefix: injected.uses::<Prefix>("prefix")?,
                })
            })
            .implements("Labeller")
            .slot(InjectionSlot::uses::<Prefix>("prefix")),
        )
}

#[test]
fn uses_values_configure_each_instance_independently() {
    let module = module(vec![labeller()]);
    let a = module
        .new_composite("Labeller", Uses::new().with(Prefix("a:".to_string())))
        .unwrap();
    let b = module
        .new_composite("Labeller", Uses::new().with(Prefix("b:".to_string())))
        .unwrap();
    assert_eq!(a.invoke("label", &[json!("x")]).unwrap(), json!("a:x"));
    assert_eq!(b.invoke("label", &[json!("x")]).unwrap(), json!("b:x"));
    assert!(Arc::ptr_eq(a.model(), b.model()));
}

struct Trimming;

impl Wrapper for Trimming {
    fn around(&self, call: &Call<'_>, next: &Next<'_>) -> Result<Value, FragmentError> {
        let trimmed: Vec<Value> = call
            .args
            .iter()
            .map(|arg| arg.as_str().map(|text| json!(text.trim())).unwrap_or_else(|| arg.clone()))
            .collect();
        next.proceed(&trimmed)
    }
}

#[test]
fn wrappers_may_rewrite_arguments() {
    let module = module(vec![
        labeller().wrapper(WrapperDeclaration::new("Trimming", |_| Ok(Trimming))),
    ]);
    let labeller = module
        .new_composite("Labeller", Uses::new().with(Prefix("a:".to_string())))
        .unwrap();
    assert_eq!(labeller.invoke("label", &[json!("  x  ")]).unwrap(), json!("a:x"));
}

#[test]
fn missing_uses_value_fails_the_build() {
    let module = module(vec![labeller()]);
    let err = module.new_composite("Labeller", Uses::new()).unwrap_err();
    match err {
        BuildError::Injection(inner) => {
            assert_eq!(inner.fragment().as_str(), "Prefixed");
            assert!(inner.to_string().contains("'prefix'"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_fragment_fails_compilation_with_method_and_module() {
    let module = module(vec![CapabilityDeclaration::new("Broken")
        .method(MethodDeclaration::new("fine"))
        .method(MethodDeclaration::new("orphan"))
        .fragment(recording("FineImpl").implements("Broken").applies_to(AppliesTo::methods(["fine"])))]);

    let err = module.new_composite("Broken", Uses::new()).unwrap_err();
    match &err {
        BuildError::Resolution(ResolutionError::FragmentUnavailable { method, module, .. }) => {
            assert_eq!(method.name, "orphan");
            assert_eq!(module.as_deref(), Some("test"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("of module test"));
    assert_eq!(module.compiler().cached(), 0);
}

struct Side {
    name: &'static str,
    other_method: &'static str,
    other: tessera_kernel::CompositeRef,
}

impl Mixin for Side {
    fn invoke(&self, call: &Call<'_>) -> Result<Value, FragmentError> {
        match call.method() {
            "left_name" | "right_name" => Ok(json!(self.name)),
            "peek" => Ok(match self.other.invoke("peek", &[]) {
                Ok(value) => value,
                Err(err) => json!(err.failure_class()),
            }),
            _ => {
                let other = self.other.invoke(self.other_method, &[])?;
                Ok(json!(format!("{}+{}", self.name, other.as_str().unwrap_or_default())))
            }
        }
    }
}

fn sides() -> Vec<CapabilityDeclaration> {
    vec![
        CapabilityDeclaration::new("Left")
            .method(MethodDeclaration::new("left"))
            .method(MethodDeclaration::new("left_name"))
            .method(MethodDeclaration::new("peek"))
            .fragment(
                FragmentDeclaration::new("LeftImpl", |injected| {
                    Ok(Side {
                        name: "L",
                        other_method: "right_name",
                        other: injected.this("right")?,
                    })
                })
                .implements("Left")
                .slot(InjectionSlot::this("right", "Right")),
            ),
        CapabilityDeclaration::new("Right")
            .method(MethodDeclaration::new("right"))
            .method(MethodDeclaration::new("right_name"))
            .fragment(
                FragmentDeclaration::new("RightImpl", |injected| {
                    Ok(Side {
                        name: "R",
                        other_method: "left_name",
                        other: injected.this("left")?,
                    })
                })
                .implements("Right")
                .slot(InjectionSlot::this("left", "Left")),
            ),
        CapabilityDeclaration::new("Both").extends("Left").extends("Right"),
    ]
}

#[test]
fn sibling_fragments_reach_each_other_through_this() {
    let module = module(sides());
    let both = module.new_composite("Both", Uses::new()).unwrap();
    assert_eq!(both.invoke("left", &[]).unwrap(), json!("L+R"));
    assert_eq!(both.invoke("right", &[]).unwrap(), json!("R+L"));
    // LeftImpl's handle is viewed as Right, which does not declare peek.
    assert_eq!(both.invoke("peek", &[]).unwrap(), json!("unknown_method"));
}

#[test]
fn this_slot_for_a_foreign_capability_fails_the_build() {
    let module = module(sides());
    let err = module.new_composite("Left", Uses::new()).unwrap_err();
    assert_eq!(err.failure_class(), "this_capability_missing");
}

#[test]
fn handles_do_not_keep_composites_alive() {
    let module = module(vec![labeller()]);
    let composite = module
        .new_composite("Labeller", Uses::new().with(Prefix(String::new())))
        .unwrap();
    let handle = composite.handle();
    assert_eq!(handle.invoke("label", &[json!("x")]).unwrap(), json!("x"));
    drop(composite);
    assert!(!handle.is_alive());
    assert!(matches!(
        handle.invoke("label", &[json!("x")]),
        Err(InvocationError::Unavailable(_))
    ));
}

#[test]
fn concurrent_model_requests_compile_once() {
    let module = module(vec![greeter(), labeller(), job()]);
    let models: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| module.model(&"Greeter".into()).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(module.compiler().compilations(), 1);
    assert!(models.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[test]
fn model_projection_snapshot() {
    let module = module(vec![CapabilityDeclaration::new("Echo")
        .method(
            MethodDeclaration::new("echo")
                .param(ParameterDeclaration::new("text", ValueKind::String).constrain(Constraint::NotEmpty))
                .returns(ValueKind::String),
        )
        .fragment(recording("EchoImpl").implements("Echo").applies_to(AppliesTo::capability("Echo")))]);
    let mut projection = module.model(&"Echo".into()).unwrap().projection();
    assert!(projection.digest.starts_with("cm1_"));
    projection.digest = "[digest]".to_string();

    insta::assert_json_snapshot!(projection, @r#"
    {
      "capability": "Echo",
      "module": "test",
      "closure": [
        "Echo"
      ],
      "methods": [
        {
          "signature": "echo(string)",
          "declaredOn": "Echo",
          "parameters": [
            {
              "name": "text",
              "kind": "string",
              "optional": false,
              "constraints": [
                "not_empty"
              ]
            }
          ],
          "returns": "string",
          "implementation": "EchoImpl",
          "wrappers": [],
          "postCalls": []
        }
      ],
      "fragments": [
        {
          "role": "mixin",
          "class": "EchoImpl",
          "slots": [
            {
              "name": "journal",
              "scope": "uses",
              "target": "composition::Journal",
              "optional": false,
              "multi": false
            }
          ]
        }
      ],
      "digest": "[digest]"
    }
    "#);
}
