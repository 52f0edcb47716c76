//! Tests for the core module
//!
//! Dispatcher behaviour that needs a live engine: filter chains, callable
//! resolution and handler class construction.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use serde_json::{json, Value};

use super::{
    callback::Callback,
    container::Resolver,
    dispatcher::Dispatcher,
    error::{DispatchResult, Interrupt, NavError},
    traits::{Args, Container, Controller},
};
use crate::{internal_error, orchestration::Engine};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Handler class living outside the framework namespace.
struct Greeter {
    greeting: String,
}

impl Controller for Greeter {
    fn type_name(&self) -> &'static str {
        "app::Greeter"
    }

    fn has_method(&self, method: &str) -> bool {
        method == "hello"
    }

    fn call(&self, method: &str, _: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
        match method {
            "hello" => {
                let who = args.first().and_then(Value::as_str).unwrap_or("nobody");
                Ok(json!(format!("{} {who}", self.greeting)))
            }
            _ => Err(NavError::MethodNotFound {
                class: self.type_name().to_string(),
                method: method.to_string(),
            }
            .into()),
        }
    }
}

/// Keeps the default type name, which sits inside the framework namespace.
struct Pinger;

impl Controller for Pinger {
    fn has_method(&self, method: &str) -> bool {
        method == "ping"
    }

    fn call(&self, _: &str, _: &mut Engine, _: &mut Args) -> DispatchResult<Value> {
        Ok(json!("pong"))
    }
}

struct GreeterContainer;

impl Container for GreeterContainer {
    fn has(&self, class: &str) -> bool {
        class == "Greeter"
    }

    fn get(&self, _: &str) -> crate::core::error::NavResult<Arc<dyn Controller>> {
        Ok(Arc::new(Greeter {
            greeting: "Container hi".to_string(),
        }))
    }
}

fn register_greeter(engine: &mut Engine) {
    engine.register_class("Greeter", |engine: &Engine| -> Arc<dyn Controller> {
        let greeting = engine.vars().get_str("greeting").unwrap_or("Hello").to_string();
        Arc::new(Greeter { greeting })
    });
}

fn run_callback(engine: &mut Engine, callback: Callback, args: Args) -> DispatchResult<Value> {
    let mut args = args;
    Dispatcher::execute(engine, &callback, &mut args)
}

fn expect_error(result: DispatchResult<Value>) -> NavError {
    match result {
        Err(Interrupt::Error(err)) => err,
        Err(Interrupt::Halt { code, .. }) => panic!("unexpected halt {code}"),
        Ok(value) => panic!("expected an error, got {value}"),
    }
}

#[test]
fn test_before_filter_abort_skips_rest() {
    init_log();
    let mut engine = Engine::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = ran.clone();
    engine
        .map(
            "greet",
            Callback::closure(move |_: &mut Engine, _: &mut Args| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("body"))
            }),
        )
        .unwrap();

    engine.before("greet", |_, _, output| {
        *output = json!("cached");
        Ok(false)
    });
    let counter = second.clone();
    engine.before("greet", move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    });

    let output = engine.run("greet", Args::new()).unwrap();
    assert_eq!(output, json!("cached"));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn test_filters_rewrite_params_and_output() {
    init_log();
    let mut engine = Engine::new();
    engine
        .map(
            "hello",
            Callback::closure(|_: &mut Engine, args: &mut Args| {
                let who = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(json!(format!("Hello {who}")))
            }),
        )
        .unwrap();

    engine.before("hello", |_, args, _| {
        args[0] = json!("Fred");
        Ok(true)
    });
    engine.after("hello", |_, args, output| {
        assert!(args.is_empty());
        let text = output.as_str().unwrap_or_default().to_string();
        *output = json!(format!("{text}!"));
        Ok(true)
    });
    engine.after("hello", |_, _, output| {
        let text = output.as_str().unwrap_or_default().to_string();
        *output = json!(format!("{text}?"));
        Ok(false)
    });
    engine.after("hello", |_, _, output| {
        *output = json!("unreachable");
        Ok(true)
    });

    let output = engine.run("hello", vec![json!("Bob")]).unwrap();
    assert_eq!(output, json!("Hello Fred!?"));
}

#[test]
fn test_unknown_operation() {
    let mut engine = Engine::new();
    let err = expect_error(engine.run("nope", Args::new()));
    assert!(matches!(err, NavError::OperationNotFound(ref n) if n == "nope"));
}

#[test]
fn test_string_method_constructs_with_engine() {
    init_log();
    let mut engine = Engine::new();
    engine.set("greeting", "Howdy");
    register_greeter(&mut engine);

    let out = run_callback(&mut engine, Callback::from("Greeter->hello"), vec![json!("Ann")]).unwrap();
    assert_eq!(out, json!("Howdy Ann"));

    let out = run_callback(&mut engine, Callback::from("Greeter::hello"), vec![json!("Bo")]).unwrap();
    assert_eq!(out, json!("Howdy Bo"));
}

#[test]
fn test_construction_failures() {
    init_log();
    let mut engine = Engine::new();
    register_greeter(&mut engine);

    let err = expect_error(run_callback(&mut engine, Callback::from("Missing->hello"), vec![]));
    assert!(matches!(err, NavError::ClassNotFound(ref c) if c == "Missing"));

    let err = expect_error(run_callback(&mut engine, Callback::method("Greeter", "wave"), vec![]));
    assert_eq!(
        err.to_string(),
        "Class found, but method 'app::Greeter::wave' not found."
    );

    let err = expect_error(run_callback(&mut engine, Callback::from("no_such_fn"), vec![]));
    assert!(matches!(err, NavError::InvalidCallable(_)));
}

#[test]
fn test_registered_function() {
    let mut engine = Engine::new();
    engine.register_function("double", |_: &mut Engine, args: &mut Args| {
        let n = args.first().and_then(Value::as_i64).unwrap_or_default();
        Ok(json!(n * 2))
    });
    let out = run_callback(&mut engine, Callback::from("double"), vec![json!(21)]).unwrap();
    assert_eq!(out, json!(42));
}

#[test]
fn test_resolver_function_takes_precedence() {
    init_log();
    let mut engine = Engine::new();
    register_greeter(&mut engine);
    engine.register_resolver(Resolver::function(|class, args| {
        assert_eq!(class, "Greeter");
        assert_eq!(args.len(), 1);
        Ok(Some(Arc::new(Greeter {
            greeting: "Resolved".to_string(),
        }) as Arc<dyn Controller>))
    }));

    let out = run_callback(&mut engine, Callback::method("Greeter", "hello"), vec![json!("Cy")]).unwrap();
    assert_eq!(out, json!("Resolved Cy"));
}

#[test]
fn test_resolver_declines_falls_back_to_registry() {
    let mut engine = Engine::new();
    register_greeter(&mut engine);
    engine.register_resolver(Resolver::function(|_, _| Ok(None)));

    let out = run_callback(&mut engine, Callback::method("Greeter", "hello"), vec![json!("Di")]).unwrap();
    assert_eq!(out, json!("Hello Di"));
}

#[test]
fn test_resolver_error_ordering() {
    init_log();
    let mut engine = Engine::new();
    engine.register_resolver(Resolver::function(|_, _| Err(internal_error!("container down"))));

    // An unknown class is reported before the deferred resolver error
    let err = expect_error(run_callback(&mut engine, Callback::method("Greeter", "hello"), vec![]));
    assert!(matches!(err, NavError::ClassNotFound(_)));

    register_greeter(&mut engine);
    let err = expect_error(run_callback(&mut engine, Callback::method("Greeter", "hello"), vec![]));
    match err {
        NavError::ResolverFailure(inner) => {
            assert_eq!(inner.to_string(), "Internal error: container down")
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_container_resolver() {
    let mut engine = Engine::new();
    register_greeter(&mut engine);
    engine.register_resolver(Resolver::container(GreeterContainer));

    let out = run_callback(&mut engine, Callback::method("Greeter", "hello"), vec![json!("Ed")]).unwrap();
    assert_eq!(out, json!("Container hi Ed"));
}

#[test]
fn test_framework_instances_bypass_resolver() {
    let mut engine = Engine::new();
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    engine.register_resolver(Resolver::function(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }));

    let out = run_callback(&mut engine, Callback::instance(Arc::new(Pinger), "ping"), vec![]).unwrap();
    assert_eq!(out, json!("pong"));
    assert_eq!(asked.load(Ordering::SeqCst), 0);

    let greeter: Arc<dyn Controller> = Arc::new(Greeter {
        greeting: "Hey".to_string(),
    });
    let out = run_callback(&mut engine, Callback::instance(greeter, "hello"), vec![json!("Flo")]).unwrap();
    assert_eq!(out, json!("Hey Flo"));
    assert_eq!(asked.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_construction_unwinds_output() {
    let mut engine = Engine::new();
    engine.output_mut().begin_capture();
    let level = engine.output().level();
    let _ = run_callback(&mut engine, Callback::from("Missing->hello"), vec![]);
    assert_eq!(engine.output().level(), level);
}
