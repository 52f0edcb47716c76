//! End-to-end engine scenarios: routing, middleware, buffering, halts and
//! the built-in response helpers.

use std::{fs, sync::Arc};

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::{Called, Engine, Exit, OperationKind};
use crate::{
    config_error,
    core::{
        callback::{Callback, Middleware},
        context::keys,
        dispatcher::Phase,
        error::{DispatchResult, Interrupt, NavError},
        loader::instance,
        traits::{Args, Controller},
    },
    net::Request,
    routing::ResourceOptions,
};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An engine with test mode off, so halts terminate.
fn engine() -> Engine {
    init_log();
    let mut engine = Engine::new();
    engine.set(keys::TEST_MODE, false);
    engine
}

fn dispatch(engine: &mut Engine, method: &str, url: &str) -> Exit {
    engine.handle(Request::new(method, url)).unwrap()
}

fn status(engine: &mut Engine) -> u16 {
    engine.response().unwrap().lock().status()
}

fn body(engine: &mut Engine) -> String {
    engine.response().unwrap().lock().body().to_string()
}

fn header(engine: &mut Engine, name: &str) -> Option<String> {
    engine
        .response()
        .unwrap()
        .lock()
        .get_header(name)
        .map(str::to_string)
}

fn wire(engine: &mut Engine) -> String {
    String::from_utf8(engine.output_mut().take_wire()).unwrap()
}

fn echo(text: &'static str) -> Callback {
    Callback::closure(move |engine: &mut Engine, _: &mut Args| {
        engine.echo(text);
        Ok(Value::Null)
    })
}

/// Echoes the positional args joined by commas.
fn echo_args() -> Callback {
    Callback::closure(|engine: &mut Engine, args: &mut Args| {
        let joined = args
            .iter()
            .map(|v| v.as_str().unwrap_or("null").to_string())
            .collect::<Vec<_>>()
            .join(",");
        engine.echo(&joined);
        Ok(Value::Null)
    })
}

/// Middleware object that records its calls.
struct Recorder {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    phases: &'static [&'static str],
    verdict: Value,
}

impl Recorder {
    fn new(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            label,
            log: log.clone(),
            phases: &["before", "after"],
            verdict: Value::Null,
        }
    }
}

impl Controller for Recorder {
    fn type_name(&self) -> &'static str {
        "app::Recorder"
    }

    fn has_method(&self, method: &str) -> bool {
        self.phases.contains(&method)
    }

    fn call(&self, method: &str, engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
        let id = args[0].get("id").and_then(Value::as_str).unwrap_or("-");
        self.log.lock().push(format!("{}:{method}:{id}", self.label));
        engine.echo(&format!("[{}]", self.label));
        Ok(self.verdict.clone())
    }
}

/// Resource controller answering `index` and `show`.
struct Photos;

impl Controller for Photos {
    fn type_name(&self) -> &'static str {
        "app::Photos"
    }

    fn has_method(&self, method: &str) -> bool {
        matches!(method, "index" | "show")
    }

    fn call(&self, method: &str, engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
        let id = args.first().and_then(Value::as_str).unwrap_or_default();
        engine.echo(&format!("{method} {id}").trim_end().to_string());
        Ok(Value::Null)
    }
}

#[test]
fn test_basic_dispatch_sends_once() {
    let mut engine = engine();
    engine.route("GET /", echo("hello")).unwrap();

    assert_eq!(dispatch(&mut engine, "GET", "/"), Exit::Completed);
    assert_eq!(status(&mut engine), 200);
    assert_eq!(body(&mut engine), "hello");
    assert_eq!(header(&mut engine, "Content-Length").as_deref(), Some("5"));
    assert_eq!(wire(&mut engine), "hello");
    assert_eq!(engine.output().level(), 0);
}

#[test]
fn test_placeholders_and_wildcard() {
    let mut engine = engine();
    engine.route("GET /user/@id", echo_args()).unwrap();
    engine.route("GET /search/*", echo("search")).unwrap();

    dispatch(&mut engine, "GET", "/user/42");
    assert_eq!(body(&mut engine), "42");

    dispatch(&mut engine, "GET", "/search/a/b/c");
    assert_eq!(body(&mut engine), "search");
}

#[test]
fn test_verb_selection_and_405() {
    let mut engine = engine();
    engine.route("GET /x", echo("get")).unwrap();
    engine.post("/x", echo("post")).unwrap();

    dispatch(&mut engine, "POST", "/x");
    assert_eq!(body(&mut engine), "post");

    let exit = dispatch(&mut engine, "PUT", "/x");
    assert_eq!(exit, Exit::Halted { code: 405 });
    assert_eq!(status(&mut engine), 405);
    assert_eq!(body(&mut engine), "Method Not Allowed");
    assert_eq!(engine.output().level(), 0);
}

#[test]
fn test_no_match_is_404() {
    let mut engine = engine();
    engine.route("GET /x", echo("x")).unwrap();

    assert_eq!(dispatch(&mut engine, "GET", "/nothing"), Exit::Completed);
    assert_eq!(status(&mut engine), 404);
    assert!(body(&mut engine).contains("404 Not Found"));
}

#[test]
fn test_case_sensitivity() {
    let mut engine = engine();
    engine.route("/hello", echo("hi")).unwrap();

    dispatch(&mut engine, "GET", "/Hello");
    assert_eq!(status(&mut engine), 200);

    engine.set(keys::CASE_SENSITIVE, true);
    dispatch(&mut engine, "GET", "/Hello");
    assert_eq!(status(&mut engine), 404);
}

#[test]
fn test_truthy_handler_continues() {
    let mut engine = engine();
    engine
        .route(
            "GET /chain",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.echo("a");
                Ok(json!(true))
            }),
        )
        .unwrap();
    engine.route("GET /other", echo("x")).unwrap();
    engine.route("GET /chain", echo("b")).unwrap();
    engine.route("GET /chain", echo("c")).unwrap();

    dispatch(&mut engine, "GET", "/chain");
    assert_eq!(body(&mut engine), "ab");
}

#[test]
fn test_pass_route_appends_snapshot() {
    let mut engine = engine();
    engine
        .route_with(
            "GET /p/@id",
            Callback::closure(|engine: &mut Engine, args: &mut Args| {
                assert_eq!(args.len(), 2);
                let pattern = args[1]["pattern"].as_str().unwrap_or_default().to_string();
                engine.echo(&format!("{} {pattern}", args[0].as_str().unwrap_or_default()));
                Ok(Value::Null)
            }),
            true,
            "",
        )
        .unwrap();

    dispatch(&mut engine, "GET", "/p/9");
    assert_eq!(body(&mut engine), "9 /p/@id");
}

#[test]
fn test_head_clears_body() {
    let mut engine = engine();
    engine.route("GET /", echo("hidden")).unwrap();

    assert_eq!(dispatch(&mut engine, "HEAD", "/"), Exit::Completed);
    assert_eq!(status(&mut engine), 200);
    assert_eq!(body(&mut engine), "");
    assert_eq!(wire(&mut engine), "");
}

#[test]
fn test_middleware_order_and_capture() {
    let mut engine = engine();
    let log = Arc::new(Mutex::new(Vec::new()));
    let audit_log = log.clone();
    engine.register_class("Audit", move |_: &Engine| -> Arc<dyn Controller> {
        Arc::new(Recorder::new("Audit", &audit_log))
    });

    let handler_log = log.clone();
    let first = Recorder::new("A", &log);
    let before_only = Recorder {
        phases: &["before"],
        ..Recorder::new("B", &log)
    };
    engine
        .with_router(move |t| {
            t.get(
                "/mw/@id",
                Callback::closure(move |engine: &mut Engine, _: &mut Args| {
                    handler_log.lock().push("handler".to_string());
                    engine.echo("body");
                    Ok(Value::Null)
                }),
            )
            .add_middleware(Middleware::instance(first))
            .add_middleware(Middleware::instance(before_only))
            .add_middleware("Audit");
        })
        .unwrap();

    assert_eq!(dispatch(&mut engine, "GET", "/mw/5"), Exit::Completed);
    assert_eq!(
        *log.lock(),
        [
            "A:before:5",
            "B:before:5",
            "Audit:before:5",
            "handler",
            "Audit:after:5",
            "A:after:5"
        ]
    );
    assert_eq!(body(&mut engine), "[A][B][Audit]body[Audit][A]");
}

#[test]
fn test_failing_before_middleware_is_403() {
    let mut engine = engine();
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Recorder {
        verdict: json!(false),
        ..Recorder::new("Gate", &log)
    };
    engine
        .with_router(move |t| {
            t.get("/secret", "never_called")
                .add_middleware(Middleware::instance(gate));
        })
        .unwrap();

    let exit = dispatch(&mut engine, "GET", "/secret");
    assert_eq!(exit, Exit::Halted { code: 403 });
    assert_eq!(status(&mut engine), 403);
    assert_eq!(body(&mut engine), "Forbidden");
    // The after step of the same middleware never ran
    assert_eq!(*log.lock(), ["Gate:before:-"]);
}

#[test]
fn test_failing_after_middleware_is_403() {
    let mut engine = engine();
    let log = Arc::new(Mutex::new(Vec::new()));
    let audit = Recorder {
        phases: &["after"],
        verdict: json!(false),
        ..Recorder::new("Audit", &log)
    };
    engine
        .with_router(move |t| {
            t.get("/s", echo("s")).add_middleware(Middleware::instance(audit));
        })
        .unwrap();

    let exit = dispatch(&mut engine, "GET", "/s");
    assert_eq!(exit, Exit::Halted { code: 403 });
    assert_eq!(status(&mut engine), 403);
    assert_eq!(body(&mut engine), "Forbidden");
    assert_eq!(*log.lock(), ["Audit:after:-"]);
}

#[test]
fn test_forbidden_wins_over_method_not_allowed() {
    let mut engine = engine();
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Recorder {
        verdict: json!(false),
        ..Recorder::new("Gate", &log)
    };
    engine
        .with_router(move |t| {
            t.post("/x", echo("post"));
            t.get("/x", echo("get")).add_middleware(Middleware::instance(gate));
        })
        .unwrap();

    let exit = dispatch(&mut engine, "GET", "/x");
    assert_eq!(exit, Exit::Halted { code: 403 });
    assert_eq!(body(&mut engine), "Forbidden");
}

#[test]
fn test_exhausted_fallthrough_is_404() {
    let mut engine = engine();
    engine
        .route(
            "GET /x",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.echo("get");
                Ok(json!(true))
            }),
        )
        .unwrap();
    engine.post("/x", echo("post")).unwrap();

    let exit = dispatch(&mut engine, "GET", "/x");
    assert_eq!(exit, Exit::Completed);
    assert_eq!(status(&mut engine), 404);
    assert!(body(&mut engine).contains("404 Not Found"));
}

#[test]
fn test_closure_middleware_gets_params_and_falsy_is_not_failure() {
    let mut engine = engine();
    let seen = Arc::new(Mutex::new(Value::Null));
    let captured = seen.clone();
    let group_mw = Middleware::closure(move |_: &mut Engine, args: &mut Args| {
        *captured.lock() = args[0].clone();
        // Only a literal false rejects
        Ok(json!(0))
    });
    engine
        .group("/api", vec![group_mw], |t| {
            t.get("/items/@id", "show_item");
        })
        .unwrap();
    engine.register_function("show_item", |engine: &mut Engine, args: &mut Args| {
        engine.echo(&format!("item {}", args[0].as_str().unwrap_or_default()));
        Ok(Value::Null)
    });

    dispatch(&mut engine, "GET", "/api/items/3");
    assert_eq!(body(&mut engine), "item 3");
    assert_eq!(*seen.lock(), json!({"id": "3"}));
}

#[test]
fn test_halt_in_test_mode_does_not_terminate() {
    let mut engine = engine();
    engine.set(keys::TEST_MODE, true);
    engine
        .route(
            "GET /",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.halt(401, "nope", true)?;
                engine.echo("after");
                Ok(Value::Null)
            }),
        )
        .unwrap();

    assert_eq!(dispatch(&mut engine, "GET", "/"), Exit::Completed);
    assert_eq!(status(&mut engine), 401);
    assert_eq!(wire(&mut engine), "nope");
    assert_eq!(
        header(&mut engine, "Cache-Control").as_deref(),
        Some("no-store, no-cache, must-revalidate, max-age=0")
    );
}

#[test]
fn test_halt_unwinds_captures() {
    let mut engine = engine();
    engine
        .route(
            "GET /",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.echo("discarded");
                engine.output_mut().begin_capture();
                engine.halt(401, "stop here", true)?;
                unreachable!("halt terminates outside test mode")
            }),
        )
        .unwrap();

    assert_eq!(dispatch(&mut engine, "GET", "/"), Exit::Halted { code: 401 });
    assert_eq!(engine.output().level(), 0);
    assert_eq!(wire(&mut engine), "stop here");
}

#[test]
fn test_handler_error_renders_500() {
    let mut engine = engine();
    engine
        .route(
            "GET /boom",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.echo("partial");
                Err(config_error!("boom <b>").into())
            }),
        )
        .unwrap();

    let exit = dispatch(&mut engine, "GET", "/boom");
    assert_eq!(
        exit,
        Exit::Failed {
            message: "Configuration error: boom <b>".to_string()
        }
    );
    assert_eq!(status(&mut engine), 500);
    let page = body(&mut engine);
    assert!(page.contains("500 Internal Server Error"));
    assert!(page.contains("boom &lt;b&gt;"));
    assert!(!page.contains("partial"));
    assert_eq!(engine.output().level(), 0);

    engine.set(keys::HANDLE_ERRORS, false);
    let err = engine.handle(Request::new("GET", "/boom")).unwrap_err();
    assert!(matches!(err, NavError::Configuration(_)));
}

#[test]
fn test_json_helpers() {
    let mut engine = engine();
    engine
        .route(
            "GET /json",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.json(json!({"a": 1}), 201)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();
    engine
        .route(
            "GET /jsonp",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.jsonp(json!([1, 2]), "jsonp", 200)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();
    engine
        .route(
            "GET /halt",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.json_halt(json!({"ok": true}), 200)?;
                engine.echo("unreachable");
                Ok(Value::Null)
            }),
        )
        .unwrap();

    dispatch(&mut engine, "GET", "/json");
    assert_eq!(status(&mut engine), 201);
    assert_eq!(body(&mut engine), r#"{"a":1}"#);
    assert_eq!(
        header(&mut engine, "Content-Type").as_deref(),
        Some("application/json; charset=utf-8")
    );
    wire(&mut engine);

    dispatch(&mut engine, "GET", "/jsonp?jsonp=cb");
    assert_eq!(body(&mut engine), "cb([1,2]);");
    assert_eq!(
        header(&mut engine, "Content-Type").as_deref(),
        Some("application/javascript; charset=utf-8")
    );
    wire(&mut engine);

    let exit = dispatch(&mut engine, "GET", "/halt");
    assert_eq!(exit, Exit::Halted { code: 200 });
    assert_eq!(wire(&mut engine), r#"{"ok":true}"#);
}

#[test]
fn test_json_halt_sends_once_with_legacy_buffering() {
    let mut engine = engine();
    engine.set(keys::OUTPUT_BUFFERING, true);
    engine
        .route(
            "GET /halt",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.json_halt(json!({"ok": true}), 202)?;
                engine.echo("unreachable");
                Ok(Value::Null)
            }),
        )
        .unwrap();

    let exit = dispatch(&mut engine, "GET", "/halt");
    assert_eq!(exit, Exit::Halted { code: 202 });
    assert_eq!(status(&mut engine), 202);
    assert_eq!(wire(&mut engine), r#"{"ok":true}"#);
    assert_eq!(engine.output().level(), 0);
}

#[test]
fn test_redirect_prefixes_base_url() {
    let mut engine = engine();
    engine
        .route(
            "GET /old",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.redirect("/login", 303)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();
    engine
        .route(
            "GET /away",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.redirect("https://example.com/x", 302)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();

    dispatch(&mut engine, "GET", "/old");
    assert_eq!(status(&mut engine), 303);
    assert_eq!(header(&mut engine, "Location").as_deref(), Some("/login"));

    engine.set(keys::BASE_URL, "/app");
    dispatch(&mut engine, "GET", "/old");
    assert_eq!(header(&mut engine, "Location").as_deref(), Some("/app/login"));

    dispatch(&mut engine, "GET", "/away");
    assert_eq!(status(&mut engine), 302);
    assert_eq!(
        header(&mut engine, "Location").as_deref(),
        Some("https://example.com/x")
    );
}

#[test]
fn test_conditional_requests() {
    let mut engine = engine();
    engine
        .route(
            "GET /tagged",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.echo("fresh");
                engine.etag("abc", false)?;
                engine.echo(" body");
                Ok(Value::Null)
            }),
        )
        .unwrap();
    engine
        .route(
            "GET /dated",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.last_modified(1000)?;
                engine.echo("dated");
                Ok(Value::Null)
            }),
        )
        .unwrap();

    dispatch(&mut engine, "GET", "/tagged");
    assert_eq!(status(&mut engine), 200);
    assert_eq!(body(&mut engine), "fresh body");
    assert_eq!(header(&mut engine, "ETag").as_deref(), Some("\"abc\""));

    let request = Request::new("GET", "/tagged").with_header("If-None-Match", "W/\"abc\"");
    let exit = engine.handle(request).unwrap();
    assert_eq!(exit, Exit::Halted { code: 304 });
    assert_eq!(status(&mut engine), 304);
    assert_eq!(body(&mut engine), "");

    dispatch(&mut engine, "GET", "/dated");
    assert_eq!(
        header(&mut engine, "Last-Modified").as_deref(),
        Some("Thu, 01 Jan 1970 00:16:40 GMT")
    );

    let request = Request::new("GET", "/dated")
        .with_header("If-Modified-Since", "Thu, 01 Jan 1970 00:16:40 GMT");
    assert_eq!(engine.handle(request).unwrap(), Exit::Halted { code: 304 });
}

#[test]
fn test_legacy_output_buffering() {
    let mut engine = engine();
    engine.set(keys::OUTPUT_BUFFERING, true);
    engine.route("GET /", echo("legacy")).unwrap();

    assert_eq!(dispatch(&mut engine, "GET", "/"), Exit::Completed);
    assert_eq!(body(&mut engine), "legacy");
    assert_eq!(wire(&mut engine), "legacy");
    assert_eq!(engine.output().level(), 0);
}

#[test]
fn test_streamed_route_writes_through() {
    let mut engine = engine();
    engine
        .with_router(|t| {
            t.get("/stream", echo("chunk"))
                .stream_with_headers([("status", "201"), ("X-Stream", "yes")]);
        })
        .unwrap();

    assert_eq!(dispatch(&mut engine, "GET", "/stream"), Exit::Completed);
    assert_eq!(status(&mut engine), 201);
    assert_eq!(header(&mut engine, "X-Stream").as_deref(), Some("yes"));
    assert_eq!(header(&mut engine, "X-Accel-Buffering").as_deref(), Some("no"));
    assert_eq!(header(&mut engine, "Content-Length"), None);
    assert_eq!(body(&mut engine), "");
    assert_eq!(wire(&mut engine), "chunk");
}

#[test]
fn test_get_url_and_route_event() {
    let mut engine = engine();
    engine
        .route_with("GET /user/@id", echo_args(), false, "user")
        .unwrap();

    let mut params = Map::new();
    params.insert("id".to_string(), json!(7));
    assert_eq!(engine.get_url("user", params).unwrap(), "/user/7");

    match engine.get_url("missing", Map::new()) {
        Err(Interrupt::Error(NavError::RouteNotFound(alias))) => assert_eq!(alias, "missing"),
        _ => panic!("expected RouteNotFound"),
    }

    engine.register_function("fn_handler", |engine: &mut Engine, _: &mut Args| {
        engine.echo("by name");
        Ok(Value::Null)
    });
    let route = engine
        .run("route", vec![json!("GET /fn"), json!("fn_handler")])
        .unwrap();
    assert_eq!(route["pattern"], json!("/fn"));
    dispatch(&mut engine, "GET", "/fn");
    assert_eq!(body(&mut engine), "by name");
}

#[test]
fn test_resource_routes() {
    let mut engine = engine();
    engine.register_class("Photos", |_: &Engine| -> Arc<dyn Controller> { Arc::new(Photos) });
    engine
        .resource(
            "/photos",
            "Photos",
            ResourceOptions {
                only: vec!["index".into(), "show".into()],
                ..Default::default()
            },
        )
        .unwrap();

    dispatch(&mut engine, "GET", "/photos/5");
    assert_eq!(body(&mut engine), "show 5");

    dispatch(&mut engine, "GET", "/photos");
    assert_eq!(body(&mut engine), "index");

    dispatch(&mut engine, "DELETE", "/photos/5");
    assert_eq!(status(&mut engine), 405);
}

#[test]
fn test_render_templates() {
    let dir = std::env::temp_dir().join(format!("navigator-engine-views-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("page.html"), "<p>{{ title }}</p>").unwrap();

    let mut engine = engine();
    engine.set(keys::VIEWS_PATH, dir.to_string_lossy().into_owned());
    engine
        .route(
            "GET /",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.render("page", Some(json!({"title": "Hi"})), Some("content"))?;
                engine.render("page", Some(json!({"title": "Yo"})), None)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();

    dispatch(&mut engine, "GET", "/");
    assert_eq!(body(&mut engine), "<p>Yo</p>");
    let view = engine.view().unwrap();
    assert_eq!(view.lock().get("content"), Some(&json!("<p>Hi</p>")));

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_download() {
    let path = std::env::temp_dir().join(format!("navigator-engine-dl-{}.txt", std::process::id()));
    fs::write(&path, "payload").unwrap();

    let mut engine = engine();
    engine.set(keys::TEST_MODE, true);
    let target = path.to_string_lossy().into_owned();
    engine
        .route(
            "GET /file",
            Callback::closure(move |engine: &mut Engine, _: &mut Args| {
                engine.download(&target)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();
    engine
        .route(
            "GET /missing",
            Callback::closure(|engine: &mut Engine, _: &mut Args| {
                engine.download("/definitely/not/here.txt")?;
                Ok(Value::Null)
            }),
        )
        .unwrap();

    assert_eq!(dispatch(&mut engine, "GET", "/file"), Exit::Completed);
    assert_eq!(wire(&mut engine), "payload");
    assert_eq!(header(&mut engine, "Content-Length").as_deref(), Some("7"));

    let exit = dispatch(&mut engine, "GET", "/missing");
    assert!(matches!(exit, Exit::Failed { ref message } if message.contains("cannot be found")));

    fs::remove_file(path).unwrap();
}

#[test]
fn test_map_rejects_framework_names() {
    let mut engine = engine();
    for name in ["json", "halt", "start", "handle", "map"] {
        let err = engine.map(name, "anything").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Cannot override an existing framework method."
        );
    }
    assert!(engine
        .register("json", |_: &[Value]| Ok(instance(0u8)), vec![], None)
        .is_err());
    assert!(engine.map("greet", "anything").is_ok());
}

#[test]
fn test_call_and_operation_kind() {
    let mut engine = engine();
    engine
        .map(
            "double",
            Callback::closure(|_: &mut Engine, args: &mut Args| {
                Ok(json!(args[0].as_i64().unwrap_or_default() * 2))
            }),
        )
        .unwrap();
    engine
        .register(
            "counter",
            |params: &[Value]| Ok(instance(Mutex::new(params[0].as_i64().unwrap_or_default()))),
            vec![json!(10)],
            None,
        )
        .unwrap();

    match engine.call("double", vec![json!(4)]) {
        Ok(Called::Output(value)) => assert_eq!(value, json!(8)),
        _ => panic!("expected output"),
    }

    let shared_a = match engine.call("counter", Args::new()) {
        Ok(Called::Service(service)) => service,
        _ => panic!("expected a service"),
    };
    let shared_b = match engine.call("counter", vec![json!(true)]) {
        Ok(Called::Service(service)) => service,
        _ => panic!("expected a service"),
    };
    let fresh = match engine.call("counter", vec![json!(false)]) {
        Ok(Called::Service(service)) => service,
        _ => panic!("expected a service"),
    };
    assert!(Arc::ptr_eq(&shared_a, &shared_b));
    assert!(!Arc::ptr_eq(&shared_a, &fresh));
    assert_eq!(*shared_a.downcast_ref::<Mutex<i64>>().unwrap().lock(), 10);

    match engine.call("nothing", Args::new()) {
        Err(Interrupt::Error(err)) => assert_eq!(
            err.to_string(),
            "Configuration error: nothing must be a mapped method."
        ),
        _ => panic!("expected an error"),
    }

    assert_eq!(engine.operation_kind("json"), Some(OperationKind::BuiltIn));
    assert_eq!(engine.operation_kind("double"), Some(OperationKind::Extension));
    assert_eq!(engine.operation_kind("counter"), Some(OperationKind::Service));
    assert_eq!(engine.operation_kind("router"), Some(OperationKind::Service));
    assert_eq!(engine.operation_kind("nothing"), None);
}

#[test]
fn test_group_event_needs_builder() {
    let mut engine = engine();
    let result = engine.run("group", vec![json!("/api")]);
    assert!(matches!(
        result,
        Err(Interrupt::Error(NavError::Configuration(_)))
    ));
}

#[test]
fn test_init_resets_state() {
    let mut engine = engine();
    engine.map("custom", "fn").unwrap();
    engine.route("GET /", echo("x")).unwrap();
    engine.set("app.name", "demo");
    engine.set(keys::CASE_SENSITIVE, true);

    engine.init();
    engine.init();

    assert!(!engine.dispatcher().has("custom"));
    assert!(engine.dispatcher().has("start"));
    assert_eq!(engine.dispatcher().filter_count("start", Phase::After), 1);
    assert!(!engine.has("app.name"));
    assert!(!engine.vars().get_flag(keys::CASE_SENSITIVE));
    assert_eq!(engine.vars().get_str(keys::VIEWS_EXTENSION), Some(".html"));
    assert!(engine.router().unwrap().lock().routes().is_empty());
}

#[test]
fn test_stop_filter_runs_after_start() {
    let mut engine = engine();
    engine.route("GET /", echo("x")).unwrap();
    engine.after("start", |engine, _, _| {
        engine.echo("+after");
        Ok(true)
    });

    dispatch(&mut engine, "GET", "/");
    // `stop` sent the body before the user filter ran
    assert_eq!(wire(&mut engine), "x+after");
}
