//! The orchestrating engine
//!
//! The engine owns the variable store, the service loader, the dispatcher
//! and the output buffer. Built-in operations are dispatcher events, so
//! filters can be hooked on any of them.

use std::sync::Arc;

use log::{debug, error, info};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::{
    lifecycle::Exit,
    operations::{self, BUILTIN_OPERATIONS},
};
use crate::{
    config::Config,
    config_error,
    core::{
        callback::{Callback, Middleware},
        container::Resolver,
        context::{keys, truthy, Vars, TEST_MODE_ENV},
        dispatcher::{Dispatcher, Phase},
        error::{DispatchResult, Interrupt, NavError, NavResult},
        loader::{instance, Instance, Loader, ServiceHook},
        output::OutputBuffer,
        traits::{Args, Controller},
    },
    net::{Request, Response},
    routing::{ResourceOptions, RouteTable},
    view::View,
};

/// Public engine methods; services and operations may not shadow them.
const ENGINE_METHODS: [&str; 17] = [
    "init",
    "set",
    "get",
    "has",
    "clear",
    "map",
    "register",
    "unregister",
    "before",
    "after",
    "call",
    "run",
    "handle",
    "handle_exception",
    "register_resolver",
    "register_class",
    "register_function",
];

/// Where a callable name is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    BuiltIn,
    Extension,
    Service,
}

/// Result of [`Engine::call`].
pub enum Called {
    Output(Value),
    Service(Instance),
}

impl Called {
    pub fn into_output(self) -> Option<Value> {
        match self {
            Called::Output(value) => Some(value),
            Called::Service(_) => None,
        }
    }
}

pub struct Engine {
    vars: Vars,
    loader: Loader,
    dispatcher: Dispatcher,
    output: OutputBuffer,
    initialized: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let mut engine = Self {
            vars: Vars::new(),
            loader: Loader::new(),
            dispatcher: Dispatcher::new(),
            output: OutputBuffer::new(),
            initialized: false,
        };
        engine.init();
        engine
    }

    /// Seeds services, built-in operations and default settings. Calling it
    /// again wipes all state first.
    pub fn init(&mut self) {
        if self.initialized {
            debug!("re-initializing engine");
            self.vars.clear();
            self.loader.reset();
            self.dispatcher.reset();
            self.output = OutputBuffer::new();
        }

        // Phase 1: core services
        self.register_core_services();

        // Phase 2: built-in operations
        for (name, handler) in operations::builtins() {
            self.dispatcher.set(name, Callback::Closure(handler));
        }
        self.dispatcher.hook(
            "start",
            Phase::After,
            Arc::new(|engine: &mut Engine, _: &mut Args, _: &mut Value| {
                Dispatcher::run(engine, "stop", Args::new())?;
                Ok(true)
            }),
        );

        // Phase 3: default settings
        self.set_defaults();

        self.initialized = true;
    }

    fn register_core_services(&mut self) {
        self.loader.register(
            "request",
            |_: &[Value]| Ok(instance(Mutex::new(Request::default()))),
            vec![],
            None,
        );

        let response_hook: ServiceHook = Arc::new(|inst: &Instance, vars: &Vars| {
            if let Some(response) = inst.downcast_ref::<Mutex<Response>>() {
                let mut response = response.lock();
                response.content_length = vars.get_flag(keys::CONTENT_LENGTH);
                response.v2_output_buffering = vars.get_flag(keys::OUTPUT_BUFFERING);
            }
        });
        self.loader.register(
            "response",
            |_: &[Value]| Ok(instance(Mutex::new(Response::new()))),
            vec![],
            Some(response_hook),
        );

        let router_hook: ServiceHook = Arc::new(|inst: &Instance, vars: &Vars| {
            if let Some(router) = inst.downcast_ref::<Mutex<RouteTable>>() {
                router.lock().case_sensitive = vars.get_flag(keys::CASE_SENSITIVE);
            }
        });
        self.loader.register(
            "router",
            |_: &[Value]| Ok(instance(Mutex::new(RouteTable::new()))),
            vec![],
            Some(router_hook),
        );

        let view_hook: ServiceHook = Arc::new(|inst: &Instance, vars: &Vars| {
            if let Some(view) = inst.downcast_ref::<Mutex<View>>() {
                let mut view = view.lock();
                if let Some(path) = vars.get_str(keys::VIEWS_PATH) {
                    view.path = path.to_string();
                }
                if let Some(extension) = vars.get_str(keys::VIEWS_EXTENSION) {
                    view.extension = extension.to_string();
                }
            }
        });
        self.loader.register(
            "view",
            |_: &[Value]| Ok(instance(Mutex::new(View::default()))),
            vec![],
            Some(view_hook),
        );
    }

    fn set_defaults(&mut self) {
        self.vars.set(keys::BASE_URL, Value::Null);
        self.vars.set(keys::CASE_SENSITIVE, false);
        self.vars.set(keys::HANDLE_ERRORS, true);
        self.vars.set(keys::LOG_ERRORS, false);
        self.vars.set(keys::VIEWS_PATH, "./views");
        self.vars.set(keys::VIEWS_EXTENSION, ".html");
        self.vars.set(keys::CONTENT_LENGTH, true);
        self.vars.set(keys::OUTPUT_BUFFERING, false);
        self.vars
            .set(keys::TEST_MODE, std::env::var_os(TEST_MODE_ENV).is_some());
    }

    /// Copies loaded settings into the variable store.
    pub fn apply_config(&mut self, config: &Config) {
        let settings = &config.navigator;
        self.vars.set(
            keys::BASE_URL,
            settings.base_url.clone().map_or(Value::Null, Value::String),
        );
        self.vars.set(keys::CASE_SENSITIVE, settings.case_sensitive);
        self.vars.set(keys::HANDLE_ERRORS, settings.handle_errors);
        self.vars.set(keys::LOG_ERRORS, settings.log_errors);
        self.vars.set(keys::VIEWS_PATH, settings.views.path.clone());
        self.vars
            .set(keys::VIEWS_EXTENSION, settings.views.extension.clone());
        self.vars.set(keys::CONTENT_LENGTH, settings.content_length);
        self.vars
            .set(keys::OUTPUT_BUFFERING, settings.v2_output_buffering);
        info!("applied navigator settings");
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.set(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.vars.has(key)
    }

    pub fn clear(&mut self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.vars.remove(key);
            }
            None => self.vars.clear(),
        }
    }

    pub fn test_mode(&self) -> bool {
        self.vars.get_flag(keys::TEST_MODE)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut OutputBuffer {
        &mut self.output
    }

    /// Echoes into the current output scope.
    pub fn echo(&mut self, data: &str) {
        self.output.echo(data);
    }

    /// Loads a shared service as `T`.
    pub fn service<T: std::any::Any + Send + Sync>(&mut self, name: &str) -> NavResult<Arc<T>> {
        self.loader.load_as::<T>(name, &self.vars)
    }

    pub fn request(&mut self) -> NavResult<Arc<Mutex<Request>>> {
        self.service("request")
    }

    pub fn response(&mut self) -> NavResult<Arc<Mutex<Response>>> {
        self.service("response")
    }

    pub fn router(&mut self) -> NavResult<Arc<Mutex<RouteTable>>> {
        self.service("router")
    }

    pub fn view(&mut self) -> NavResult<Arc<Mutex<View>>> {
        self.service("view")
    }

    /// Runs `f` against the locked route table.
    pub fn with_router<R>(&mut self, f: impl FnOnce(&mut RouteTable) -> R) -> NavResult<R> {
        let router = self.router()?;
        let mut table = router.lock();
        Ok(f(&mut table))
    }

    fn is_reserved(name: &str) -> bool {
        BUILTIN_OPERATIONS.contains(&name) || ENGINE_METHODS.contains(&name)
    }

    /// Binds a new named operation.
    pub fn map(&mut self, name: &str, callback: impl Into<Callback>) -> NavResult<()> {
        if Self::is_reserved(name) {
            return Err(config_error!("Cannot override an existing framework method."));
        }
        self.dispatcher.set(name, callback.into());
        Ok(())
    }

    /// Registers a named service.
    pub fn register<F>(
        &mut self,
        name: &str,
        factory: F,
        params: Vec<Value>,
        hook: Option<ServiceHook>,
    ) -> NavResult<()>
    where
        F: Fn(&[Value]) -> NavResult<Instance> + Send + Sync + 'static,
    {
        if Self::is_reserved(name) {
            return Err(config_error!("Cannot override an existing framework method."));
        }
        self.loader.register(name, factory, params, hook);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) {
        self.loader.unregister(name);
    }

    pub fn before<F>(&mut self, name: &str, filter: F)
    where
        F: Fn(&mut Engine, &mut Args, &mut Value) -> DispatchResult<bool> + Send + Sync + 'static,
    {
        self.dispatcher.hook(name, Phase::Before, Arc::new(filter));
    }

    pub fn after<F>(&mut self, name: &str, filter: F)
    where
        F: Fn(&mut Engine, &mut Args, &mut Value) -> DispatchResult<bool> + Send + Sync + 'static,
    {
        self.dispatcher.hook(name, Phase::After, Arc::new(filter));
    }

    pub fn register_resolver(&mut self, resolver: Resolver) {
        self.dispatcher.set_resolver(resolver);
    }

    /// Makes `name` constructible for `"name->method"` callbacks.
    pub fn register_class<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Engine) -> Arc<dyn Controller> + Send + Sync + 'static,
    {
        self.dispatcher.register_class(name, Arc::new(factory));
    }

    /// Makes `name` usable as a plain function callback.
    pub fn register_function<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&mut Engine, &mut Args) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        self.dispatcher.register_function(name, Arc::new(handler));
    }

    pub fn operation_kind(&self, name: &str) -> Option<OperationKind> {
        if BUILTIN_OPERATIONS.contains(&name) {
            Some(OperationKind::BuiltIn)
        } else if self.dispatcher.has(name) {
            Some(OperationKind::Extension)
        } else if self.loader.get(name).is_some() {
            Some(OperationKind::Service)
        } else {
            None
        }
    }

    /// Invokes a name: bound operations first, then services. A service is
    /// loaded shared unless the first param is falsy.
    pub fn call(&mut self, name: &str, params: Args) -> DispatchResult<Called> {
        if self.dispatcher.has(name) {
            return Dispatcher::run(self, name, params).map(Called::Output);
        }
        let shared = params.first().map_or(true, truthy);
        match self.loader.load(name, shared, &self.vars)? {
            Some(service) => Ok(Called::Service(service)),
            None => Err(config_error!("{} must be a mapped method.", name).into()),
        }
    }

    /// Runs a bound operation through its filters.
    pub fn run(&mut self, name: &str, params: Args) -> DispatchResult<Value> {
        Dispatcher::run(self, name, params)
    }

    /// Dispatches `request` with a fresh response.
    pub fn handle(&mut self, request: Request) -> NavResult<Exit> {
        self.loader.release("response");
        *self.request()?.lock() = request;
        self.start()
    }

    /// Runs the `start` operation and settles its outcome. Errors become a
    /// 500 page when error handling is on. Output scopes opened during the
    /// run are always closed.
    pub fn start(&mut self) -> NavResult<Exit> {
        let base = self.output.level();
        let outcome = Dispatcher::run(self, "start", Args::new());
        let exit = match outcome {
            Ok(_) => Ok(Exit::Completed),
            Err(Interrupt::Halt { code, .. }) => {
                debug!("request halted with status {code}");
                Ok(Exit::Halted { code })
            }
            Err(Interrupt::Error(err)) => {
                self.output.unwind_to(base);
                if self.vars.get_flag(keys::HANDLE_ERRORS) {
                    let message = err.to_string();
                    self.handle_exception(&err);
                    Ok(Exit::Failed { message })
                } else {
                    Err(err)
                }
            }
        };
        self.output.unwind_to(base);
        exit
    }

    /// Logs (when enabled) and renders the 500 page for `err`.
    pub fn handle_exception(&mut self, err: &NavError) {
        if self.vars.get_flag(keys::LOG_ERRORS) {
            error!("{err}");
        }
        let message = err.to_string();
        let args = vec![json!(message), json!(format!("{err:?}"))];
        if let Err(failure) = Dispatcher::run(self, "error", args) {
            debug!("error page failed: {failure}");
            self.output.emit(message.as_bytes());
        }
    }

    // Typed entry points for the built-in operations. Each goes through the
    // dispatcher so filters apply.

    pub fn stop(&mut self, code: Option<u16>) -> DispatchResult<()> {
        let args = code.map(|c| vec![json!(c)]).unwrap_or_default();
        self.run("stop", args).map(drop)
    }

    pub fn halt(&mut self, code: u16, message: &str, terminate: bool) -> DispatchResult<()> {
        self.run("halt", vec![json!(code), json!(message), json!(terminate)])
            .map(drop)
    }

    pub fn error(&mut self, message: &str) -> DispatchResult<()> {
        self.run("error", vec![json!(message)]).map(drop)
    }

    pub fn not_found(&mut self) -> DispatchResult<()> {
        self.run("notFound", Args::new()).map(drop)
    }

    pub fn redirect(&mut self, url: &str, code: u16) -> DispatchResult<()> {
        self.run("redirect", vec![json!(url), json!(code)]).map(drop)
    }

    pub fn json(&mut self, data: Value, code: u16) -> DispatchResult<()> {
        self.run("json", vec![data, json!(code)]).map(drop)
    }

    pub fn json_halt(&mut self, data: Value, code: u16) -> DispatchResult<()> {
        self.run("jsonHalt", vec![data, json!(code)]).map(drop)
    }

    pub fn jsonp(&mut self, data: Value, param: &str, code: u16) -> DispatchResult<()> {
        self.run("jsonp", vec![data, json!(param), json!(code)])
            .map(drop)
    }

    pub fn etag(&mut self, id: &str, weak: bool) -> DispatchResult<()> {
        let kind = if weak { "weak" } else { "strong" };
        self.run("etag", vec![json!(id), json!(kind)]).map(drop)
    }

    pub fn last_modified(&mut self, timestamp: i64) -> DispatchResult<()> {
        self.run("lastModified", vec![json!(timestamp)]).map(drop)
    }

    pub fn render(&mut self, file: &str, data: Option<Value>, key: Option<&str>) -> DispatchResult<()> {
        let args = vec![
            json!(file),
            data.unwrap_or(Value::Null),
            key.map_or(Value::Null, |k| json!(k)),
        ];
        self.run("render", args).map(drop)
    }

    pub fn download(&mut self, path: &str) -> DispatchResult<()> {
        self.run("download", vec![json!(path)]).map(drop)
    }

    pub fn get_url(&mut self, alias: &str, params: Map<String, Value>) -> DispatchResult<String> {
        let url = self.run("getUrl", vec![json!(alias), Value::Object(params)])?;
        Ok(url.as_str().unwrap_or_default().to_string())
    }

    // Typed route registration. Callbacks that are not plain strings cannot
    // travel through event arguments, so these go straight to the table.

    pub fn route(&mut self, pattern: &str, callback: impl Into<Callback>) -> NavResult<()> {
        let callback = callback.into();
        self.with_router(|t| {
            t.map(pattern, callback, false, "");
        })
    }

    pub fn route_with(
        &mut self,
        pattern: &str,
        callback: impl Into<Callback>,
        pass_route: bool,
        alias: &str,
    ) -> NavResult<()> {
        let callback = callback.into();
        self.with_router(|t| {
            t.map(pattern, callback, pass_route, alias);
        })
    }

    pub fn post(&mut self, pattern: &str, callback: impl Into<Callback>) -> NavResult<()> {
        self.route(&format!("POST {pattern}"), callback)
    }

    pub fn put(&mut self, pattern: &str, callback: impl Into<Callback>) -> NavResult<()> {
        self.route(&format!("PUT {pattern}"), callback)
    }

    pub fn patch(&mut self, pattern: &str, callback: impl Into<Callback>) -> NavResult<()> {
        self.route(&format!("PATCH {pattern}"), callback)
    }

    pub fn delete(&mut self, pattern: &str, callback: impl Into<Callback>) -> NavResult<()> {
        self.route(&format!("DELETE {pattern}"), callback)
    }

    pub fn group<F>(&mut self, prefix: &str, middleware: Vec<Middleware>, builder: F) -> NavResult<()>
    where
        F: FnOnce(&mut RouteTable),
    {
        self.with_router(|t| t.group(prefix, middleware, builder))
    }

    pub fn resource(&mut self, pattern: &str, controller: &str, options: ResourceOptions) -> NavResult<()> {
        self.with_router(|t| t.map_resource(pattern, controller, options))
    }
}
