//! Named operation registry with before/after filter chains.
//!
//! The dispatcher also turns every callable representation into an actual
//! invocation, constructing handler classes through the configured resolver
//! or the class registry.

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace};
use serde_json::Value;

use super::{
    callback::{Callback, ClassFactory, Filter, Handler, Target},
    container::Resolver,
    error::{DispatchResult, NavError, NavResult},
    traits::{Args, Controller, FRAMEWORK_NAMESPACE},
};
use crate::orchestration::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

#[derive(Default, Clone)]
struct Filters {
    before: Vec<Filter>,
    after: Vec<Filter>,
}

#[derive(Default)]
pub struct Dispatcher {
    events: HashMap<String, Callback>,
    filters: HashMap<String, Filters>,
    classes: HashMap<String, ClassFactory>,
    functions: HashMap<String, Handler>,
    resolver: Resolver,
    resolver_error: Option<NavError>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, callback: Callback) -> &mut Self {
        self.events.insert(name.into(), callback);
        self
    }

    pub fn get(&self, name: &str) -> Option<Callback> {
        self.events.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    /// Appends a filter to the chain of `name`.
    pub fn hook(&mut self, name: impl Into<String>, phase: Phase, filter: Filter) -> &mut Self {
        let filters = self.filters.entry(name.into()).or_default();
        match phase {
            Phase::Before => filters.before.push(filter),
            Phase::After => filters.after.push(filter),
        }
        self
    }

    pub fn filter_count(&self, name: &str, phase: Phase) -> usize {
        self.filters.get(name).map_or(0, |f| match phase {
            Phase::Before => f.before.len(),
            Phase::After => f.after.len(),
        })
    }

    /// Removes one event and its filters, or everything when `name` is `None`.
    pub fn clear(&mut self, name: Option<&str>) {
        match name {
            Some(name) => {
                self.events.remove(name);
                self.filters.remove(name);
            }
            None => self.reset(),
        }
    }

    pub fn reset(&mut self) {
        self.events.clear();
        self.filters.clear();
        self.classes.clear();
        self.functions.clear();
        self.resolver = Resolver::None;
        self.resolver_error = None;
    }

    pub fn set_resolver(&mut self, resolver: Resolver) {
        self.resolver = resolver;
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn register_class(&mut self, name: impl Into<String>, factory: ClassFactory) {
        self.classes.insert(name.into(), factory);
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn register_function(&mut self, name: impl Into<String>, handler: Handler) {
        self.functions.insert(name.into(), handler);
    }

    /// Splits `"Class->method"` or `"Class::method"`.
    pub fn parse_string_class_and_method(callback: &str) -> Option<(String, String)> {
        callback
            .split_once("->")
            .or_else(|| callback.split_once("::"))
            .map(|(class, method)| (class.to_string(), method.to_string()))
    }

    /// Whether construction of `target` goes through the resolver.
    ///
    /// Instances of the framework's own types are recognised purely by their
    /// type-name prefix. This is a fragile heuristic: any user type living in
    /// a module path that starts with the prefix is bypassed as well.
    pub fn must_use_resolver(&self, target: &Target) -> bool {
        self.resolver.is_configured()
            && match target {
                Target::Class(_) => true,
                Target::Instance(obj) => !obj.type_name().starts_with(FRAMEWORK_NAMESPACE),
            }
    }

    /// Asks the resolver for `class`. A resolver error is stored rather than
    /// returned, and surfaces only if nothing usable is produced.
    pub fn resolve_class(&mut self, class: &str, args: &Args) -> Option<Arc<dyn Controller>> {
        match self.resolver.resolve(class, args) {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!("resolver failed for '{class}': {err}");
                self.resolver_error = Some(err);
                None
            }
        }
    }

    /// Runs the named operation through its filter chains.
    pub fn run(engine: &mut Engine, name: &str, mut params: Args) -> DispatchResult<Value> {
        let callback = engine
            .dispatcher()
            .get(name)
            .ok_or_else(|| NavError::OperationNotFound(name.to_string()))?;
        let filters = engine
            .dispatcher()
            .filters
            .get(name)
            .cloned()
            .unwrap_or_default();

        trace!("running event '{name}'");

        let mut output = Value::Null;
        for filter in &filters.before {
            if !filter(engine, &mut params, &mut output)? {
                debug!("before filter aborted event '{name}'");
                return Ok(output);
            }
        }

        let mut output = Self::execute(engine, &callback, &mut params)?;

        let mut no_params = Args::new();
        for filter in &filters.after {
            if !filter(engine, &mut no_params, &mut output)? {
                break;
            }
        }

        Ok(output)
    }

    /// Invokes any callback representation.
    pub fn execute(
        engine: &mut Engine,
        callback: &Callback,
        params: &mut Args,
    ) -> DispatchResult<Value> {
        match callback {
            Callback::Closure(handler) => handler(engine, params),
            Callback::Function(name) => {
                if let Some((class, method)) = Self::parse_string_class_and_method(name) {
                    return Self::invoke_method(engine, Target::Class(class), &method, params);
                }
                let handler = engine
                    .dispatcher()
                    .functions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| NavError::InvalidCallable(name.clone()))?;
                handler(engine, params)
            }
            Callback::Method(target, method) => {
                Self::invoke_method(engine, target.clone(), method, params)
            }
        }
    }

    pub fn invoke_method(
        engine: &mut Engine,
        target: Target,
        method: &str,
        params: &mut Args,
    ) -> DispatchResult<Value> {
        let level = engine.output().level();
        let instance = match Self::instantiate(engine, target, method, params) {
            Ok(instance) => instance,
            Err(err) => {
                engine.output_mut().unwind_to(level);
                return Err(err.into());
            }
        };
        instance.call(method, engine, params)
    }

    /// Builds `class` from the class registry.
    pub fn construct(engine: &Engine, class: &str) -> Option<Arc<dyn Controller>> {
        let factory = engine.dispatcher().classes.get(class).cloned()?;
        debug!("constructing '{class}' by hand");
        Some(factory(engine))
    }

    /// Resolves or constructs the receiver of `method`, then validates it.
    ///
    /// Failures are reported in a fixed order: unknown class, deferred
    /// resolver error, missing method.
    pub fn instantiate(
        engine: &mut Engine,
        target: Target,
        method: &str,
        params: &Args,
    ) -> NavResult<Arc<dyn Controller>> {
        engine.dispatcher_mut().resolver_error = None;

        let mut resolved = None;
        if engine.dispatcher().must_use_resolver(&target) {
            let class = target.name().to_string();
            resolved = engine.dispatcher_mut().resolve_class(&class, params);
        }
        let deferred = engine.dispatcher_mut().resolver_error.take();
        let was_resolved = resolved.is_some();
        let target = resolved.map(Target::Instance).unwrap_or(target);

        if let Target::Class(class) = &target {
            if !engine.dispatcher().has_class(class) {
                return Err(NavError::ClassNotFound(class.clone()));
            }
        }
        if !was_resolved {
            if let Some(err) = deferred {
                return Err(NavError::ResolverFailure(Box::new(err)));
            }
        }

        let instance = match target {
            Target::Instance(obj) => obj,
            Target::Class(class) => {
                Self::construct(engine, &class).ok_or(NavError::ClassNotFound(class))?
            }
        };

        if !instance.has_method(method) {
            return Err(NavError::MethodNotFound {
                class: instance.type_name().to_string(),
                method: method.to_string(),
            });
        }

        Ok(instance)
    }
}
