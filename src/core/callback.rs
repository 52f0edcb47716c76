//! Callable representations accepted by routes, events and middleware.

use std::{fmt, sync::Arc};

use serde_json::Value;

use super::{
    error::DispatchResult,
    traits::{Args, Controller},
};
use crate::orchestration::Engine;

/// A bound closure handler.
pub type Handler = Arc<dyn Fn(&mut Engine, &mut Args) -> DispatchResult<Value> + Send + Sync>;

/// A dispatcher filter. Receives the operation arguments and its output;
/// returning `false` stops the chain.
pub type Filter =
    Arc<dyn Fn(&mut Engine, &mut Args, &mut Value) -> DispatchResult<bool> + Send + Sync>;

/// Builds a controller by hand, with the engine as the only argument.
pub type ClassFactory = Arc<dyn Fn(&Engine) -> Arc<dyn Controller> + Send + Sync>;

/// Receiver of a two-part callback.
#[derive(Clone)]
pub enum Target {
    Class(String),
    Instance(Arc<dyn Controller>),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Class(name) => name,
            Target::Instance(obj) => obj.type_name(),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Class(name) => write!(f, "Class({name})"),
            Target::Instance(obj) => write!(f, "Instance({})", obj.type_name()),
        }
    }
}

/// A route handler or event body.
///
/// Strings stay unparsed until dispatch: `"Class->method"` and
/// `"Class::method"` name a class method, anything else names a function
/// from the dispatcher's function registry.
#[derive(Clone)]
pub enum Callback {
    Closure(Handler),
    Function(String),
    Method(Target, String),
}

impl Callback {
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&mut Engine, &mut Args) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        Callback::Closure(Arc::new(f))
    }

    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Callback::Method(Target::Class(class.into()), method.into())
    }

    pub fn instance(obj: Arc<dyn Controller>, method: impl Into<String>) -> Self {
        Callback::Method(Target::Instance(obj), method.into())
    }

    pub fn describe(&self) -> String {
        match self {
            Callback::Closure(_) => "closure".to_string(),
            Callback::Function(name) => name.clone(),
            Callback::Method(target, method) => format!("{}->{method}", target.name()),
        }
    }
}

impl From<&str> for Callback {
    fn from(name: &str) -> Self {
        Callback::Function(name.to_string())
    }
}

impl From<String> for Callback {
    fn from(name: String) -> Self {
        Callback::Function(name)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({})", self.describe())
    }
}

/// Route-level interceptor.
///
/// Closures only run before the handler. Objects and classes run in the
/// phase whose name matches one of their methods (`before` or `after`).
#[derive(Clone)]
pub enum Middleware {
    Closure(Handler),
    Instance(Arc<dyn Controller>),
    Class(String),
}

impl Middleware {
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&mut Engine, &mut Args) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        Middleware::Closure(Arc::new(f))
    }

    pub fn instance<C: Controller + 'static>(obj: C) -> Self {
        Middleware::Instance(Arc::new(obj))
    }

    pub fn class(name: impl Into<String>) -> Self {
        Middleware::Class(name.into())
    }
}

impl From<&str> for Middleware {
    fn from(name: &str) -> Self {
        Middleware::Class(name.to_string())
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Middleware::Closure(_) => write!(f, "Middleware::Closure"),
            Middleware::Instance(obj) => write!(f, "Middleware::Instance({})", obj.type_name()),
            Middleware::Class(name) => write!(f, "Middleware::Class({name})"),
        }
    }
}
