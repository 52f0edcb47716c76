//! Lazy service registry
//!
//! Services are registered by name with a factory, constructor parameters
//! and an optional post-construction hook. Shared loads cache the instance;
//! the hook runs once per freshly built instance.

use std::{any::Any, collections::HashMap, sync::Arc};

use log::debug;
use serde_json::Value;

use super::{
    context::Vars,
    error::{NavError, NavResult},
};
use crate::internal_error;

/// A constructed service.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub type ServiceFactory = Arc<dyn Fn(&[Value]) -> NavResult<Instance> + Send + Sync>;

/// Runs after a fresh instance is built, with read access to the engine vars.
pub type ServiceHook = Arc<dyn Fn(&Instance, &Vars) + Send + Sync>;

#[derive(Clone)]
pub struct Registration {
    factory: ServiceFactory,
    params: Vec<Value>,
    hook: Option<ServiceHook>,
}

impl Registration {
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

#[derive(Default)]
pub struct Loader {
    registrations: HashMap<String, Registration>,
    instances: HashMap<String, Instance>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service. Any cached instance under `name` is dropped.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        factory: F,
        params: Vec<Value>,
        hook: Option<ServiceHook>,
    ) where
        F: Fn(&[Value]) -> NavResult<Instance> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("registering service '{name}'");
        self.instances.remove(&name);
        self.registrations.insert(
            name,
            Registration {
                factory: Arc::new(factory),
                params,
                hook,
            },
        );
    }

    pub fn unregister(&mut self, name: &str) {
        self.registrations.remove(name);
    }

    /// Drops the cached instance so the next shared load rebuilds it.
    pub fn release(&mut self, name: &str) {
        self.instances.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.registrations.get(name)
    }

    pub fn get_instance(&self, name: &str) -> Option<Instance> {
        self.instances.get(name).cloned()
    }

    /// Loads a service. Returns `Ok(None)` when `name` is not registered.
    pub fn load(&mut self, name: &str, shared: bool, vars: &Vars) -> NavResult<Option<Instance>> {
        let Some(registration) = self.registrations.get(name).cloned() else {
            return Ok(None);
        };

        let (instance, fresh) = match self.instances.get(name) {
            Some(existing) if shared => (existing.clone(), false),
            _ => {
                let instance = (registration.factory)(&registration.params)?;
                if shared {
                    self.instances.insert(name.to_string(), instance.clone());
                }
                (instance, true)
            }
        };

        if fresh {
            if let Some(hook) = &registration.hook {
                hook(&instance, vars);
            }
        }

        Ok(Some(instance))
    }

    /// Loads a shared service and downcasts it to `T`.
    pub fn load_as<T: Any + Send + Sync>(&mut self, name: &str, vars: &Vars) -> NavResult<Arc<T>> {
        let instance = self
            .load(name, true, vars)?
            .ok_or_else(|| NavError::Configuration(format!("{name} must be a mapped method.")))?;
        instance
            .downcast::<T>()
            .map_err(|_| internal_error!("service '{}' has an unexpected type", name))
    }

    pub fn reset(&mut self) {
        self.registrations.clear();
        self.instances.clear();
    }
}

/// Wraps a value as a service instance.
pub fn instance<T: Any + Send + Sync>(value: T) -> Instance {
    Arc::new(value)
}
