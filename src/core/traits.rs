//! Core traits for Navigator components
//!
//! Handler objects and dependency containers plug into the dispatcher
//! through these interfaces.

use std::sync::Arc;

use serde_json::Value;

use super::error::{DispatchResult, NavResult};
use crate::orchestration::Engine;

/// Positional arguments passed to handlers, filters and middleware.
pub type Args = Vec<Value>;

/// Namespace prefix of the framework's own types. Instances whose type name
/// starts with it are never handed to an external resolver.
pub const FRAMEWORK_NAMESPACE: &str = "navigator::";

/// A handler object exposing named methods.
///
/// This is the target of `"Class->method"` callbacks and of object
/// middleware, which implements `before` and/or `after`.
pub trait Controller: Send + Sync {
    /// Fully qualified type name used by the resolver bypass check.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn has_method(&self, method: &str) -> bool;

    fn call(&self, method: &str, engine: &mut Engine, args: &mut Args) -> DispatchResult<Value>;
}

/// A standard dependency container.
pub trait Container: Send + Sync {
    fn has(&self, class: &str) -> bool;

    fn get(&self, class: &str) -> NavResult<Arc<dyn Controller>>;
}
