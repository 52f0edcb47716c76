//! Pluggable dependency resolution
//!
//! The dispatcher consults the configured [`Resolver`] before constructing
//! handler classes by hand.

use std::{fmt, sync::Arc};

use super::{
    error::NavResult,
    traits::{Args, Container, Controller},
};

/// Resolver callback: receives the class name and the handler arguments.
/// `Ok(None)` means "not mine", and construction falls back to the class
/// registry.
pub type ResolverFn =
    Arc<dyn Fn(&str, &Args) -> NavResult<Option<Arc<dyn Controller>>> + Send + Sync>;

#[derive(Clone, Default)]
pub enum Resolver {
    #[default]
    None,
    Function(ResolverFn),
    Container(Arc<dyn Container>),
}

impl Resolver {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&str, &Args) -> NavResult<Option<Arc<dyn Controller>>> + Send + Sync + 'static,
    {
        Resolver::Function(Arc::new(f))
    }

    pub fn container<C: Container + 'static>(container: C) -> Self {
        Resolver::Container(Arc::new(container))
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, Resolver::None)
    }

    /// Asks the resolver for an instance of `class`.
    pub fn resolve(&self, class: &str, args: &Args) -> NavResult<Option<Arc<dyn Controller>>> {
        match self {
            Resolver::None => Ok(None),
            Resolver::Container(container) => {
                if container.has(class) {
                    container.get(class).map(Some)
                } else {
                    Ok(None)
                }
            }
            Resolver::Function(f) => f(class, args),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::None => write!(f, "Resolver::None"),
            Resolver::Function(_) => write!(f, "Resolver::Function"),
            Resolver::Container(_) => write!(f, "Resolver::Container"),
        }
    }
}
