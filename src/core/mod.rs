//! Core abstractions for Navigator
//!
//! The dispatcher, the service loader and the callable representations they
//! share, plus the error and output types every other module builds on.

pub mod callback;
pub mod container;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod loader;
pub mod output;
pub mod traits;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use callback::{Callback, Middleware, Target};
pub use container::Resolver;
pub use context::Vars;
pub use dispatcher::{Dispatcher, Phase};
pub use error::{DispatchResult, Interrupt, NavError, NavResult};
pub use loader::Loader;
pub use output::OutputBuffer;
pub use traits::*;
