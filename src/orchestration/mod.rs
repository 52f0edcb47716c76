//! Request orchestration layer
//!
//! The engine ties the dispatcher, the service loader and the route table
//! together and runs requests through them.

pub mod engine;
pub mod lifecycle;
pub mod operations;

#[cfg(test)]
mod tests;

pub use engine::{Called, Engine, OperationKind};
pub use lifecycle::Exit;
