//! Navigator: a small routing and dispatch framework.
//!
//! An [`Engine`] maps URL patterns to handlers, runs them with middleware
//! and filter hooks, and writes the outcome into an in-process response.

pub mod config;
pub mod core;
pub mod logging;
pub mod net;
pub mod orchestration;
pub mod routing;
pub mod view;

pub use orchestration::{Engine, Exit};
