//! Route patterns and the ordered route table.

pub mod route;
pub mod table;

pub use route::Route;
pub use table::{ResourceOptions, RouteTable};
