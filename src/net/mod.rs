//! Request and response value objects
//!
//! These are the in-process collaborators the engine routes and writes to.

pub mod request;
pub mod response;
pub mod status;
pub mod upload;

pub use request::Request;
pub use response::{Expiry, Response};
pub use upload::UploadedFile;
