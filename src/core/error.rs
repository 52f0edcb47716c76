//! Unified error handling for Navigator
//!
//! Every fallible operation in the crate returns [`NavResult`]. Code that
//! runs inside the dispatch loop returns [`DispatchResult`] instead, whose
//! error side also carries the [`Interrupt::Halt`] control signal.

use std::fmt;

/// Reasons an uploaded file can be unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    IniSize,
    FormSize,
    Partial,
    NoFile,
    NoTmpDir,
    CantWrite,
    Extension,
    Unknown(i32),
}

impl UploadErrorKind {
    /// Maps a raw upload error code to its kind. Code `0` means the upload
    /// succeeded and yields `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(Self::IniSize),
            2 => Some(Self::FormSize),
            3 => Some(Self::Partial),
            4 => Some(Self::NoFile),
            6 => Some(Self::NoTmpDir),
            7 => Some(Self::CantWrite),
            8 => Some(Self::Extension),
            other => Some(Self::Unknown(other)),
        }
    }
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IniSize => write!(f, "The uploaded file exceeds the maximum upload size."),
            Self::FormSize => write!(
                f,
                "The uploaded file exceeds the maximum size that was specified in the form."
            ),
            Self::Partial => write!(f, "The uploaded file was only partially uploaded."),
            Self::NoFile => write!(f, "No file was uploaded."),
            Self::NoTmpDir => write!(f, "Missing a temporary folder."),
            Self::CantWrite => write!(f, "Failed to write file to disk."),
            Self::Extension => write!(f, "An extension stopped the file upload."),
            Self::Unknown(code) => write!(f, "An unknown error occurred. Error code: {code}"),
        }
    }
}

/// Unified error types for the framework
#[derive(Debug)]
pub enum NavError {
    /// Programmer misuse: bad status code, shadowing a built-in, unknown service
    Configuration(String),

    /// Alias lookup found no route
    RouteNotFound(String),

    /// A handler reference cannot be turned into anything invocable
    InvalidCallable(String),

    /// Class name unknown to the class registry
    ClassNotFound(String),

    /// Class resolved but the method does not exist on it
    MethodNotFound { class: String, method: String },

    /// The external resolver failed while building a handler instance
    ResolverFailure(Box<NavError>),

    /// No invocable is bound to the named operation
    OperationNotFound(String),

    /// Upload descriptor carries a failure code
    Upload(UploadErrorKind),

    /// Requested view file is absent
    TemplateNotFound(String),

    /// File offered for download is absent
    FileNotFound(String),

    /// I/O errors
    Io(std::io::Error),

    /// JSON encoding errors
    Json(serde_json::Error),

    /// YAML parsing errors
    Yaml(serde_yaml::Error),

    /// Internal errors
    Internal(String),
}

impl fmt::Display for NavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            NavError::RouteNotFound(alias) => write!(f, "No route found with alias: '{alias}'."),
            NavError::InvalidCallable(desc) => write!(f, "Invalid callback specified: {desc}"),
            NavError::ClassNotFound(class) => write!(f, "Class '{class}' not found."),
            NavError::MethodNotFound { class, method } => {
                write!(f, "Class found, but method '{class}::{method}' not found.")
            }
            NavError::ResolverFailure(err) => write!(f, "Resolver failed: {err}"),
            NavError::OperationNotFound(name) => write!(f, "Operation '{name}' not found."),
            NavError::Upload(kind) => write!(f, "Upload error: {kind}"),
            NavError::TemplateNotFound(path) => write!(f, "Template file not found: {path}."),
            NavError::FileNotFound(path) => write!(f, "{path} cannot be found."),
            NavError::Io(err) => write!(f, "I/O error: {err}"),
            NavError::Json(err) => write!(f, "JSON error: {err}"),
            NavError::Yaml(err) => write!(f, "YAML error: {err}"),
            NavError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for NavError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NavError::ResolverFailure(err) => Some(err.as_ref()),
            NavError::Io(err) => Some(err),
            NavError::Json(err) => Some(err),
            NavError::Yaml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NavError {
    fn from(err: std::io::Error) -> Self {
        NavError::Io(err)
    }
}

impl From<serde_json::Error> for NavError {
    fn from(err: serde_json::Error) -> Self {
        NavError::Json(err)
    }
}

impl From<serde_yaml::Error> for NavError {
    fn from(err: serde_yaml::Error) -> Self {
        NavError::Yaml(err)
    }
}

/// Result type alias for framework operations
pub type NavResult<T> = std::result::Result<T, NavError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> NavResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> NavResult<T> {
        self.map_err(|e| NavError::Internal(format!("{context}: {e}")))
    }
}

/// Early exit from the dispatch stack.
///
/// `Halt` is a deliberate stop after a response has been written. It is not
/// a failure and is never logged as one.
#[derive(Debug)]
pub enum Interrupt {
    Halt { code: u16, message: String },
    Error(NavError),
}

impl Interrupt {
    pub fn is_halt(&self) -> bool {
        matches!(self, Interrupt::Halt { .. })
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Halt { code, .. } => write!(f, "halted with status {code}"),
            Interrupt::Error(err) => write!(f, "{err}"),
        }
    }
}

impl From<NavError> for Interrupt {
    fn from(err: NavError) -> Self {
        Interrupt::Error(err)
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(err: std::io::Error) -> Self {
        Interrupt::Error(NavError::Io(err))
    }
}

impl From<serde_json::Error> for Interrupt {
    fn from(err: serde_json::Error) -> Self {
        Interrupt::Error(NavError::Json(err))
    }
}

/// Result type for anything running inside the dispatch loop
pub type DispatchResult<T> = std::result::Result<T, Interrupt>;

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::NavError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::NavError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::NavError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::NavError::Internal(format!($fmt, $($arg)*))
    };
}
