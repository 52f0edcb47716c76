use std::{fs, path::Path};

use log::debug;

use crate::core::error::{NavError, NavResult, UploadErrorKind};

/// Descriptor of a file received with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    name: String,
    mime_type: String,
    size: u64,
    tmp_name: String,
    error: i32,
}

impl UploadedFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
        tmp_name: impl Into<String>,
        error: i32,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            tmp_name: tmp_name.into(),
            error,
        }
    }

    pub fn client_filename(&self) -> &str {
        &self.name
    }

    pub fn client_media_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn temp_name(&self) -> &str {
        &self.tmp_name
    }

    pub fn error(&self) -> i32 {
        self.error
    }

    pub fn error_kind(&self) -> Option<UploadErrorKind> {
        UploadErrorKind::from_code(self.error)
    }

    /// Moves the temporary file to `target`.
    pub fn move_to(&self, target: impl AsRef<Path>) -> NavResult<()> {
        if let Some(kind) = self.error_kind() {
            return Err(NavError::Upload(kind));
        }
        let target = target.as_ref();
        debug!("moving upload '{}' to {}", self.name, target.display());
        fs::rename(&self.tmp_name, target).map_err(|e| {
            NavError::Io(std::io::Error::new(
                e.kind(),
                format!("Cannot move uploaded file: {e}"),
            ))
        })
    }
}
