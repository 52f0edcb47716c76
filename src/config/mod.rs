use std::fs;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::error::{ErrorContext, NavError, NavResult};

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    #[serde(default)]
    pub navigator: Settings,

    #[validate(nested)]
    pub log: Option<Log>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> NavResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str =
            fs::read_to_string(&path).with_context(&format!("Unable to read conf file from {path}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> NavResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .map_err(|e| NavError::Configuration(format!("Conf file valid failed: {e}")))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> NavResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Framework settings, mirrored into the engine vars by
/// `Engine::apply_config`.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Settings::validate_base_url"))]
pub struct Settings {
    pub base_url: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "Settings::default_true")]
    pub handle_errors: bool,
    #[serde(default)]
    pub log_errors: bool,
    #[validate(nested)]
    #[serde(default)]
    pub views: Views,
    #[serde(default = "Settings::default_true")]
    pub content_length: bool,
    #[serde(default)]
    pub v2_output_buffering: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: None,
            case_sensitive: false,
            handle_errors: true,
            log_errors: false,
            views: Views::default(),
            content_length: true,
            v2_output_buffering: false,
        }
    }
}

impl Settings {
    fn validate_base_url(&self) -> Result<(), ValidationError> {
        match &self.base_url {
            Some(base) if !base.starts_with('/') && !base.contains("://") => {
                Err(ValidationError::new("base_url_must_be_absolute"))
            }
            _ => Ok(()),
        }
    }

    fn default_true() -> bool {
        true
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Views::validate_extension"))]
pub struct Views {
    #[serde(default = "Views::default_path")]
    pub path: String,
    #[serde(default = "Views::default_extension")]
    pub extension: String,
}

impl Default for Views {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            extension: Self::default_extension(),
        }
    }
}

impl Views {
    fn validate_extension(&self) -> Result<(), ValidationError> {
        if self.extension.starts_with('.') {
            Ok(())
        } else {
            Err(ValidationError::new("extension_must_start_with_dot"))
        }
    }

    fn default_path() -> String {
        "./views".to_string()
    }

    fn default_extension() -> String {
        ".html".to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    /// Log file; records are appended.
    #[validate(length(min = 1))]
    pub path: String,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(default = "Log::default_level")]
    pub level: String,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }
}
