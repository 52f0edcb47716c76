use std::{
    fs::{create_dir_all, OpenOptions},
    path::Path,
    str::FromStr,
};

use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::{
    config,
    core::error::{ErrorContext, NavResult},
};

/// Parses a level name, falling back to `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::Info)
}

/// Builds the logger for `config`: stderr when no file is configured,
/// otherwise records are appended to the configured file.
pub fn builder(config: Option<&config::Log>) -> NavResult<Builder> {
    let mut builder = Builder::from_env(env_logger::Env::default());

    let Some(config) = config else {
        builder.filter(None, LevelFilter::Info);
        return Ok(builder);
    };

    builder.filter(None, level_filter(&config.level));

    if let Some(parent) = Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            create_dir_all(parent).with_context("Failed to create log path")?;
        }
    }
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&config.path)
        .with_context("Failed to open or create log file")?;
    builder.target(Target::Pipe(Box::new(file)));

    Ok(builder)
}

/// Installs the global logger. Later calls are ignored.
pub fn init(config: Option<&config::Log>) -> NavResult<()> {
    let mut builder = builder(config)?;
    if builder.try_init().is_err() {
        log::debug!("logger already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter("debug"), LevelFilter::Debug);
        assert_eq!(level_filter("WARN"), LevelFilter::Warn);
        assert_eq!(level_filter("loud"), LevelFilter::Info);
    }

    #[test]
    fn test_file_target_creates_parent() {
        let dir = std::env::temp_dir().join(format!("navigator-log-{}", std::process::id()));
        let path = dir.join("nested").join("app.log");
        let conf = config::Log {
            path: path.to_string_lossy().into_owned(),
            level: "debug".to_string(),
        };
        builder(Some(&conf)).unwrap();
        assert!(path.exists());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
