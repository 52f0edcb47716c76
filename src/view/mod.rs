//! Minimal template renderer
//!
//! Templates are plain files with `{{ name }}` placeholders, which are
//! replaced by HTML-escaped values. `{{{ name }}}` inserts the raw value.

use std::{
    fs,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::core::{
    error::{NavError, NavResult},
    output::OutputBuffer,
};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\{)?\s*([\w.]+)\s*\}?\}\}").unwrap());

#[derive(Debug, Clone)]
pub struct View {
    pub path: String,
    pub extension: String,
    /// Keep per-render data as view vars for later renders.
    pub preserve_vars: bool,
    vars: Map<String, Value>,
}

impl Default for View {
    fn default() -> Self {
        Self::new(".")
    }
}

impl View {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: ".html".to_string(),
            preserve_vars: true,
            vars: Map::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.vars.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn clear(&mut self, key: Option<&str>) -> &mut Self {
        match key {
            Some(key) => {
                self.vars.remove(key);
            }
            None => self.vars.clear(),
        }
        self
    }

    /// Resolves `file` against the view path, appending the extension when
    /// it is missing. Absolute paths are used as given.
    pub fn template_path(&self, file: &str) -> PathBuf {
        let mut file = file.to_string();
        if !self.extension.is_empty() && !file.ends_with(&self.extension) {
            file.push_str(&self.extension);
        }
        let candidate = Path::new(&file);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            Path::new(&self.path).join(candidate)
        }
    }

    pub fn exists(&self, file: &str) -> bool {
        self.template_path(file).is_file()
    }

    /// Renders a template to a string.
    pub fn fetch(&mut self, file: &str, data: Option<&Map<String, Value>>) -> NavResult<String> {
        let template = self.template_path(file);
        let source = fs::read_to_string(&template).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                NavError::TemplateNotFound(template.display().to_string())
            }
            _ => NavError::Io(e),
        })?;

        let mut scope = self.vars.clone();
        if let Some(data) = data {
            for (k, v) in data {
                scope.insert(k.clone(), v.clone());
            }
            if self.preserve_vars {
                self.vars.extend(data.clone());
            }
        }

        let rendered = PLACEHOLDER.replace_all(&source, |caps: &Captures| {
            let raw = caps.get(1).is_some();
            let value = lookup(&scope, &caps[2]);
            if raw {
                value
            } else {
                escape(&value)
            }
        });
        Ok(rendered.into_owned())
    }

    /// Renders a template into the current output.
    pub fn render(
        &mut self,
        file: &str,
        data: Option<&Map<String, Value>>,
        out: &mut OutputBuffer,
    ) -> NavResult<()> {
        let rendered = self.fetch(file, data)?;
        out.echo(&rendered);
        Ok(())
    }
}

/// Dotted lookup (`user.name`) into the render scope.
fn lookup(scope: &Map<String, Value>, key: &str) -> String {
    let mut parts = key.split('.');
    let Some(first) = parts.next() else {
        return String::new();
    };
    let mut current = scope.get(first);
    for part in parts {
        current = current.and_then(|v| v.get(part));
    }
    match current {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// HTML-escapes `text`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}
