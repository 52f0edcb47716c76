//! Engine variable store
//!
//! String-keyed configuration and runtime values shared by the engine and
//! its services.

use std::collections::HashMap;

use serde_json::Value;

/// Framework settings keys.
pub mod keys {
    pub const BASE_URL: &str = "navigator.base_url";
    pub const CASE_SENSITIVE: &str = "navigator.case_sensitive";
    pub const HANDLE_ERRORS: &str = "navigator.handle_errors";
    pub const LOG_ERRORS: &str = "navigator.log_errors";
    pub const VIEWS_PATH: &str = "navigator.views.path";
    pub const VIEWS_EXTENSION: &str = "navigator.views.extension";
    pub const CONTENT_LENGTH: &str = "navigator.content_length";
    pub const OUTPUT_BUFFERING: &str = "navigator.v2.output_buffering";
    pub const TEST_MODE: &str = "navigator.test_mode";
}

/// Environment variable that switches on test mode.
pub const TEST_MODE_ENV: &str = "NAVIGATOR_TEST";

#[derive(Debug, Default, Clone)]
pub struct Vars {
    values: HashMap<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn extend<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (k, v) in entries {
            self.set(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Truthiness of the stored value; missing keys are false.
    pub fn get_flag(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(truthy)
    }

    /// A key counts as set only when it holds a non-null value.
    pub fn has(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn all(&self) -> &HashMap<String, Value> {
        &self.values
    }
}

/// Loose truthiness used for handler results and flags.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
