use log::warn;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::core::callback::{Callback, Middleware};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").unwrap());

static PATTERN_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)|/\*").unwrap());

/// A single pattern to handler mapping.
///
/// Placeholder names are declared once from the pattern; every successful
/// regex match overwrites their values.
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: String,
    pub callback: Callback,
    pub methods: Vec<String>,
    params: Vec<(String, Option<String>)>,
    /// Never populated; wildcard captures are not exposed by name.
    pub splat: String,
    pub pass_route: bool,
    pub alias: String,
    pub middleware: Vec<Middleware>,
    pub is_streamed: bool,
    pub streamed_headers: Vec<(String, String)>,
    matcher: OnceCell<Option<Regex>>,
    matcher_case_sensitive: OnceCell<Option<Regex>>,
}

impl Route {
    pub fn new(
        pattern: impl Into<String>,
        callback: Callback,
        methods: Vec<String>,
        pass_route: bool,
        alias: impl Into<String>,
    ) -> Self {
        let pattern = pattern.into();
        let mut params: Vec<(String, Option<String>)> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(&pattern) {
            let name = caps[1].to_string();
            if !params.iter().any(|(n, _)| *n == name) {
                params.push((name, None));
            }
        }

        Self {
            pattern,
            callback,
            methods,
            params,
            splat: String::new(),
            pass_route,
            alias: alias.into(),
            middleware: Vec::new(),
            is_streamed: false,
            streamed_headers: Vec::new(),
            matcher: OnceCell::new(),
            matcher_case_sensitive: OnceCell::new(),
        }
    }

    /// Tests `url` against the pattern, filling in the declared params on a
    /// regex match. Never fails; an uncompilable pattern simply never matches.
    pub fn match_url(&mut self, url: &str, case_sensitive: bool) -> bool {
        if self.pattern == "*" || self.pattern == url {
            for (_, value) in &mut self.params {
                *value = None;
            }
            return true;
        }

        let cell = if case_sensitive {
            &self.matcher_case_sensitive
        } else {
            &self.matcher
        };
        let Some(regex) = cell.get_or_init(|| self.compile(case_sensitive)) else {
            return false;
        };
        let Some(caps) = regex.captures(url) else {
            return false;
        };

        for (name, value) in &mut self.params {
            *value = caps.name(name).map(|m| m.as_str().to_string());
        }
        true
    }

    pub fn match_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method || m == "*")
    }

    pub fn match_alias(&self, alias: &str) -> bool {
        self.alias == alias
    }

    /// Substitutes every `@name` with the matching entry of `params`.
    /// Absent, null and `false` entries become empty strings. Values are not
    /// URL-encoded.
    pub fn hydrate_url(&self, params: &Map<String, Value>) -> String {
        let url = PLACEHOLDER.replace_all(&self.pattern, |caps: &regex::Captures| {
            match params.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(true)) => "1".to_string(),
                _ => String::new(),
            }
        });
        url.trim_end_matches('/').to_string()
    }

    /// Source of the compiled matcher, if the pattern compiled.
    pub fn regex_source(&self, case_sensitive: bool) -> Option<String> {
        let cell = if case_sensitive {
            &self.matcher_case_sensitive
        } else {
            &self.matcher
        };
        cell.get_or_init(|| self.compile(case_sensitive))
            .as_ref()
            .map(|r| r.as_str().to_string())
    }

    fn compile(&self, case_sensitive: bool) -> Option<Regex> {
        let trimmed = self.pattern.trim_end_matches('/');
        let mut source = String::from(if case_sensitive { "^" } else { "(?i)^" });
        let mut last = 0;
        for caps in PATTERN_TOKEN.captures_iter(trimmed) {
            let Some(token) = caps.get(0) else { continue };
            source.push_str(&regex::escape(&trimmed[last..token.start()]));
            // Placeholders stop at `?` so a trailing query never leaks into a param
            match caps.get(1) {
                Some(name) => source.push_str(&format!("(?P<{}>[^/?]+)", name.as_str())),
                None => source.push_str("/([^?]*)"),
            }
            last = token.end();
        }
        source.push_str(&regex::escape(&trimmed[last..]));
        source.push_str(r"/?(?:\?.*)?$");

        match Regex::new(&source) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("route pattern '{}' does not compile: {e}", self.pattern);
                None
            }
        }
    }

    pub fn params(&self) -> &[(String, Option<String>)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Param values in declaration order, unmatched ones as null.
    pub fn param_values(&self) -> Vec<Value> {
        self.params
            .iter()
            .map(|(_, v)| v.clone().map_or(Value::Null, Value::String))
            .collect()
    }

    pub fn params_map(&self) -> Map<String, Value> {
        self.params
            .iter()
            .map(|(n, v)| (n.clone(), v.clone().map_or(Value::Null, Value::String)))
            .collect()
    }

    pub fn set_alias(&mut self, alias: impl Into<String>) -> &mut Self {
        self.alias = alias.into();
        self
    }

    pub fn add_middleware(&mut self, middleware: impl Into<Middleware>) -> &mut Self {
        self.middleware.push(middleware.into());
        self
    }

    pub fn add_middlewares<I>(&mut self, middleware: I) -> &mut Self
    where
        I: IntoIterator<Item = Middleware>,
    {
        self.middleware.extend(middleware);
        self
    }

    pub fn stream(&mut self) -> &mut Self {
        self.is_streamed = true;
        self
    }

    /// Streams the response with headers sent up front. A `status` entry
    /// selects the status code instead of becoming a header.
    pub fn stream_with_headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.is_streamed = true;
        self.streamed_headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Snapshot handed to handlers of pass-route mappings.
    pub fn to_value(&self) -> Value {
        json!({
            "pattern": self.pattern,
            "methods": self.methods,
            "params": self.params_map(),
            "splat": self.splat,
            "pass": self.pass_route,
            "alias": self.alias,
            "callback": self.callback.describe(),
            "middleware": self.middleware.len(),
            "is_streamed": self.is_streamed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(pattern: &str) -> Route {
        Route::new(pattern, Callback::from("handler"), vec!["GET".into()], false, "")
    }

    #[test]
    fn test_exact_and_wildcard_fast_path() {
        assert!(route("*").match_url("/anything/at/all", false));
        assert!(route("/about").match_url("/about", true));
        assert!(!route("/about").match_url("/contact", false));
    }

    #[test]
    fn test_named_params() {
        let mut r = route("/user/@id");
        assert!(r.match_url("/user/42", false));
        assert_eq!(r.param("id"), Some("42"));
        assert!(r.match_url("/user/7/", false));
        assert_eq!(r.param("id"), Some("7"));
        assert_eq!(r.params().len(), 1);
        assert!(!r.match_url("/user/7/extra", false));
    }

    #[test]
    fn test_splat_covers_rest_of_path() {
        let mut r = route("/search/*");
        assert!(r.match_url("/search/a/b/c", false));
        assert!(r.splat.is_empty());
        assert!(!r.match_url("/other/a", false));
    }

    #[test]
    fn test_query_string_and_case() {
        let mut r = route("/Page/@slug");
        assert!(r.match_url("/page/intro?ref=home", false));
        assert_eq!(r.param("slug"), Some("intro"));
        assert!(r.match_url("/page/intro?", false));
        assert_eq!(r.param("slug"), Some("intro"));
        assert!(!r.match_url("/page/intro", true));
        assert!(r.match_url("/Page/intro", true));
    }

    #[test]
    fn test_literal_text_is_escaped() {
        let mut r = route("/files/report.pdf");
        assert!(r.match_url("/files/report.pdf/", false));
        assert!(!r.match_url("/files/reportxpdf", false));
    }

    #[test]
    fn test_bad_pattern_never_matches() {
        let mut r = route("/@id/@id");
        assert!(!r.match_url("/1/2", false));
        assert!(r.regex_source(false).is_none());
    }

    #[test]
    fn test_hydrate_round_trip() {
        let mut r = route("/blog/@year/@slug/");
        assert!(r.match_url("/blog/2024/hello-world", false));
        let url = r.hydrate_url(&r.params_map());
        assert_eq!(url, "/blog/2024/hello-world");

        let before = r.params().to_vec();
        assert!(r.match_url(&url, false));
        assert_eq!(r.params(), before.as_slice());
    }

    #[test]
    fn test_hydrate_missing_and_numeric() {
        let r = route("/user/@id/@tab");
        let mut params = Map::new();
        params.insert("id".into(), json!(7));
        assert_eq!(r.hydrate_url(&params), "/user/7");
    }

    #[test]
    fn test_match_method() {
        let r = route("/x");
        assert!(r.match_method("GET"));
        assert!(!r.match_method("POST"));
        let any = Route::new("/x", Callback::from("h"), vec!["*".into()], false, "");
        assert!(any.match_method("DELETE"));
    }

    #[test]
    fn test_stream_with_headers() {
        let mut r = route("/events");
        r.stream_with_headers([("status", "201"), ("Content-Type", "text/event-stream")])
            .set_alias("events");
        assert!(r.is_streamed);
        assert_eq!(r.streamed_headers.len(), 2);
        assert!(r.match_alias("events"));
        assert_eq!(r.to_value()["alias"], "events");
    }
}
