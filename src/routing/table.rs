use log::debug;
use serde_json::{Map, Value};

use super::route::Route;
use crate::{
    core::{
        callback::{Callback, Middleware},
        error::{NavError, NavResult},
    },
    net::Request,
};

/// REST actions registered by [`RouteTable::map_resource`], in table order.
const RESOURCE_ACTIONS: [(&str, &str, &str); 7] = [
    ("index", "GET", ""),
    ("create", "GET", "/create"),
    ("store", "POST", ""),
    ("show", "GET", "/@id"),
    ("edit", "GET", "/@id/edit"),
    ("update", "PUT|PATCH", "/@id"),
    ("destroy", "DELETE", "/@id"),
];

/// Options for resource route registration.
#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub only: Vec<String>,
    pub except: Vec<String>,
    pub alias_base: Option<String>,
    pub middleware: Vec<Middleware>,
}

impl ResourceOptions {
    /// Reads `only`, `except`, `alias_base` and `middleware` (class names)
    /// from a JSON object. Unknown keys are ignored.
    pub fn from_value(value: &Value) -> Self {
        let strings = |key: &str| -> Vec<String> {
            match value.get(key) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                Some(Value::String(s)) => vec![s.clone()],
                _ => Vec::new(),
            }
        };

        Self {
            only: strings("only"),
            except: strings("except"),
            alias_base: value
                .get("alias_base")
                .and_then(Value::as_str)
                .map(str::to_string),
            middleware: strings("middleware")
                .into_iter()
                .map(Middleware::Class)
                .collect(),
        }
    }

    fn allows(&self, action: &str) -> bool {
        (self.only.is_empty() || self.only.iter().any(|a| a == action))
            && !self.except.iter().any(|a| a == action)
    }
}

/// Ordered route registry with a matching cursor.
#[derive(Debug, Default)]
pub struct RouteTable {
    pub case_sensitive: bool,
    routes: Vec<Route>,
    index: usize,
    executed: Option<usize>,
    last_url_match: Option<usize>,
    group_prefix: String,
    group_middleware: Vec<Middleware>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn clear(&mut self) {
        self.routes.clear();
        self.reset_cursor();
    }

    /// Registers a route. `pattern` may carry a `"VERB|VERB /path"` prefix;
    /// without one the route answers any verb. GET routes also answer HEAD.
    pub fn map(
        &mut self,
        pattern: &str,
        callback: impl Into<Callback>,
        pass_route: bool,
        alias: &str,
    ) -> &mut Route {
        let pattern = pattern.trim();
        let (mut methods, path) = match pattern.split_once(' ') {
            Some((verbs, path)) => (
                verbs.split('|').map(str::to_string).collect::<Vec<_>>(),
                path.trim(),
            ),
            None => (vec!["*".to_string()], pattern),
        };
        if methods.iter().any(|m| m == "GET") && !methods.iter().any(|m| m == "HEAD") {
            methods.push("HEAD".to_string());
        }

        let url = if self.group_prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}{}", self.group_prefix, path).trim_end().to_string()
        };

        debug!("mapping {methods:?} {url}");
        let mut route = Route::new(url, callback.into(), methods, pass_route, alias);
        route.add_middlewares(self.group_middleware.iter().cloned());
        self.routes.push(route);

        let last = self.routes.len() - 1;
        &mut self.routes[last]
    }

    pub fn get(&mut self, pattern: &str, callback: impl Into<Callback>) -> &mut Route {
        self.map(&format!("GET {pattern}"), callback, false, "")
    }

    pub fn post(&mut self, pattern: &str, callback: impl Into<Callback>) -> &mut Route {
        self.map(&format!("POST {pattern}"), callback, false, "")
    }

    pub fn put(&mut self, pattern: &str, callback: impl Into<Callback>) -> &mut Route {
        self.map(&format!("PUT {pattern}"), callback, false, "")
    }

    pub fn patch(&mut self, pattern: &str, callback: impl Into<Callback>) -> &mut Route {
        self.map(&format!("PATCH {pattern}"), callback, false, "")
    }

    pub fn delete(&mut self, pattern: &str, callback: impl Into<Callback>) -> &mut Route {
        self.map(&format!("DELETE {pattern}"), callback, false, "")
    }

    /// Runs `builder` with `prefix` and `middleware` applied to every route
    /// it maps, then restores the enclosing group context.
    pub fn group<F>(&mut self, prefix: &str, middleware: Vec<Middleware>, builder: F)
    where
        F: FnOnce(&mut RouteTable),
    {
        let saved_prefix = self.group_prefix.clone();
        let saved_middleware = self.group_middleware.clone();

        self.group_prefix.push_str(prefix);
        self.group_middleware.extend(middleware);

        builder(self);

        self.group_prefix = saved_prefix;
        self.group_middleware = saved_middleware;
    }

    /// Registers the REST routes of `controller` under `pattern`.
    pub fn map_resource(&mut self, pattern: &str, controller: &str, options: ResourceOptions) {
        let base = pattern.trim().trim_end_matches('/');
        let alias_base = options
            .alias_base
            .clone()
            .unwrap_or_else(|| base.trim_matches('/').replace('/', "."));

        for (action, verbs, suffix) in RESOURCE_ACTIONS {
            if !options.allows(action) {
                continue;
            }
            let route = self.map(
                &format!("{verbs} {base}{suffix}"),
                Callback::method(controller, action),
                false,
                &format!("{alias_base}.{action}"),
            );
            route.add_middlewares(options.middleware.iter().cloned());
        }
    }

    /// Scans forward from the cursor for a route matching both URL and verb.
    /// Until a route has executed, routes whose URL matched are remembered
    /// even when the verb did not.
    pub fn route(&mut self, request: &Request) -> Option<Route> {
        while let Some(route) = self.routes.get_mut(self.index) {
            if route.match_url(&request.url, self.case_sensitive) {
                if route.match_method(&request.method) {
                    self.executed = Some(self.index);
                    self.last_url_match = None;
                    return Some(route.clone());
                }
                if self.executed.is_none() {
                    self.last_url_match = Some(self.index);
                }
            }
            self.index += 1;
        }
        None
    }

    pub fn next(&mut self) {
        self.index += 1;
    }

    pub fn rewind(&mut self) {
        self.index = 0;
    }

    pub fn current(&self) -> Option<&Route> {
        self.routes.get(self.index)
    }

    /// Rewinds and forgets the matches of the previous request.
    pub fn reset_cursor(&mut self) {
        self.index = 0;
        self.executed = None;
        self.last_url_match = None;
    }

    pub fn executed_route(&self) -> Option<&Route> {
        self.executed.and_then(|i| self.routes.get(i))
    }

    pub fn last_url_match(&self) -> Option<&Route> {
        self.last_url_match.and_then(|i| self.routes.get(i))
    }

    /// True when nothing executed and the last URL match of this scan does
    /// not accept the request verb, which makes the miss a 405 rather than
    /// a 404.
    pub fn rejects_method(&mut self, request: &Request) -> bool {
        if self.executed.is_some() {
            return false;
        }
        let Some(index) = self.last_url_match else {
            return false;
        };
        let case_sensitive = self.case_sensitive;
        self.routes.get_mut(index).is_some_and(|route| {
            route.match_url(&request.url, case_sensitive) && !route.match_method(&request.method)
        })
    }

    /// Builds the URL of the first route carrying `alias`.
    pub fn get_url_by_alias(&self, alias: &str, params: &Map<String, Value>) -> NavResult<String> {
        self.routes
            .iter()
            .find(|r| r.match_alias(alias))
            .map(|r| r.hydrate_url(params))
            .ok_or_else(|| NavError::RouteNotFound(alias.to_string()))
    }
}
