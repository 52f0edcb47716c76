use std::net::IpAddr;

use http::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method,
};
use log::{debug, warn};
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};

use super::upload::UploadedFile;

const METHOD_OVERRIDE: &str = "x-http-method-override";

const FORWARDED_HEADERS: [&str; 6] = [
    "client-ip",
    "x-forwarded-for",
    "x-forwarded",
    "x-cluster-client-ip",
    "forwarded-for",
    "forwarded",
];

/// An incoming request as seen by the router.
///
/// Derived fields (url, method, query, data, scheme...) are recomputed
/// whenever one of the `with_*` builders changes the raw input.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub base: String,
    pub method: String,
    pub referrer: String,
    pub ip: String,
    pub ajax: bool,
    pub scheme: String,
    pub user_agent: String,
    pub content_type: String,
    pub length: u64,
    pub query: Map<String, Value>,
    pub data: Map<String, Value>,
    pub cookies: Map<String, Value>,
    pub files: Vec<(String, UploadedFile)>,
    pub secure: bool,
    pub accept: String,
    pub proxy_ip: String,
    pub host: String,
    pub headers: HeaderMap,
    pub body: String,
    request_uri: String,
    request_method: String,
}

impl Default for Request {
    fn default() -> Self {
        Self::new("GET", "/")
    }
}

impl Request {
    pub fn new(method: &str, uri: &str) -> Self {
        let mut request = Self {
            url: String::new(),
            base: "/".to_string(),
            method: String::new(),
            referrer: String::new(),
            ip: String::new(),
            ajax: false,
            scheme: "http".to_string(),
            user_agent: String::new(),
            content_type: String::new(),
            length: 0,
            query: Map::new(),
            data: Map::new(),
            cookies: Map::new(),
            files: Vec::new(),
            secure: false,
            accept: String::new(),
            proxy_ip: String::new(),
            host: String::new(),
            headers: HeaderMap::new(),
            body: String::new(),
            request_uri: uri.to_string(),
            request_method: method.to_string(),
        };
        request.refresh();
        request
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
                self.refresh();
            }
            _ => warn!("ignoring invalid request header '{name}'"),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.refresh();
        self
    }

    /// Sets the mount point; it is stripped from the front of the URL.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self.refresh();
        self
    }

    pub fn with_remote_addr(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self.refresh();
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies
            .insert(name.to_string(), Value::String(value.to_string()));
        self
    }

    pub fn with_file(mut self, field: &str, file: UploadedFile) -> Self {
        self.files.push((field.to_string(), file));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|(f, _)| f == field).map(|(_, file)| file)
    }

    fn header_string(&self, name: impl header::AsHeaderName) -> String {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    fn refresh(&mut self) {
        self.referrer = self.header_string(header::REFERER);
        self.user_agent = self.header_string(header::USER_AGENT);
        self.content_type = self.header_string(header::CONTENT_TYPE);
        self.accept = self.header_string(header::ACCEPT);
        self.host = self.header_string(header::HOST);
        self.length = self
            .header_string(header::CONTENT_LENGTH)
            .parse()
            .unwrap_or(self.body.len() as u64);
        self.ajax = self.header("x-requested-with") == Some("XMLHttpRequest");
        self.scheme = self.detect_scheme().to_string();
        self.secure = self.scheme == "https";
        self.proxy_ip = self.detect_proxy_ip();

        let mut url = self.request_uri.clone();
        if self.base != "/" && url.starts_with(&self.base) {
            url = url[self.base.len()..].to_string();
        }
        self.url = if url.is_empty() { "/".to_string() } else { url };
        self.query = Self::parse_query(&self.url);

        if self.content_type.starts_with("application/json") && !self.body.is_empty() {
            match serde_json::from_str::<Value>(&self.body) {
                Ok(Value::Object(data)) => self.data = data,
                Ok(_) => {}
                Err(e) => debug!("request body is not valid JSON: {e}"),
            }
        }

        self.method = self.detect_method();
    }

    fn detect_method(&self) -> String {
        let method = self
            .header(METHOD_OVERRIDE)
            .map(str::to_string)
            .or_else(|| {
                self.query
                    .get("_method")
                    .or_else(|| self.data.get("_method"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.request_method.clone())
            .to_uppercase();

        match Method::from_bytes(method.as_bytes()) {
            Ok(m) => m.as_str().to_string(),
            Err(_) => {
                warn!("invalid request method '{method}', using GET");
                Method::GET.as_str().to_string()
            }
        }
    }

    fn detect_scheme(&self) -> &'static str {
        let forwarded_https = self.header("x-forwarded-proto") == Some("https");
        let front_end_https = self
            .header("front-end-https")
            .is_some_and(|v| v.eq_ignore_ascii_case("on"));
        if forwarded_https || front_end_https {
            "https"
        } else {
            "http"
        }
    }

    /// First public address found in the forwarding headers, else the peer.
    fn detect_proxy_ip(&self) -> String {
        for name in FORWARDED_HEADERS {
            let Some(value) = self.header(name) else {
                continue;
            };
            for candidate in value.split(',') {
                let candidate = candidate.trim();
                if let Ok(ip) = candidate.parse::<IpAddr>() {
                    if is_public(&ip) {
                        return candidate.to_string();
                    }
                }
            }
        }
        self.ip.clone()
    }

    /// Parses the query string of `url` into a map. Repeated keys keep the
    /// last value.
    pub fn parse_query(url: &str) -> Map<String, Value> {
        let mut params = Map::new();
        let Some((_, query)) = url.split_once('?') else {
            return params;
        };
        let query = query.split('#').next().unwrap_or_default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(decode_component(key), Value::String(decode_component(value)));
        }
        params
    }
}

fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}

/// Decodes one `application/x-www-form-urlencoded` component. Invalid
/// escapes are kept as written.
fn decode_component(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}
