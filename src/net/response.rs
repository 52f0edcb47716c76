use std::{fmt, fs, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use log::debug;

use super::status;
use crate::{
    config_error,
    core::{
        error::{NavError, NavResult},
        output::OutputBuffer,
    },
};

/// RFC 7231 date layout used by `Expires` and `Last-Modified`.
pub const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub type BodyCallback = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Caching directive for [`Response::cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Forbid any caching.
    Disabled,
    At(DateTime<Utc>),
}

impl From<DateTime<Utc>> for Expiry {
    fn from(at: DateTime<Utc>) -> Self {
        Expiry::At(at)
    }
}

/// Outgoing response. Headers keep insertion order; setting a header with
/// the same name replaces it.
#[derive(Clone)]
pub struct Response {
    pub content_length: bool,
    pub v2_output_buffering: bool,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    sent: bool,
    headers_sent: bool,
    body_callbacks: Vec<BodyCallback>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            content_length: true,
            v2_output_buffering: false,
            status: 200,
            headers: Vec::new(),
            body: String::new(),
            sent: false,
            headers_sent: false,
            body_callbacks: Vec::new(),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("sent", &self.sent)
            .finish()
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, code: u16) -> NavResult<&mut Self> {
        if !status::is_valid(code) {
            return Err(config_error!("Invalid status code {}.", code));
        }
        self.status = code;
        Ok(self)
    }

    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.headers.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
        self
    }

    pub fn set_headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.header(name.as_ref(), value);
        }
        self
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn write(&mut self, data: &str) -> &mut Self {
        self.body.push_str(data);
        self
    }

    /// Replaces the body.
    pub fn overwrite(&mut self, data: &str) -> &mut Self {
        self.body.clear();
        self.write(data)
    }

    pub fn clear_body(&mut self) -> &mut Self {
        self.body.clear();
        self
    }

    /// Resets status, headers and body.
    pub fn clear(&mut self) -> &mut Self {
        self.status = 200;
        self.headers.clear();
        self.clear_body()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn body_length(&self) -> usize {
        self.body.len()
    }

    pub fn cache(&mut self, expiry: Expiry) -> &mut Self {
        match expiry {
            Expiry::Disabled => {
                self.header("Expires", "Mon, 26 Jul 1997 05:00:00 GMT");
                self.header(
                    "Cache-Control",
                    "no-store, no-cache, must-revalidate, max-age=0",
                );
                self.header("Pragma", "no-cache");
            }
            Expiry::At(at) => {
                let max_age = (at - Utc::now()).num_seconds();
                self.header("Expires", at.format(HTTP_DATE).to_string());
                self.header("Cache-Control", format!("max-age={max_age}"));
            }
        }
        self
    }

    pub fn add_body_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.body_callbacks.push(Arc::new(callback));
        self
    }

    pub fn status_line(&self) -> String {
        format!(
            "HTTP/1.1 {} {}",
            self.status,
            status::reason_phrase(self.status).unwrap_or_default()
        )
    }

    /// Freezes the header set. Adds `Content-Length` unless disabled or
    /// already present.
    pub fn send_headers(&mut self) -> &mut Self {
        if self.content_length
            && !self.body.is_empty()
            && self.get_header("Content-Length").is_none()
        {
            let len = self.body_length();
            self.header("Content-Length", len.to_string());
        }
        debug!("{} ({} headers)", self.status_line(), self.headers.len());
        self.headers_sent = true;
        self
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn mark_as_sent(&mut self) -> &mut Self {
        self.sent = true;
        self
    }

    pub fn sent(&self) -> bool {
        self.sent
    }

    /// Runs the body callbacks, sends headers once, and writes the body to
    /// the wire regardless of any open capture.
    pub fn send(&mut self, out: &mut OutputBuffer) {
        for callback in &self.body_callbacks {
            let body = std::mem::take(&mut self.body);
            self.body = callback(body);
        }
        if !self.headers_sent {
            self.send_headers();
        }
        out.emit(self.body.as_bytes());
        self.sent = true;
    }

    /// Sends the response followed by the file contents as an attachment.
    pub fn download_file(&mut self, path: impl AsRef<Path>, out: &mut OutputBuffer) -> NavResult<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(NavError::FileNotFound(path.display().to_string()));
        }
        let contents = fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.content_length = false;
        self.header(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        );
        self.header("Content-Length", contents.len().to_string());
        self.send(out);
        out.emit(&contents);
        Ok(())
    }
}
