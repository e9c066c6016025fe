//! Placeholder contexts.
//!
//! # HTTP request scope ([`HttpVars`])
//! - `path.asSubject` → `/foo/bar/` becomes `foo.bar`
//! - `path.asSubject.<selector>` → selected path segments joined with `.`
//! - `method`, `path`, `query`, `host`
//! - `header.<Name>` → first value, empty if absent
//!
//! # Inbound message scope ([`MessageVars`])
//! - `subject`, `subject.<selector>` (joined with `.`)
//! - `subject.asPath`, `subject.asPath.<selector>` (joined with `/`)
//! - `header.<Name>` → first value, empty if absent

use axum::http::{request::Parts, HeaderMap, Method, Request, Uri};
use percent_encoding::percent_decode_str;

use crate::template::selector::select;
use crate::template::Placeholders;
use crate::transport::BridgeMessage;

/// Token delimiter of the subject hierarchy.
pub const SUBJECT_DELIMITER: char = '.';

const PATH_AS_SUBJECT: &str = "path.asSubject";
const SUBJECT: &str = "subject";
const SUBJECT_AS_PATH: &str = "subject.asPath";
const HEADER_PREFIX: &str = "header.";

/// Convert a URL path to a subject: trim `/`, then swap separators.
pub fn path_to_subject(path: &str) -> String {
    path.trim_matches('/').replace('/', ".")
}

/// The request path with percent-escapes decoded (`/foo%20bar` → `/foo bar`).
pub fn decoded_path(uri: &Uri) -> String {
    percent_decode_str(uri.path()).decode_utf8_lossy().into_owned()
}

/// Convert a subject to a slash-joined path (no leading slash).
pub fn subject_to_path(subject: &str) -> String {
    subject.replace(SUBJECT_DELIMITER, "/")
}

fn select_joined(segments: &[&str], expr: &str, joiner: &str) -> Option<String> {
    select(segments, expr).map(|s| s.join(joiner))
}

/// Placeholders backed by an HTTP request.
#[derive(Debug, Clone, Copy)]
pub struct HttpVars<'a> {
    method: &'a Method,
    uri: &'a Uri,
    headers: &'a HeaderMap,
}

impl<'a> HttpVars<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }

    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        Self::new(req.method(), req.uri(), req.headers())
    }

    pub fn from_parts(parts: &'a Parts) -> Self {
        Self::new(&parts.method, &parts.uri, &parts.headers)
    }

    fn host(&self) -> String {
        self.uri
            .host()
            .map(str::to_string)
            .or_else(|| {
                self.headers
                    .get(axum::http::header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_default()
    }
}

impl Placeholders for HttpVars<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            PATH_AS_SUBJECT => return Some(path_to_subject(&decoded_path(self.uri))),
            "method" => return Some(self.method.as_str().to_string()),
            "path" => return Some(decoded_path(self.uri)),
            "query" => return Some(self.uri.query().unwrap_or_default().to_string()),
            "host" => return Some(self.host()),
            _ => {}
        }

        if let Some(expr) = key
            .strip_prefix(PATH_AS_SUBJECT)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            let path = decoded_path(self.uri);
            let trimmed = path.trim_matches('/');
            let segments: Vec<&str> = trimmed.split('/').collect();
            return select_joined(&segments, expr, ".");
        }

        if let Some(name) = key.strip_prefix(HEADER_PREFIX) {
            let value = self
                .headers
                .get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_default();
            return Some(value);
        }

        None
    }
}

/// Placeholders backed by an inbound broker message.
#[derive(Debug, Clone, Copy)]
pub struct MessageVars<'a> {
    msg: &'a BridgeMessage,
}

impl<'a> MessageVars<'a> {
    pub fn new(msg: &'a BridgeMessage) -> Self {
        Self { msg }
    }

    fn tokens(&self) -> Vec<&'a str> {
        self.msg.subject.split(SUBJECT_DELIMITER).collect()
    }
}

impl Placeholders for MessageVars<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            SUBJECT => return Some(self.msg.subject.clone()),
            SUBJECT_AS_PATH => return Some(subject_to_path(&self.msg.subject)),
            _ => {}
        }

        if let Some(expr) = key
            .strip_prefix(SUBJECT_AS_PATH)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            return select_joined(&self.tokens(), expr, "/");
        }

        if let Some(expr) = key
            .strip_prefix(SUBJECT)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            return select_joined(&self.tokens(), expr, ".");
        }

        if let Some(name) = key.strip_prefix(HEADER_PREFIX) {
            return Some(self.msg.headers.get(name).unwrap_or_default().to_string());
        }

        None
    }
}
