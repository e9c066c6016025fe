//! Messages exchanged with the broker.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Message headers: case-sensitive names, each with an ordered list of values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    inner: BTreeMap<String, Vec<String>>,
}

impl MessageHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any values already present under `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.entry(name.into()).or_default().push(value.into());
    }

    /// First value stored under exactly `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values stored under exactly `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.inner.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for MessageHeaders
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

/// A message travelling over the broker in either direction.
///
/// Built fresh for every HTTP request or delivery and never mutated once
/// handed to a [`Connection`](super::Connection).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeMessage {
    pub subject: String,
    pub headers: MessageHeaders,
    pub payload: Bytes,
    /// Reply address for request-reply; `None` for fire-and-forget.
    pub reply: Option<String>,
}

impl BridgeMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: MessageHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}
