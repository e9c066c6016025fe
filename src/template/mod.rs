//! Templating engine for subjects, paths and methods.
//!
//! # Data Flow
//! ```text
//! "events.{path.asSubject.1:}"      (configuration)
//!     → Template::parse (once, at provisioning)
//!     → [Literal("events."), Placeholder("path.asSubject.1:")]
//!
//! Per request / message:
//!     Template::render(&vars)
//!     → vars.lookup("path.asSubject.1:")   (HttpVars or MessageVars)
//!     → "events.bar.baz"
//! ```
//!
//! # Design Decisions
//! - Templates are parsed once; rendering is a pure function of the context
//! - A placeholder that cannot be resolved renders as the empty string
//! - Unclosed braces are a provisioning error, never a runtime one

pub mod selector;
pub mod vars;

use std::fmt;

use thiserror::Error;

pub use vars::{HttpVars, MessageVars};

/// Errors raised while parsing a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed placeholder starting at byte {0} in {1:?}")]
    Unclosed(usize, String),

    #[error("empty placeholder at byte {0} in {1:?}")]
    Empty(usize, String),
}

/// A context placeholders are resolved against.
pub trait Placeholders {
    /// Resolve `key` (the text between the braces).
    ///
    /// `None` means the key is unknown or its selector is out of range.
    fn lookup(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template such as `"prefix.{path.asSubject}"`.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| TemplateError::Unclosed(offset + open, source.to_string()))?;
            let key = &after[..close];
            if key.is_empty() {
                return Err(TemplateError::Empty(offset + open, source.to_string()));
            }
            segments.push(Segment::Placeholder(key.to_string()));

            let consumed = open + 1 + close + 1;
            rest = &rest[consumed..];
            offset += consumed;
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Render against `vars`, substituting unresolved placeholders with "".
    pub fn render(&self, vars: &dyn Placeholders) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    if let Some(value) = vars.lookup(key) {
                        out.push_str(&value);
                    }
                }
            }
        }
        out
    }

    /// The original template text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if the template contains no placeholders.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
