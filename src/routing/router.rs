//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes in configuration order
//! - Look up the first route whose matchers accept a request
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan; route tables are small
//! - Explicit `None` rather than a silent default route

use axum::body::Body;
use axum::http::Request;

use crate::config::RouteConfig;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, MethodMatcher, PathPrefixMatcher};

/// A compiled route carrying its handler.
#[derive(Debug)]
pub struct Route<H> {
    pub name: String,
    matcher: AndMatcher,
    pub handler: H,
}

impl<H> Route<H> {
    pub fn new(name: impl Into<String>, matcher: AndMatcher, handler: H) -> Self {
        Self {
            name: name.into(),
            matcher,
            handler,
        }
    }

    /// Compile the matchers of `config` around `handler`.
    pub fn from_config(config: &RouteConfig, handler: H) -> Self {
        Self::new(config.name.clone(), compile_matcher(config), handler)
    }

    pub fn matches(&self, req: &Request<Body>) -> bool {
        self.matcher.matches(req)
    }
}

/// Build the AND of every condition present in `config`.
pub fn compile_matcher(config: &RouteConfig) -> AndMatcher {
    let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
    if let Some(host) = &config.host {
        matchers.push(Box::new(HostMatcher::new(host.clone())));
    }
    if let Some(prefix) = &config.path_prefix {
        matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
    }
    if let Some(methods) = &config.methods {
        matchers.push(Box::new(MethodMatcher::new(methods.as_slice())));
    }
    AndMatcher::new(matchers)
}

/// Ordered route table.
#[derive(Debug)]
pub struct Router<H> {
    routes: Vec<Route<H>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<H> Router<H> {
    pub fn new(routes: Vec<Route<H>>) -> Self {
        Self { routes }
    }

    /// First route that accepts `req`.
    pub fn match_request(&self, req: &Request<Body>) -> Option<&Route<H>> {
        self.routes.iter().find(|r| r.matches(req))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
