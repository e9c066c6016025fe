//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Parse every template and listen address once, so bad ones fail at load
//! - Validate value ranges (timeouts > 0, TTLs > 0, status codes)
//! - Detect duplicate broker aliases and conflicting credentials
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Handler aliases are not checked against the broker list; an unknown
//!   alias fails when the handler first runs

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{BridgeConfig, HandlerConfig, TransportKind};
use crate::net::ListenAddress;
use crate::template::Template;

/// One semantic problem, located by a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_template(errors: &mut Vec<ValidationError>, field: String, source: &str) {
    if source.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
    } else if let Err(e) = Template::parse(source) {
        errors.push(ValidationError::new(field, e.to_string()));
    }
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }

    let mut aliases = HashSet::new();
    for (i, broker) in config.brokers.iter().enumerate() {
        let at = format!("brokers[{}]", i);
        if !aliases.insert(broker.alias.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.alias", at),
                format!("duplicate alias {:?}", broker.alias),
            ));
        }
        if broker.user_credential_file.is_some() && broker.nkey_credential_file.is_some() {
            errors.push(ValidationError::new(
                at.clone(),
                "user_credential_file and nkey_credential_file are mutually exclusive",
            ));
        }
        if config.transport == TransportKind::Nats && broker.urls.is_empty() {
            errors.push(ValidationError::new(format!("{}.urls", at), "at least one URL is required"));
        }
        for (j, sub) in broker.subscribe.iter().enumerate() {
            let at = format!("{}.subscribe[{}]", at, j);
            if sub.subject.trim().is_empty() {
                errors.push(ValidationError::new(format!("{}.subject", at), "must not be empty"));
            }
            check_template(&mut errors, format!("{}.method", at), &sub.method);
            check_template(&mut errors, format!("{}.url", at), &sub.url);
            if sub.queue_group.as_deref().is_some_and(|g| g.trim().is_empty()) {
                errors.push(ValidationError::new(format!("{}.queue_group", at), "must not be empty"));
            }
        }
    }

    for (i, server) in config.servers.iter().enumerate() {
        let at = format!("servers[{}]", i);
        if server.listen.is_empty() {
            errors.push(ValidationError::new(format!("{}.listen", at), "at least one address is required"));
        }
        for (j, listen) in server.listen.iter().enumerate() {
            if let Err(e) = listen.parse::<ListenAddress>() {
                errors.push(ValidationError::new(format!("{}.listen[{}]", at, j), e.to_string()));
            }
        }
        for (j, route) in server.routes.iter().enumerate() {
            let at = format!("{}.routes[{}]", at, j);
            if route.handle.is_empty() {
                errors.push(ValidationError::new(format!("{}.handle", at), "handler chain is empty"));
            }
            for (k, handler) in route.handle.iter().enumerate() {
                validate_handler(&mut errors, format!("{}.handle[{}]", at, k), handler);
            }
        }
    }

    if let Some(output) = &config.observability.log_output {
        if output.subject.trim().is_empty() {
            errors.push(ValidationError::new("observability.log_output.subject", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_handler(errors: &mut Vec<ValidationError>, at: String, handler: &HandlerConfig) {
    match handler {
        HandlerConfig::BodyOffload { ttl_secs, bucket, .. } => {
            if *ttl_secs == 0 {
                errors.push(ValidationError::new(format!("{}.ttl_secs", at), "must be greater than zero"));
            }
            if bucket.as_deref().is_some_and(|b| b.trim().is_empty()) {
                errors.push(ValidationError::new(format!("{}.bucket", at), "must not be empty"));
            }
        }
        HandlerConfig::Publish { subject, .. } => {
            check_template(errors, format!("{}.subject", at), subject);
        }
        HandlerConfig::Request {
            subject, timeout_ms, ..
        } => {
            check_template(errors, format!("{}.subject", at), subject);
            if *timeout_ms == 0 {
                errors.push(ValidationError::new(format!("{}.timeout_ms", at), "must be greater than zero"));
            }
        }
        HandlerConfig::Respond { status, .. } => {
            if !(100..=999).contains(status) {
                errors.push(ValidationError::new(
                    format!("{}.status", at),
                    format!("{} is not a valid HTTP status", status),
                ));
            }
        }
    }
}
