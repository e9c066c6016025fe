//! Static response stage.

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0} is not a valid HTTP status")]
pub struct InvalidStatus(pub u16);

/// Terminal stage answering with a fixed status and body.
#[derive(Debug, Clone)]
pub struct Respond {
    status: StatusCode,
    body: Bytes,
}

impl Respond {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Result<Self, InvalidStatus> {
        Ok(Self {
            status: StatusCode::from_u16(status).map_err(|_| InvalidStatus(status))?,
            body: body.into(),
        })
    }

    pub fn response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        response
    }
}
