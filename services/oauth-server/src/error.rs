//! Protocol error taxonomy and its HTTP mapping
//!
//! Validation failures map to NotFound / NotImplemented / BadRequest. Store
//! faults travel as StorageUnavailable and surface as an opaque 503; they are
//! never folded into a client error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Failures raised by the authorization and token endpoints.
#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("unknown client")]
    NotFound,

    #[error("client is not whitelisted")]
    NotImplemented,

    #[error("{0}")]
    BadRequest(String),

    #[error("credential store unavailable: {0}")]
    StorageUnavailable(#[from] oauth_store::Error),
}

impl OAuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::NotFound => StatusCode::NOT_FOUND,
            OAuthError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            OAuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OAuthError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            OAuthError::NotFound => "not_found",
            OAuthError::NotImplemented => "not_implemented",
            OAuthError::BadRequest(_) => "bad_request",
            OAuthError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

/// JSON error body: `{"error": "<kind>", "message": "..."}`
impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            OAuthError::StorageUnavailable(e) => {
                error!(error = %e, "credential store failure");
                "temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };
        let body = serde_json::json!({
            "error": self.kind(),
            "message": message,
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Unwrap a required request parameter. Empty strings count as missing.
pub fn required(value: Option<String>, name: &str) -> Result<String, OAuthError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(OAuthError::BadRequest(format!("{name} is required"))),
    }
}

/// An optional request parameter may be omitted, but not sent empty.
pub fn optional(value: Option<String>, name: &str) -> Result<Option<String>, OAuthError> {
    match value {
        Some(v) if v.is_empty() => Err(OAuthError::BadRequest(format!(
            "{name} must not be empty"
        ))),
        other => Ok(other),
    }
}
