//! Error types for the registry
//!
//! This module provides the application-level error enum used by every API
//! handler, plus the wire-format error body the NMOS APIs return.
//!
//! # Error kinds and HTTP statuses
//!
//! Each kind maps 1:1 to an HTTP status:
//!
//! - `MalformedRequest` → 400
//! - `NotFound` → 404
//! - `MethodNotAllowed` → 405
//! - `ParentMissing` → 409 (referential-integrity conflict)
//! - `DuplicateId` → 409
//! - `UnsupportedVersion` → 404
//! - `NotImplemented` → 501
//! - `Internal`, `Io`, `WebSocket` → 500
//!
//! # Propagation
//!
//! Handlers return `Result<_, ApiError>` and propagate with `?`. The API
//! router converts an error into the mapped status plus a
//! `{code, error, debug}` JSON body at the router boundary; workers log and
//! retry on the next tick instead of aborting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout the registry crates
pub type Result<T> = std::result::Result<T, ApiError>;

/// Application-level error for registry operations
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The request body or query string could not be understood
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// No resource, route or subscription matched
    #[error("Not found")]
    NotFound,

    /// A route matched but not for the requested method
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// A registered resource references a parent that is not in the store
    #[error("Parent resource missing: {0}")]
    ParentMissing(String),

    /// An insert collided with an existing id
    #[error("Duplicate resource id: {0}")]
    DuplicateId(String),

    /// The request named an API version this registry does not serve
    #[error("Unsupported API version: {0}")]
    UnsupportedVersion(String),

    /// The endpoint exists but is not implemented in this registry
    #[error("Not implemented")]
    NotImplemented,

    /// Unexpected failure inside a handler or worker
    #[error("Internal error: {0}")]
    Internal(String),

    /// Low-level I/O failure (listener setup, socket errors)
    #[error("IO error: {0}")]
    Io(String),

    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl ApiError {
    /// The HTTP status this error maps to
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::MalformedRequest(_) => 400,
            ApiError::NotFound => 404,
            ApiError::MethodNotAllowed => 405,
            ApiError::ParentMissing(_) => 409,
            ApiError::DuplicateId(_) => 409,
            ApiError::UnsupportedVersion(_) => 404,
            ApiError::NotImplemented => 501,
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::WebSocket(_) => 500,
        }
    }

    /// The wire-format body for this error
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.status_code(),
            error: match self {
                ApiError::MalformedRequest(_) => "Malformed request".to_string(),
                ApiError::NotFound => "Not found".to_string(),
                ApiError::MethodNotAllowed => "Method not allowed".to_string(),
                ApiError::ParentMissing(_) => "Parent resource missing".to_string(),
                ApiError::DuplicateId(_) => "Duplicate resource id".to_string(),
                ApiError::UnsupportedVersion(_) => "Unsupported API version".to_string(),
                ApiError::NotImplemented => "Not implemented".to_string(),
                ApiError::Internal(_) => "Internal error".to_string(),
                ApiError::Io(_) => "IO error".to_string(),
                ApiError::WebSocket(_) => "WebSocket error".to_string(),
            },
            debug: Some(self.to_string()),
        }
    }
}

/// The `{code, error, debug}` body NMOS APIs return on error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The HTTP status code, repeated in the body
    pub code: u16,
    /// Short human-readable description
    pub error: String,
    /// Optional extra detail for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}
