//! Core NMOS IS-04/IS-05 types
//!
//! This crate holds the I/O-free foundations of the registry:
//!
//! - **TAI time**: the `"<sec>:<nsec>"` timestamps that order every
//!   mutation, and the coarser health seconds behind heartbeat expiry
//! - **API versions**: `v1.0`–`v1.2` parsing and ordering
//! - **Resources**: the typed envelope over opaque JSON payloads, with
//!   parent-reference extraction
//! - **Errors**: the application error enum and the `{code, error, debug}`
//!   wire body
//! - **Settings**: the recognized configuration keys and their defaults
//!
//! The server side — store, APIs, WebSocket fanout — lives in
//! `rnmos-registry`.

pub mod error;
pub mod resource;
pub mod settings;
pub mod tai;
pub mod version;

pub use error::{ApiError, ErrorBody, Result};
pub use resource::{super_resource, Resource, ResourceType};
pub use settings::Settings;
pub use tai::{health_now, Health, Tai, HEALTH_FOREVER};
pub use version::{ApiVersion, IS04_VERSIONS, IS05_VERSIONS, V1_0, V1_1, V1_2};

/// Mint a new resource id
pub fn make_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
