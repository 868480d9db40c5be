//! rnmos — an NMOS IS-04/IS-05 registry in Rust
//!
//! This is the convenience crate that re-exports the rnmos sub-crates. Use
//! it if you want a single dependency for embedding the registry.
//!
//! # Architecture
//!
//! - **rnmos-core**: TAI time, API versions, the resource envelope, error
//!   kinds, settings
//! - **rnmos-registry**: the registry server — resource store, expiry,
//!   query/filter engine, API router, the NMOS APIs, WebSocket
//!   subscriptions and mDNS advertisement
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rnmos::RegistryServer;
//!
//! #[tokio::main]
//! async fn main() -> rnmos::Result<()> {
//!     let server = RegistryServer::builder().build().await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

// Re-export the sub-crates under stable module names
pub use rnmos_core as core;
pub use rnmos_registry as registry;

// And the types most embedders reach for
pub use rnmos_core::{ApiError, ApiVersion, Resource, ResourceType, Result, Settings, Tai};
pub use rnmos_registry::{Api, CloseHandle, RegistryServer, RegistryServerBuilder};
