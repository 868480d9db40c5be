//! NMOS IS-04/IS-05 registry server
//!
//! A central registry for audio-video networking resources: Nodes, Devices,
//! Sources, Flows, Senders and Receivers register and heartbeat here,
//! consumers query them over REST or a WebSocket subscription stream, and
//! connection setup between senders and receivers is brokered by the
//! Connection API. The registry advertises its APIs over mDNS so clients on
//! the LAN can discover it.
//!
//! # Core subsystems
//!
//! - **Resource store** ([`store`]): a multi-indexed in-memory collection of
//!   versioned JSON resources with strictly increasing update stamps,
//!   referential integrity and cascade deletion
//! - **Expiration** ([`expiration`]): health-driven garbage collection of
//!   registrations that stop heartbeating
//! - **Query subscriptions** ([`ws`], [`fanout`]): per-client filtered views
//!   delivered as batched `grain` messages over WebSocket
//! - **API router** ([`router`]): the regex dispatch layer every API is
//!   built on
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rnmos_registry::RegistryServer;
//!
//! #[tokio::main]
//! async fn main() -> rnmos_core::Result<()> {
//!     let server = RegistryServer::builder().build().await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency model
//!
//! One `tokio::sync::Mutex` guards the model (store, subscriptions, session
//! buffers); two `Notify` values play condition variables: one wakes the
//! expiry worker on new health information, the other wakes the fanout
//! worker on resource events. No network I/O happens under the lock —
//! outgoing grains are copied out and written through per-session channels.

pub mod api_utils;
pub mod connection_api;
pub mod downgrade;
pub mod events;
pub mod expiration;
pub mod fanout;
pub mod log_model;
pub mod logging_api;
pub mod mdns;
pub mod model;
pub mod node_api;
pub mod query;
pub mod query_api;
pub mod registration_api;
pub mod rql;
pub mod router;
pub mod server;
pub mod server_resources;
pub mod settings_api;
pub mod store;
pub mod ws;

pub use api_utils::{make_app, set_reply, set_status_reply};
pub use connection_api::make_connection_api;
pub use downgrade::{downgrade, is_permitted_downgrade};
pub use events::{Change, ResourceEvent};
pub use log_model::{make_log_model, LogHandle, LogLayer, LogModel};
pub use logging_api::make_logging_api;
pub use mdns::{advertise_registry_apis, make_advertiser, ServiceAdvertiser, TracingAdvertiser};
pub use model::{Model, RegistryModel, WsSession};
pub use node_api::make_node_api;
pub use query::{MatchFlags, ResourceQuery};
pub use query_api::make_query_api;
pub use registration_api::make_registration_api;
pub use router::{from_fn, ApiRequest, ApiResponse, ApiRouter, RouteHandler, RouteParams};
pub use server::{Api, CloseHandle, RegistryServer, RegistryServerBuilder};
pub use settings_api::make_settings_api;
pub use store::Resources;
