//! Run a registry with default settings
//!
//! ```sh
//! cargo run --example registry
//! ```
//!
//! Then register a node:
//!
//! ```sh
//! curl -X POST http://localhost:3210/x-nmos/registration/v1.2/resource \
//!   -H 'Content-Type: application/json' \
//!   -d '{"type":"node","data":{"id":"6e9c6f1c-47c2-4b8a-9f4a-3dfe7a1b8f4e","version":"0:0","label":"demo"}}'
//! ```

use rnmos_registry::{LogLayer, RegistryServer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = RegistryServer::builder().build().await?;

    // route tracing into both stderr and the Logging API's ring buffer
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(LogLayer::new(server.log_handle()))
        .init();

    let close = server.close_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            close.close();
        }
    });

    server.run().await?;
    Ok(())
}
