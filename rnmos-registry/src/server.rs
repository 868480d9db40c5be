//! Server assembly
//!
//! [`RegistryServer`] owns the shared model, the bound listeners for every
//! API, and the advertiser. Building binds all ports (port 0 is supported —
//! the bound addresses are exposed, and the settings are rewritten with the
//! actual ports so `ws_href` and the mDNS records stay truthful). Running
//! registers the mDNS services, spawns the expiry and fanout workers, opens
//! the listeners in an order that means no API exposes a reference to one
//! that is not open yet, and waits for the close handle; shutdown closes
//! everything in reverse order.

use crate::api_utils::make_app;
use crate::connection_api::make_connection_api;
use crate::expiration::erase_expired_resources;
use crate::fanout::send_query_ws_events;
use crate::log_model::{make_log_model, LogHandle};
use crate::logging_api::make_logging_api;
use crate::mdns::{advertise_registry_apis, make_advertiser, ServiceAdvertiser};
use crate::model::RegistryModel;
use crate::node_api::make_node_api;
use crate::query_api::make_query_api;
use crate::registration_api::make_registration_api;
use crate::router::ApiRouter;
use crate::server_resources::make_server_resources;
use crate::settings_api::make_settings_api;
use crate::ws::run_query_ws_listener;
use rnmos_core::{ApiError, Result, Settings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// The registry's listener surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Api {
    Node,
    Connection,
    QueryWs,
    Query,
    Registration,
    Settings,
    Logging,
}

struct Bound {
    listener: TcpListener,
    addr: SocketAddr,
}

async fn bind(host: &str, port: u16) -> Result<Bound> {
    let listener = TcpListener::bind((host, port))
        .await
        .map_err(|e| ApiError::Io(format!("bind {}:{}: {}", host, port, e)))?;
    let addr = listener
        .local_addr()
        .map_err(|e| ApiError::Io(e.to_string()))?;
    Ok(Bound { listener, addr })
}

struct Listeners {
    logging: Bound,
    settings: Bound,
    node: Bound,
    connection: Bound,
    query_ws: Bound,
    query: Bound,
    registration: Bound,
}

/// Builder for the registry server
pub struct RegistryServerBuilder {
    settings: Settings,
    advertiser: Option<Box<dyn ServiceAdvertiser>>,
}

impl RegistryServerBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            advertiser: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the default (logging-only) mDNS advertiser
    pub fn advertiser(mut self, advertiser: Box<dyn ServiceAdvertiser>) -> Self {
        self.advertiser = Some(advertiser);
        self
    }

    /// Bind every listener and construct the shared model
    pub async fn build(self) -> Result<RegistryServer> {
        let mut settings = self.settings;
        let host = settings.host_address.clone();

        let listeners = Listeners {
            logging: bind(&host, settings.logging_port).await?,
            settings: bind(&host, settings.settings_port).await?,
            node: bind(&host, settings.node_port).await?,
            connection: bind(&host, settings.connection_port).await?,
            query_ws: bind(&host, settings.query_ws_port).await?,
            query: bind(&host, settings.query_port).await?,
            registration: bind(&host, settings.registration_port).await?,
        };

        // with port 0 the OS chose; the model must know the real ports
        settings.logging_port = listeners.logging.addr.port();
        settings.settings_port = listeners.settings.addr.port();
        settings.node_port = listeners.node.addr.port();
        settings.connection_port = listeners.connection.addr.port();
        settings.query_ws_port = listeners.query_ws.addr.port();
        settings.query_port = listeners.query.addr.port();
        settings.registration_port = listeners.registration.addr.port();

        let log = make_log_model(settings.logging_level);
        let model = RegistryModel::new(settings.clone());
        {
            let mut locked = model.model.lock().await;
            let self_resources = make_server_resources(&settings);
            let self_node = self_resources
                .first()
                .ok_or_else(|| ApiError::Internal("no self resources".to_string()))?;
            locked.self_node_id = self_node.id.clone();
            for resource in self_resources {
                locked.resources.insert(resource, false)?;
            }
        }

        tracing::info!(
            node = %settings.host_address,
            port = settings.node_port,
            "Configured registry as node"
        );

        Ok(RegistryServer {
            model,
            log,
            advertiser: self.advertiser.unwrap_or_else(make_advertiser),
            listeners,
            close: Arc::new(Notify::new()),
        })
    }
}

impl Default for RegistryServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Asks a running server to shut down
#[derive(Clone)]
pub struct CloseHandle {
    close: Arc<Notify>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.close.notify_one();
    }
}

/// The NMOS registry server
pub struct RegistryServer {
    model: Arc<RegistryModel>,
    log: LogHandle,
    advertiser: Box<dyn ServiceAdvertiser>,
    listeners: Listeners,
    close: Arc<Notify>,
}

impl RegistryServer {
    pub fn builder() -> RegistryServerBuilder {
        RegistryServerBuilder::new()
    }

    /// The bound address of one of the API listeners
    ///
    /// Useful to discover actual ports when the settings asked for port 0.
    pub fn local_addr(&self, api: Api) -> SocketAddr {
        match api {
            Api::Node => self.listeners.node.addr,
            Api::Connection => self.listeners.connection.addr,
            Api::QueryWs => self.listeners.query_ws.addr,
            Api::Query => self.listeners.query.addr,
            Api::Registration => self.listeners.registration.addr,
            Api::Settings => self.listeners.settings.addr,
            Api::Logging => self.listeners.logging.addr,
        }
    }

    /// The shared model, for advanced wiring
    pub fn model(&self) -> Arc<RegistryModel> {
        self.model.clone()
    }

    /// The log model handle, for installing the log layer
    pub fn log_handle(&self) -> LogHandle {
        self.log.clone()
    }

    /// A handle that shuts the running server down
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            close: self.close.clone(),
        }
    }

    /// Run until the close handle fires
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        {
            let locked = self.model.model.lock().await;
            advertise_registry_apis(self.advertiser.as_ref(), &locked.settings).await?;
        }
        self.advertiser.start().await?;

        tracing::info!("Preparing for connections");

        let workers = vec![
            tokio::spawn(erase_expired_resources(self.model.clone(), shutdown_rx.clone())),
            tokio::spawn(send_query_ws_events(self.model.clone(), shutdown_rx.clone())),
        ];

        // open in an order that means NMOS APIs don't expose references to
        // others that aren't open yet
        let listeners = vec![
            serve_api(
                make_logging_api(self.log.clone()),
                self.listeners.logging.listener,
                shutdown_rx.clone(),
            ),
            serve_api(
                make_settings_api(self.model.clone(), self.log.clone()),
                self.listeners.settings.listener,
                shutdown_rx.clone(),
            ),
            serve_api(
                make_node_api(self.model.clone()),
                self.listeners.node.listener,
                shutdown_rx.clone(),
            ),
            serve_api(
                make_connection_api(self.model.clone()),
                self.listeners.connection.listener,
                shutdown_rx.clone(),
            ),
            tokio::spawn(run_query_ws_listener(
                self.model.clone(),
                self.listeners.query_ws.listener,
                shutdown_rx.clone(),
            )),
            serve_api(
                make_query_api(self.model.clone()),
                self.listeners.query.listener,
                shutdown_rx.clone(),
            ),
            serve_api(
                make_registration_api(self.model.clone()),
                self.listeners.registration.listener,
                shutdown_rx.clone(),
            ),
        ];

        tracing::info!("Ready for connections");
        self.close.notified().await;

        tracing::info!("Closing connections");
        let _ = shutdown_tx.send(true);
        // close in reverse of the open order
        for handle in listeners.into_iter().rev() {
            let _ = handle.await;
        }
        for handle in workers.into_iter().rev() {
            let _ = handle.await;
        }
        self.advertiser.stop().await?;

        tracing::info!("Stopped registry");
        Ok(())
    }
}

fn serve_api(
    api: ApiRouter,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = make_app(api);
        let shutdown_future = async move {
            loop {
                if shutdown.changed().await.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_future)
            .await
        {
            tracing::error!(error = %e, "HTTP listener error");
        }
    })
}
