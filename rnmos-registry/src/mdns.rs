//! mDNS advertisement
//!
//! The registry advertises its Query, Registration and Node APIs over
//! multicast DNS so NMOS clients on the LAN can discover it. The actual
//! responder is an external collaborator behind the [`ServiceAdvertiser`]
//! trait; the default implementation only logs what it would advertise,
//! which keeps the registry runnable anywhere.

use async_trait::async_trait;
use rnmos_core::{Result, Settings};

/// A pluggable mDNS service advertiser
#[async_trait]
pub trait ServiceAdvertiser: Send + Sync {
    /// Register a service instance to be advertised once started
    async fn register_service(
        &self,
        name: &str,
        service_type: &str,
        port: u16,
        txt_records: &[String],
    ) -> Result<()>;

    /// Begin advertising all registered services
    async fn start(&self) -> Result<()>;

    /// Withdraw all advertisements
    async fn stop(&self) -> Result<()>;
}

/// The default advertiser: logs registrations, advertises nothing
pub struct TracingAdvertiser;

#[async_trait]
impl ServiceAdvertiser for TracingAdvertiser {
    async fn register_service(
        &self,
        name: &str,
        service_type: &str,
        port: u16,
        txt_records: &[String],
    ) -> Result<()> {
        tracing::info!(
            name = name,
            service_type = service_type,
            port = port,
            txt = ?txt_records,
            "Registered mDNS service"
        );
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        tracing::info!("Starting mDNS advertisement");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        tracing::info!("Stopping mDNS advertisement");
        Ok(())
    }
}

/// Construct the default advertiser
pub fn make_advertiser() -> Box<dyn ServiceAdvertiser> {
    Box::new(TracingAdvertiser)
}

/// Register the registry's three API services with their TXT records
pub async fn advertise_registry_apis(
    advertiser: &dyn ServiceAdvertiser,
    settings: &Settings,
) -> Result<()> {
    let txt_records = vec![
        "api_proto=http".to_string(),
        "api_ver=v1.0,v1.1,v1.2".to_string(),
        format!("pri={}", settings.pri),
    ];

    advertiser
        .register_service("rnmos_query", "_nmos-query._tcp", settings.query_port, &txt_records)
        .await?;
    advertiser
        .register_service(
            "rnmos_registration",
            "_nmos-registration._tcp",
            settings.registration_port,
            &txt_records,
        )
        .await?;
    advertiser
        .register_service("rnmos_node", "_nmos-node._tcp", settings.node_port, &txt_records)
        .await?;
    Ok(())
}
