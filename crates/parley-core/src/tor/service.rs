//! Tor onion service management.
//!
//! Binds the local listener, registers an ephemeral onion service pointing
//! at it, and removes the service again on stop.

use super::controller::TorController;
use super::onion::OnionAddress;
use crate::config::{OnionServiceConfig, TorConfig};
use crate::error::{Error, Result};
use tokio::net::TcpListener;

/// A registered onion service.
pub struct OnionService {
    address: OnionAddress,
    service_id: String,
    local_port: u16,
    virtual_port: u16,
    controller: TorController,
}

impl OnionService {
    /// Register an onion service and return it with the bound listener.
    ///
    /// Waiting for circuits and registration together are bounded by
    /// `tor.setup_timeout`.
    pub async fn start(tor: &TorConfig, config: &OnionServiceConfig) -> Result<(Self, TcpListener)> {
        let listener = TcpListener::bind(("127.0.0.1", config.local_port))
            .await
            .map_err(|e| Error::Tor(format!("failed to bind listener: {}", e)))?;
        let local_port = listener.local_addr()?.port();

        tracing::info!(local_port, "Bound local listener");

        let setup = async {
            let mut controller = TorController::connect(tor.control_addr).await?;
            controller.authenticate_auto().await?;

            match controller.get_version().await {
                Ok(version) => tracing::info!(version = %version, "Connected to Tor"),
                Err(e) => tracing::warn!("Could not get Tor version: {}", e),
            }

            tracing::info!("Waiting for Tor circuits...");
            controller.wait_ready(tor.setup_timeout).await?;

            let service_id = controller.add_onion(config.virtual_port, local_port).await?;
            Ok::<_, Error>((controller, service_id))
        };

        let (controller, service_id) = tokio::time::timeout(tor.setup_timeout, setup)
            .await
            .map_err(|_| Error::Timeout)??;

        let address = OnionAddress::from_service_id(&service_id)?;

        tracing::info!(
            onion_address = %crate::logging::RedactedAddress(address.as_str()),
            local_port,
            virtual_port = config.virtual_port,
            "Onion service registered"
        );

        Ok((
            Self {
                address,
                service_id,
                local_port,
                virtual_port: config.virtual_port,
                controller,
            },
            listener,
        ))
    }

    /// The onion address peers reach us on.
    pub fn address(&self) -> &OnionAddress {
        &self.address
    }

    /// Get the local port.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Get the virtual port (external port on .onion).
    pub fn virtual_port(&self) -> u16 {
        self.virtual_port
    }

    /// Remove the onion service from Tor.
    pub async fn stop(mut self) -> Result<()> {
        if let Err(e) = self.controller.del_onion(&self.service_id).await {
            tracing::warn!(error = %e, "Failed to remove onion service");
        }
        tracing::info!("Onion service stopped");
        Ok(())
    }
}
