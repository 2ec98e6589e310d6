//! Durable stream provisioning.
//!
//! Streams are declared, not migrated: every (re)connect compares the
//! wanted configuration with what the broker has and writes only when they
//! differ.

use fleet_bus::{BusError, BusTransport, StreamConfig};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::store::AgentStore;

/// What provisioning did to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Updated,
    Unchanged,
}

fn provisioning(e: BusError) -> FleetError {
    FleetError::Provisioning(e.to_string())
}

/// Declares the fleet command stream and finds companion streams.
pub struct StreamProvisioner {
    store: Arc<dyn AgentStore>,
}

impl StreamProvisioner {
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self { store }
    }

    /// Create the stream if absent, update it if its declared fields changed.
    pub async fn provision_command_stream(
        &self,
        transport: &dyn BusTransport,
        wanted: &StreamConfig,
    ) -> Result<ProvisionOutcome, FleetError> {
        let existing = transport
            .stream_config(&wanted.name)
            .await
            .map_err(provisioning)?;

        match existing {
            None => {
                transport.create_stream(wanted).await.map_err(provisioning)?;
                info!(stream = %wanted.name, replicas = ?wanted.replicas, "Created command stream");
                Ok(ProvisionOutcome::Created)
            }
            Some(current) if wanted.is_satisfied_by(&current) => {
                debug!(stream = %wanted.name, "Command stream up to date");
                Ok(ProvisionOutcome::Unchanged)
            }
            Some(current) => {
                transport.update_stream(wanted).await.map_err(provisioning)?;
                info!(
                    stream = %wanted.name,
                    from = ?current.subjects,
                    to = ?wanted.subjects,
                    "Updated command stream"
                );
                Ok(ProvisionOutcome::Updated)
            }
        }
    }

    /// Look up a stream owned by another service.
    ///
    /// A missing stream is only an error when `service` is registered.
    pub async fn discover_companion_stream(
        &self,
        transport: &dyn BusTransport,
        name: &str,
        service: &str,
    ) -> Result<Option<StreamConfig>, FleetError> {
        if let Some(found) = transport.stream_config(name).await.map_err(provisioning)? {
            debug!(stream = %name, "Found companion stream");
            return Ok(Some(found));
        }

        if self.store.companion_service_exists(service).await? {
            return Err(FleetError::Provisioning(format!(
                "stream {name} not found but {service} is registered"
            )));
        }

        info!(stream = %name, service = %service, "Companion stream absent, service not installed");
        Ok(None)
    }

    /// Provision everything the fleet needs; returns the usable stream names.
    pub async fn provision(
        &self,
        transport: &dyn BusTransport,
        config: &FleetConfig,
    ) -> Result<Vec<String>, FleetError> {
        let command_stream = config.command_stream();
        self.provision_command_stream(transport, &command_stream)
            .await?;

        let mut streams = vec![command_stream.name];

        if let Some(companion) = &config.streams.companion_stream {
            let found = self
                .discover_companion_stream(transport, companion, &config.streams.companion_service)
                .await?;
            if let Some(found) = found {
                streams.push(found.name);
            }
        }

        Ok(streams)
    }
}
