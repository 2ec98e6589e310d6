//! NATS message bus implementation.
//!
//! Provides:
//! - Connection with optional mutual TLS
//! - JetStream stream lookup/create/update
//! - Durable publish (waits for the stream ack)
//! - Request/reply with a per-call timeout

use async_nats::client::{Request, RequestErrorKind};
use async_nats::jetstream::context::{GetStreamErrorKind, PublishError, PublishErrorKind};
use async_nats::jetstream::{self, stream, Context as JetStreamContext};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::BusError;
use crate::stream::{StreamConfig, StreamRetention};
use crate::traits::{BusTransport, Connector};

/// NATS client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL(s)
    pub urls: Vec<String>,
    /// Client name for identification
    pub client_name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Default request timeout
    pub request_timeout: Duration,
    /// Mutual TLS material
    pub tls: Option<NatsTls>,
}

/// Client certificate and CA used for mutual TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsTls {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: Option<PathBuf>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            client_name: "fleet-console".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            tls: None,
        }
    }
}

impl NatsConfig {
    /// Create config with single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Add additional URLs for clustering.
    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    /// Set client name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Enable mutual TLS.
    pub fn with_tls(mut self, tls: NatsTls) -> Self {
        self.tls = Some(tls);
        self
    }

    fn options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new()
            .name(&self.client_name)
            .connection_timeout(self.connect_timeout)
            .request_timeout(Some(self.request_timeout));

        if let Some(tls) = &self.tls {
            options = options
                .require_tls(true)
                .add_client_certificate(tls.cert.clone(), tls.key.clone());
            if let Some(ca) = &tls.ca {
                options = options.add_root_certificates(ca.clone());
            }
        }

        options
    }
}

/// Opens [`NatsBus`] connections from a fixed configuration.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    config: NatsConfig,
}

impl NatsConnector {
    pub fn new(config: NatsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for NatsConnector {
    async fn connect(&self) -> Result<Arc<dyn BusTransport>, BusError> {
        let bus = NatsBus::connect(&self.config).await?;
        Ok(Arc::new(bus))
    }
}

/// NATS-based message bus with JetStream.
pub struct NatsBus {
    client: Client,
    jetstream: JetStreamContext,
}

impl NatsBus {
    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns an error if connection fails.
    pub async fn connect(config: &NatsConfig) -> Result<Self, BusError> {
        info!(urls = ?config.urls, "Connecting to NATS");

        let client = async_nats::connect_with_options(config.urls.join(","), config.options())
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;

        info!("Connected to NATS");

        let jetstream = jetstream::new(client.clone());
        Ok(Self { client, jetstream })
    }

    /// Get the raw NATS client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn map_publish_error(subject: &str, e: PublishError) -> BusError {
    match e.kind() {
        PublishErrorKind::StreamNotFound => BusError::NoResponders(subject.to_string()),
        PublishErrorKind::TimedOut => BusError::Timeout,
        PublishErrorKind::BrokenPipe => BusError::NotConnected,
        _ => BusError::PublishFailed(e.to_string()),
    }
}

fn to_native(config: &StreamConfig) -> stream::Config {
    let retention = match config.retention {
        StreamRetention::Limits => stream::RetentionPolicy::Limits,
        StreamRetention::Interest => stream::RetentionPolicy::Interest,
        StreamRetention::WorkQueue => stream::RetentionPolicy::WorkQueue,
    };

    stream::Config {
        name: config.name.clone(),
        subjects: config.subjects.clone(),
        retention,
        num_replicas: config.replicas.unwrap_or_default(),
        ..Default::default()
    }
}

fn from_native(config: &stream::Config) -> StreamConfig {
    let retention = match config.retention {
        stream::RetentionPolicy::Limits => StreamRetention::Limits,
        stream::RetentionPolicy::Interest => StreamRetention::Interest,
        stream::RetentionPolicy::WorkQueue => StreamRetention::WorkQueue,
    };

    StreamConfig {
        name: config.name.clone(),
        subjects: config.subjects.clone(),
        retention,
        replicas: (config.num_replicas > 0).then_some(config.num_replicas),
    }
}

#[async_trait]
impl BusTransport for NatsBus {
    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        debug!(subject = %subject, "Publishing message");

        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BusError::PublishFailed(e.to_string()))
    }

    async fn publish_durable(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        debug!(subject = %subject, "Publishing to JetStream");

        let ack = self
            .jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| map_publish_error(subject, e))?;

        ack.await.map_err(|e| map_publish_error(subject, e))?;
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        debug!(subject = %subject, timeout_ms = %timeout.as_millis(), "Sending request");

        let request = Request::new().payload(payload).timeout(Some(timeout));
        let response = self
            .client
            .send_request(subject.to_string(), request)
            .await
            .map_err(|e| match e.kind() {
                RequestErrorKind::TimedOut => BusError::Timeout,
                RequestErrorKind::NoResponders => BusError::NoResponders(subject.to_string()),
                _ => BusError::RequestFailed(e.to_string()),
            })?;

        Ok(response.payload)
    }

    async fn stream_config(&self, name: &str) -> Result<Option<StreamConfig>, BusError> {
        match self.jetstream.get_stream(name).await {
            Ok(stream) => Ok(Some(from_native(&stream.cached_info().config))),
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(err)
                    if err.error_code() == jetstream::ErrorCode::STREAM_NOT_FOUND =>
                {
                    Ok(None)
                }
                _ => Err(BusError::StreamLookupFailed(e.to_string())),
            },
        }
    }

    async fn create_stream(&self, config: &StreamConfig) -> Result<(), BusError> {
        info!(stream = %config.name, subjects = ?config.subjects, "Creating stream");
        self.jetstream
            .create_stream(to_native(config))
            .await
            .map_err(|e| BusError::StreamProvisionFailed(e.to_string()))?;
        Ok(())
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<(), BusError> {
        info!(stream = %config.name, subjects = ?config.subjects, "Updating stream");
        self.jetstream
            .update_stream(to_native(config))
            .await
            .map_err(|e| BusError::StreamProvisionFailed(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        info!("Disconnecting from NATS");
        self.client
            .drain()
            .await
            .map_err(|e| BusError::DisconnectFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests require a running NATS server
    // Run with: docker run -d --name nats -p 4222:4222 nats:latest -js

    #[test]
    fn test_native_round_trip_keeps_declared_fields() {
        let config = StreamConfig::new("AGENTS_STREAM")
            .subjects(vec!["agent.enable.>".into()])
            .replicas_for_nodes(3);

        let back = from_native(&to_native(&config));
        assert_eq!(back, config);

        let single = StreamConfig::new("AGENTS_STREAM");
        assert_eq!(to_native(&single).num_replicas, 0);
        assert_eq!(from_native(&to_native(&single)).replicas, None);
    }

    #[tokio::test]
    #[ignore = "requires NATS server"]
    async fn test_connect() {
        let bus = NatsBus::connect(&NatsConfig::default()).await.unwrap();
        assert!(bus.is_connected());
    }

    #[tokio::test]
    #[ignore = "requires NATS server"]
    async fn test_stream_create_then_lookup() {
        let bus = NatsBus::connect(&NatsConfig::default()).await.unwrap();

        let config = StreamConfig::new("FLEET_TEST_STREAM")
            .subjects(vec!["fleettest.enable.>".to_string()]);

        if bus.stream_config(&config.name).await.unwrap().is_none() {
            bus.create_stream(&config).await.unwrap();
        }

        let found = bus.stream_config(&config.name).await.unwrap().unwrap();
        assert!(config.is_satisfied_by(&found));

        bus.publish_durable("fleettest.enable.a1", Bytes::from_static(b"{}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore = "requires NATS server"]
    async fn test_request_without_listener() {
        let bus = NatsBus::connect(&NatsConfig::default()).await.unwrap();

        let err = bus
            .request("fleettest.nobody", Bytes::new(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_no_responder());
    }
}
