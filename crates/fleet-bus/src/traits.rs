//! Traits for message bus implementations.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BusError;
use crate::stream::StreamConfig;

/// A live connection to the message bus and its durable-stream subsystem.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Check if connected. Never blocks.
    fn is_connected(&self) -> bool;

    /// Publish without any acknowledgement.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Publish into a durable stream and wait for the stream to accept it.
    async fn publish_durable(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Send a request and wait up to `timeout` for the reply payload.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError>;

    /// Current configuration of a stream, `None` if it does not exist.
    async fn stream_config(&self, name: &str) -> Result<Option<StreamConfig>, BusError>;

    /// Create a stream.
    async fn create_stream(&self, config: &StreamConfig) -> Result<(), BusError>;

    /// Replace the configuration of an existing stream.
    async fn update_stream(&self, config: &StreamConfig) -> Result<(), BusError>;

    /// Flush pending messages and close the connection.
    async fn close(&self) -> Result<(), BusError>;
}

/// Something that can open a [`BusTransport`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Arc<dyn BusTransport>, BusError>;
}
