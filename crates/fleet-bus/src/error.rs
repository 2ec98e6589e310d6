//! Bus error types.

use thiserror::Error;

/// Errors that can occur with the message bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected (or the connection was lost)
    #[error("Not connected to the message bus")]
    NotConnected,

    /// Disconnection failed
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    /// Publish failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Request failed
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Nobody is listening on the subject (or no stream captures it)
    #[error("No responders on {0}")]
    NoResponders(String),

    /// Timeout
    #[error("Request timed out")]
    Timeout,

    /// Stream lookup failed for a reason other than absence
    #[error("Stream lookup failed: {0}")]
    StreamLookupFailed(String),

    /// Stream create/update rejected by the broker
    #[error("Stream provisioning failed: {0}")]
    StreamProvisionFailed(String),
}

impl BusError {
    /// True when the failure means the target never got the message
    /// because nothing was there to receive it.
    #[must_use]
    pub fn is_no_responder(&self) -> bool {
        matches!(self, Self::NoResponders(_) | Self::Timeout)
    }

    /// True when the failure is about the connection itself.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::NotConnected)
    }
}
