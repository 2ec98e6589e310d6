//! Fleet error types.

use fleet_bus::BusError;
use thiserror::Error;

use crate::lifecycle::{AgentStatus, LifecycleAction};

/// Errors raised by the persistence layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The agent record does not exist
    #[error("Agent not found: {0}")]
    NotFound(String),

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Fieldless classification of a [`FleetError`].
///
/// The web layer maps each kind to its own user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BusUnavailable,
    NoResponder,
    DispatchRejected,
    SettlementFailed,
    PartialBatchFailure,
    BatchFailed,
    InvalidTransition,
    NotFound,
    Persistence,
    Provisioning,
    Serialization,
    SupervisorUnavailable,
}

/// Errors that can occur during fleet operations.
#[derive(Error, Debug)]
pub enum FleetError {
    /// No live bus connection
    #[error("Message bus unavailable: {0}")]
    BusUnavailable(String),

    /// Request timed out or nobody was listening
    #[error("No responder on {subject}")]
    NoResponder { subject: String },

    /// The agent answered with an application-level error
    #[error("Agent {agent_id} rejected the command: {reason}")]
    DispatchRejected { agent_id: String, reason: String },

    /// Dispatch succeeded but the local write failed
    #[error("Could not persist change for agent {agent_id}: {source}")]
    SettlementFailed {
        agent_id: String,
        #[source]
        source: PersistenceError,
        /// Whether the compensating dispatch reached the bus
        compensated: bool,
    },

    /// Some members of a bulk operation failed
    #[error("{} of {total} agents could not be processed", .failures.len())]
    PartialBatchFailure {
        total: usize,
        failures: Vec<(String, FleetError)>,
    },

    /// Every member of a bulk operation failed
    #[error("None of the {} agents could be processed", .failures.len())]
    BatchFailed { failures: Vec<(String, FleetError)> },

    /// The action is not allowed from the current status
    #[error("Cannot {action} agent {agent_id} while {from}")]
    InvalidTransition {
        agent_id: String,
        from: AgentStatus,
        action: LifecycleAction,
    },

    /// Persistence error
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Stream create/update/discovery failed
    #[error("Stream provisioning failed: {0}")]
    Provisioning(String),

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The reconnection task could not be scheduled
    #[error("Bus supervisor could not be scheduled: {0}")]
    SupervisorUnavailable(String),
}

impl FleetError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BusUnavailable(_) => ErrorKind::BusUnavailable,
            Self::NoResponder { .. } => ErrorKind::NoResponder,
            Self::DispatchRejected { .. } => ErrorKind::DispatchRejected,
            Self::SettlementFailed { .. } => ErrorKind::SettlementFailed,
            Self::PartialBatchFailure { .. } => ErrorKind::PartialBatchFailure,
            Self::BatchFailed { .. } => ErrorKind::BatchFailed,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Persistence(PersistenceError::NotFound(_)) => ErrorKind::NotFound,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Provisioning(_) => ErrorKind::Provisioning,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::SupervisorUnavailable(_) => ErrorKind::SupervisorUnavailable,
        }
    }

    /// Classify a transport failure seen while dispatching.
    pub(crate) fn from_dispatch(agent_id: &str, subject: &str, error: BusError) -> Self {
        match error {
            BusError::NoResponders(_) | BusError::Timeout => Self::NoResponder {
                subject: subject.to_string(),
            },
            BusError::NotConnected | BusError::ConnectionFailed(_) => {
                Self::BusUnavailable(error.to_string())
            }
            other => Self::DispatchRejected {
                agent_id: agent_id.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_classification() {
        let err = FleetError::from_dispatch(
            "a1",
            "agent.restart.a1",
            BusError::NoResponders("agent.restart.a1".into()),
        );
        assert_eq!(err.kind(), ErrorKind::NoResponder);

        let err = FleetError::from_dispatch("a1", "agent.restart.a1", BusError::Timeout);
        assert_eq!(err.kind(), ErrorKind::NoResponder);

        let err = FleetError::from_dispatch("a1", "agent.enable.a1", BusError::NotConnected);
        assert_eq!(err.kind(), ErrorKind::BusUnavailable);

        let err = FleetError::from_dispatch(
            "a1",
            "agent.enable.a1",
            BusError::PublishFailed("maximum payload exceeded".into()),
        );
        assert_eq!(err.kind(), ErrorKind::DispatchRejected);
    }

    #[test]
    fn test_not_found_has_its_own_kind() {
        let err: FleetError = PersistenceError::NotFound("a1".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: FleetError = PersistenceError::Storage("disk full".into()).into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }
}
