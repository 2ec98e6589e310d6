//! Reconciling local state after a successful dispatch.
//!
//! A dispatch and the write that follows it are not atomic. When the write
//! fails the remote side has already acted, so the coordinator sends a
//! pre-built compensating command instead of retrying anything.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::command::DispatchEnvelope;
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::error::{FleetError, PersistenceError};
use crate::lifecycle::AgentStatus;
use crate::store::AgentStore;

/// Local write that follows a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalMutation {
    SetStatus {
        agent_id: String,
        status: AgentStatus,
    },
    SetSettings {
        agent_id: String,
        settings: serde_json::Value,
    },
}

impl LocalMutation {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::SetStatus { agent_id, .. } | Self::SetSettings { agent_id, .. } => agent_id,
        }
    }
}

/// A dispatched envelope, its local write and the command that undoes it.
#[derive(Debug)]
pub struct SettlementPlan {
    dispatched: Dispatched,
    mutation: LocalMutation,
    compensation: DispatchEnvelope,
}

impl SettlementPlan {
    pub fn new(
        dispatched: Dispatched,
        mutation: LocalMutation,
        compensation: DispatchEnvelope,
    ) -> Self {
        Self {
            dispatched,
            mutation,
            compensation,
        }
    }

    pub fn dispatched(&self) -> &Dispatched {
        &self.dispatched
    }

    pub fn mutation(&self) -> &LocalMutation {
        &self.mutation
    }

    pub fn compensation(&self) -> &DispatchEnvelope {
        &self.compensation
    }
}

/// Applies settlement plans.
#[derive(Clone)]
pub struct SettlementCoordinator {
    store: Arc<dyn AgentStore>,
    dispatcher: Dispatcher,
}

impl SettlementCoordinator {
    pub fn new(store: Arc<dyn AgentStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Apply the local write; compensate if it fails.
    ///
    /// The compensation is sent at most once. Its own failure is logged and
    /// reported through `compensated`, the returned error always carries the
    /// original persistence failure.
    pub async fn settle(&self, plan: SettlementPlan) -> Result<(), FleetError> {
        let SettlementPlan {
            dispatched,
            mutation,
            compensation,
        } = plan;

        let Err(source) = self.apply(&mutation).await else {
            return Ok(());
        };

        let agent_id = mutation.agent_id().to_string();
        warn!(
            id = %dispatched.envelope().id,
            agent_id = %agent_id,
            error = %source,
            "Local write failed after dispatch, compensating"
        );

        let compensated = match self.dispatcher.dispatch(compensation).await {
            Ok(sent) => {
                info!(id = %sent.envelope().id, agent_id = %agent_id, "Compensation dispatched");
                true
            }
            Err(e) => {
                error!(
                    agent_id = %agent_id,
                    error = %e,
                    "Compensation failed, agent and console disagree"
                );
                false
            }
        };

        Err(FleetError::SettlementFailed {
            agent_id,
            source,
            compensated,
        })
    }

    async fn apply(&self, mutation: &LocalMutation) -> Result<(), PersistenceError> {
        match mutation {
            LocalMutation::SetStatus { agent_id, status } => {
                self.store.set_agent_status(agent_id, *status).await
            }
            LocalMutation::SetSettings { agent_id, settings } => {
                self.store.set_agent_settings_mirror(agent_id, settings).await
            }
        }
    }
}
