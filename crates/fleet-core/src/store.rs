//! Persistence seam.
//!
//! The relational model lives outside this crate; the orchestration only
//! reads and writes the few agent columns below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::lifecycle::AgentStatus;

/// The slice of an agent row the orchestration core touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub status: AgentStatus,
    /// Last settings successfully pushed to the agent.
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AgentRecord {
    /// A freshly seen agent.
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AgentStatus::initial(),
            settings: serde_json::Value::Null,
            tags: vec![],
        }
    }
}

/// Agent persistence consumed by the orchestration core.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fetch one agent. Missing agents yield [`PersistenceError::NotFound`].
    async fn get_agent_by_id(&self, agent_id: &str) -> Result<AgentRecord, PersistenceError>;

    async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<(), PersistenceError>;

    async fn set_agent_settings_mirror(
        &self,
        agent_id: &str,
        settings: &serde_json::Value,
    ) -> Result<(), PersistenceError>;

    async fn agent_exists(&self, agent_id: &str) -> Result<bool, PersistenceError>;

    /// Whether a companion service of this kind has ever registered.
    async fn companion_service_exists(&self, service: &str) -> Result<bool, PersistenceError>;

    /// Insert a record in [`AgentStatus::WaitingForAdmission`] unless one
    /// already exists. Must be atomic; returns whether this call inserted.
    async fn create_pending_agent(&self, agent_id: &str) -> Result<bool, PersistenceError>;

    async fn add_tag(&self, agent_id: &str, tag: &str) -> Result<(), PersistenceError>;

    async fn delete_agent(&self, agent_id: &str) -> Result<(), PersistenceError>;
}
