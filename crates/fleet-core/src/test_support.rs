//! In-memory collaborators shared by the unit tests.

use async_trait::async_trait;
use fleet_bus::{BusError, BusTransport, Connector, MemoryBus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::PersistenceError;
use crate::lifecycle::AgentStatus;
use crate::store::{AgentRecord, AgentStore};

#[derive(Default)]
struct StoreInner {
    agents: HashMap<String, AgentRecord>,
    companions: HashSet<String>,
    failing_writes: HashSet<String>,
    hidden: HashSet<String>,
    status_writes: usize,
}

/// Agent table kept in a map. Writes for chosen agents can be made to fail.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(self, id: &str, status: AgentStatus) -> Self {
        let mut record = AgentRecord::pending(id);
        record.status = status;
        self.inner.lock().agents.insert(id.to_string(), record);
        self
    }

    pub fn register_companion(&self, service: &str) {
        self.inner.lock().companions.insert(service.to_string());
    }

    /// Every write touching `agent_id` fails from now on.
    pub fn fail_writes_for(&self, agent_id: &str) {
        self.inner.lock().failing_writes.insert(agent_id.to_string());
    }

    /// `agent_exists` reports `agent_id` as missing, as if another writer
    /// inserted it right after the check.
    pub fn hide_from_exists(&self, agent_id: &str) {
        self.inner.lock().hidden.insert(agent_id.to_string());
    }

    pub fn agent(&self, id: &str) -> Option<AgentRecord> {
        self.inner.lock().agents.get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<AgentStatus> {
        self.agent(id).map(|a| a.status)
    }

    pub fn status_writes(&self) -> usize {
        self.inner.lock().status_writes
    }

    fn write<F>(&self, agent_id: &str, f: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut AgentRecord),
    {
        let mut inner = self.inner.lock();
        if inner.failing_writes.contains(agent_id) {
            return Err(PersistenceError::Storage("write rejected".into()));
        }
        let record = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| PersistenceError::NotFound(agent_id.to_string()))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn get_agent_by_id(&self, agent_id: &str) -> Result<AgentRecord, PersistenceError> {
        self.agent(agent_id)
            .ok_or_else(|| PersistenceError::NotFound(agent_id.to_string()))
    }

    async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<(), PersistenceError> {
        self.write(agent_id, |a| a.status = status)?;
        self.inner.lock().status_writes += 1;
        Ok(())
    }

    async fn set_agent_settings_mirror(
        &self,
        agent_id: &str,
        settings: &serde_json::Value,
    ) -> Result<(), PersistenceError> {
        self.write(agent_id, |a| a.settings = settings.clone())
    }

    async fn agent_exists(&self, agent_id: &str) -> Result<bool, PersistenceError> {
        let inner = self.inner.lock();
        Ok(inner.agents.contains_key(agent_id) && !inner.hidden.contains(agent_id))
    }

    async fn companion_service_exists(&self, service: &str) -> Result<bool, PersistenceError> {
        Ok(self.inner.lock().companions.contains(service))
    }

    async fn create_pending_agent(&self, agent_id: &str) -> Result<bool, PersistenceError> {
        let mut inner = self.inner.lock();
        if inner.agents.contains_key(agent_id) {
            return Ok(false);
        }
        inner
            .agents
            .insert(agent_id.to_string(), AgentRecord::pending(agent_id));
        Ok(true)
    }

    async fn add_tag(&self, agent_id: &str, tag: &str) -> Result<(), PersistenceError> {
        self.write(agent_id, |a| a.tags.push(tag.to_string()))
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), PersistenceError> {
        self.inner
            .lock()
            .agents
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| PersistenceError::NotFound(agent_id.to_string()))
    }
}

/// Connector that holds every attempt until released, tracking overlap.
pub struct GatedConnector {
    pub bus: MemoryBus,
    pub gate: Notify,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl GatedConnector {
    pub fn new(bus: MemoryBus) -> Self {
        Self {
            bus,
            gate: Notify::new(),
            attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for GatedConnector {
    async fn connect(&self) -> Result<Arc<dyn BusTransport>, BusError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.gate.notified().await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.bus.connect().await
    }
}

/// A connected bus that already carries the fleet command stream.
pub fn provisioned_bus() -> MemoryBus {
    let bus = MemoryBus::new();
    bus.seed_stream(crate::config::FleetConfig::default().command_stream());
    bus
}

