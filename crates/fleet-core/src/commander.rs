//! Administrative command surface.
//!
//! Every operation validates against the stored record, dispatches first and
//! persists after. Status changes go through the settlement coordinator so a
//! failed write is answered with a compensating command.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fleet_bus::Connector;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::command::{
    AgentRef, CertificateRequest, CertificateSubject, Command, DispatchEnvelope, PackageAction,
    PowerAction, PowerCommand, PrinterAction, RemoteAssistance, SettingsPush, StatusCommand,
    UninstallCommand, UpdateRequest,
};
use crate::config::FleetConfig;
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::error::{FleetError, FleetResult};
use crate::health::HealthProbe;
use crate::lifecycle::{AgentStatus, LifecycleAction, Transition};
use crate::settlement::{LocalMutation, SettlementCoordinator, SettlementPlan};
use crate::store::AgentStore;
use crate::supervisor::{BusSupervisor, Supervision};

/// Entry point for the web layer.
pub struct FleetCommander {
    config: FleetConfig,
    store: Arc<dyn AgentStore>,
    supervisor: Arc<BusSupervisor>,
    dispatcher: Dispatcher,
    settlement: SettlementCoordinator,
    health: HealthProbe,
}

impl FleetCommander {
    pub fn new(
        config: FleetConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn AgentStore>,
    ) -> Self {
        let supervisor = Arc::new(BusSupervisor::new(connector, store.clone(), config.clone()));
        Self::with_supervisor(config, supervisor, store)
    }

    pub fn with_supervisor(
        config: FleetConfig,
        supervisor: Arc<BusSupervisor>,
        store: Arc<dyn AgentStore>,
    ) -> Self {
        let dispatcher = Dispatcher::new(supervisor.clone(), config.dispatch.domain.clone());
        let settlement = SettlementCoordinator::new(store.clone(), dispatcher.clone());
        let health = HealthProbe::new(supervisor.session().clone());

        Self {
            config,
            store,
            supervisor,
            dispatcher,
            settlement,
            health,
        }
    }

    pub fn supervisor(&self) -> &Arc<BusSupervisor> {
        &self.supervisor
    }

    /// Start keeping the bus alive. Returns without waiting for a connection.
    pub fn start(&self) -> FleetResult<Supervision> {
        self.supervisor.ensure_supervised()
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Admit a waiting agent: certificate, enable, persist, tag.
    pub async fn admit_agent(&self, agent_id: &str) -> FleetResult<()> {
        let record = self.store.get_agent_by_id(agent_id).await?;
        let transition = Transition::plan(agent_id, record.status, LifecycleAction::Admit)?;

        self.dispatcher
            .dispatch(DispatchEnvelope::durable(
                agent_id,
                Command::Certificate,
                &CertificateRequest {
                    agent_id: agent_id.to_string(),
                    subject: CertificateSubject::for_agent(agent_id),
                },
            )?)
            .await?;

        let enabled = self
            .dispatcher
            .dispatch(status_envelope(agent_id, transition.to)?)
            .await?;

        // Compensation sends the agent back to pre-admission
        let compensation = DispatchEnvelope::durable(
            agent_id,
            Command::Disable,
            &StatusCommand {
                agent_id: agent_id.to_string(),
                status: transition.from,
            },
        )?;
        self.settle_status(enabled, &transition, agent_id, compensation)
            .await?;

        if let Some(tag) = &self.config.admission.default_tag {
            if let Err(e) = self.store.add_tag(agent_id, tag).await {
                warn!(agent_id = %agent_id, tag = %tag, error = %e, "Could not apply admission tag");
            }
        }

        info!(agent_id = %agent_id, "Agent admitted");
        Ok(())
    }

    pub async fn enable_agent(&self, agent_id: &str) -> FleetResult<()> {
        self.change_status(agent_id, LifecycleAction::Enable).await
    }

    pub async fn disable_agent(&self, agent_id: &str) -> FleetResult<()> {
        self.change_status(agent_id, LifecycleAction::Disable).await
    }

    async fn change_status(&self, agent_id: &str, action: LifecycleAction) -> FleetResult<()> {
        let record = self.store.get_agent_by_id(agent_id).await?;
        let transition = Transition::plan(agent_id, record.status, action)?;

        let dispatched = self
            .dispatcher
            .dispatch(status_envelope(agent_id, transition.to)?)
            .await?;

        let compensation = status_envelope(agent_id, transition.from)?;
        self.settle_status(dispatched, &transition, agent_id, compensation)
            .await?;

        info!(agent_id = %agent_id, from = %transition.from, to = %transition.to, "Agent status changed");
        Ok(())
    }

    async fn settle_status(
        &self,
        dispatched: Dispatched,
        transition: &Transition,
        agent_id: &str,
        compensation: DispatchEnvelope,
    ) -> FleetResult<()> {
        let plan = SettlementPlan::new(
            dispatched,
            LocalMutation::SetStatus {
                agent_id: agent_id.to_string(),
                status: transition.to,
            },
            compensation,
        );
        self.settlement.settle(plan).await
    }

    /// Tell the agent to uninstall itself, then delete its record.
    ///
    /// The record is deleted even when the agent cannot be reached.
    pub async fn uninstall_agent(&self, agent_id: &str) -> FleetResult<()> {
        let envelope = DispatchEnvelope::durable(
            agent_id,
            Command::Uninstall,
            &UninstallCommand {
                agent_id: agent_id.to_string(),
            },
        )?;
        if let Err(e) = self.dispatcher.dispatch(envelope).await {
            warn!(agent_id = %agent_id, error = %e, "Uninstall not delivered, removing record anyway");
        }

        self.store.delete_agent(agent_id).await?;
        info!(agent_id = %agent_id, "Agent removed");
        Ok(())
    }

    /// Record first contact from an agent. Unknown agents start waiting for
    /// admission unless auto-admission is on.
    ///
    /// Only the contact whose insert created the record admits it, so
    /// concurrent first contacts admit once.
    pub async fn register_contact(&self, agent_id: &str) -> FleetResult<AgentStatus> {
        if self.store.agent_exists(agent_id).await?
            || !self.store.create_pending_agent(agent_id).await?
        {
            return Ok(self.store.get_agent_by_id(agent_id).await?.status);
        }

        info!(agent_id = %agent_id, "New agent waiting for admission");

        if !self.config.admission.auto_admit {
            return Ok(AgentStatus::initial());
        }

        self.admit_agent(agent_id).await?;
        Ok(AgentStatus::Enabled)
    }

    // ========================================================================
    // BULK
    // ========================================================================

    pub async fn admit_agents(&self, agent_ids: &[String]) -> FleetResult<()> {
        let results = join_all(agent_ids.iter().map(|id| self.admit_agent(id))).await;
        batch_outcome(agent_ids, results)
    }

    pub async fn enable_agents(&self, agent_ids: &[String]) -> FleetResult<()> {
        let results = join_all(agent_ids.iter().map(|id| self.enable_agent(id))).await;
        batch_outcome(agent_ids, results)
    }

    pub async fn disable_agents(&self, agent_ids: &[String]) -> FleetResult<()> {
        let results = join_all(agent_ids.iter().map(|id| self.disable_agent(id))).await;
        batch_outcome(agent_ids, results)
    }

    // ========================================================================
    // CONFIGURATION & MAINTENANCE
    // ========================================================================

    /// Push settings to a connected agent and mirror them locally.
    pub async fn push_settings(&self, agent_id: &str, settings: serde_json::Value) -> FleetResult<()> {
        let record = self.store.get_agent_by_id(agent_id).await?;
        let timeout = self.config.request_timeout();

        let dispatched = self
            .dispatcher
            .dispatch(DispatchEnvelope::request(
                agent_id,
                Command::Settings,
                &SettingsPush {
                    agent_id: agent_id.to_string(),
                    settings: settings.clone(),
                },
                timeout,
            )?)
            .await?;

        let compensation = DispatchEnvelope::request(
            agent_id,
            Command::Settings,
            &SettingsPush {
                agent_id: agent_id.to_string(),
                settings: record.settings,
            },
            timeout,
        )?;
        let plan = SettlementPlan::new(
            dispatched,
            LocalMutation::SetSettings {
                agent_id: agent_id.to_string(),
                settings,
            },
            compensation,
        );
        self.settlement.settle(plan).await
    }

    pub async fn request_certificate(
        &self,
        agent_id: &str,
        subject: CertificateSubject,
    ) -> FleetResult<()> {
        let envelope = DispatchEnvelope::durable(
            agent_id,
            Command::Certificate,
            &CertificateRequest {
                agent_id: agent_id.to_string(),
                subject,
            },
        )?;
        self.dispatcher.dispatch(envelope).await?;
        Ok(())
    }

    pub async fn update_agent(&self, agent_id: &str, update: UpdateRequest) -> FleetResult<()> {
        let envelope = DispatchEnvelope::durable(agent_id, Command::Update, &update)?;
        self.dispatcher.dispatch(envelope).await?;
        info!(agent_id = %agent_id, version = %update.version, "Update scheduled");
        Ok(())
    }

    pub async fn deploy_package(&self, agent_id: &str, package: PackageAction) -> FleetResult<()> {
        let envelope = DispatchEnvelope::durable(agent_id, Command::Deploy, &package)?;
        self.dispatcher.dispatch(envelope).await?;
        Ok(())
    }

    // ========================================================================
    // LIVE ACTIONS
    // ========================================================================

    pub async fn send_power_action(
        &self,
        agent_id: &str,
        action: PowerAction,
        when: Option<DateTime<Utc>>,
    ) -> FleetResult<()> {
        self.request(agent_id, Command::Power, &PowerCommand { action, when })
            .await
            .map(drop)
    }

    pub async fn restart_agent(&self, agent_id: &str) -> FleetResult<()> {
        let target = AgentRef {
            agent_id: agent_id.to_string(),
        };
        self.request(agent_id, Command::Restart, &target)
            .await
            .map(drop)
    }

    /// Start or stop a remote assistance session. Returns the agent's reply.
    pub async fn remote_assistance(
        &self,
        agent_id: &str,
        action: RemoteAssistance,
    ) -> FleetResult<Bytes> {
        self.request(agent_id, Command::RemoteAssistance, &action)
            .await
    }

    pub async fn manage_printer(&self, agent_id: &str, action: PrinterAction) -> FleetResult<()> {
        self.request(agent_id, Command::Printer, &action)
            .await
            .map(drop)
    }

    /// Ask the agent for a fresh report without waiting for it.
    pub async fn force_report(&self, agent_id: &str) -> FleetResult<()> {
        let envelope = DispatchEnvelope::detached(
            agent_id,
            Command::Report,
            &AgentRef {
                agent_id: agent_id.to_string(),
            },
        )?;
        self.dispatcher.dispatch(envelope).await?;
        Ok(())
    }

    async fn request<T: serde::Serialize>(
        &self,
        agent_id: &str,
        command: Command,
        payload: &T,
    ) -> FleetResult<Bytes> {
        let envelope =
            DispatchEnvelope::request(agent_id, command, payload, self.config.request_timeout())?;
        let dispatched = self.dispatcher.dispatch(envelope).await?;
        Ok(dispatched.reply().cloned().unwrap_or_default())
    }

    // ========================================================================
    // HEALTH
    // ========================================================================

    /// Liveness of the configured companion workers.
    pub async fn probe_workers(&self) -> HashMap<String, bool> {
        self.health
            .probe_all(&self.config.health.workers, self.config.probe_timeout())
            .await
    }
}

/// Durable command putting the agent in `status`.
fn status_envelope(agent_id: &str, status: AgentStatus) -> FleetResult<DispatchEnvelope> {
    let command = match status {
        AgentStatus::Enabled => Command::Enable,
        AgentStatus::Disabled | AgentStatus::WaitingForAdmission => Command::Disable,
    };
    DispatchEnvelope::durable(
        agent_id,
        command,
        &StatusCommand {
            agent_id: agent_id.to_string(),
            status,
        },
    )
}

fn batch_outcome(agent_ids: &[String], results: Vec<FleetResult<()>>) -> FleetResult<()> {
    let failures: Vec<(String, FleetError)> = agent_ids
        .iter()
        .zip(results)
        .filter_map(|(id, result)| result.err().map(|e| (id.clone(), e)))
        .collect();

    if failures.is_empty() {
        return Ok(());
    }
    for (agent_id, error) in &failures {
        warn!(agent_id = %agent_id, error = %error, "Batch member failed");
    }

    if failures.len() == agent_ids.len() {
        Err(FleetError::BatchFailed { failures })
    } else {
        Err(FleetError::PartialBatchFailure {
            total: agent_ids.len(),
            failures,
        })
    }
}
