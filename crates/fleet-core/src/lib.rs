//! # fleet-core
//!
//! Command and lifecycle orchestration for a fleet of remote agents.
//!
//! An administrative decision becomes one bus message per agent, delivered
//! durably or by request/reply. Local state is written only after the bus
//! accepted the message, and a failed write is answered with a compensating
//! message. A single supervisor keeps the bus session alive in the
//! background so request handlers never wait on reconnection.
//!
//! ```text
//!  FleetCommander ──▶ Dispatcher ──▶ SessionHandle ◀── BusSupervisor
//!        │                 ▲                              │
//!        ▼                 │                              ▼
//!  SettlementCoordinator ──┘                      StreamProvisioner
//!        │
//!        ▼
//!    AgentStore
//! ```

mod command;
mod commander;
mod config;
mod dispatcher;
mod error;
mod health;
mod lifecycle;
mod provisioner;
mod settlement;
mod store;
mod supervisor;

#[cfg(test)]
mod test_support;

pub use command::{
    AgentRef, CertificateRequest, CertificateSubject, Command, DeliveryMode, DispatchEnvelope,
    PackageAction, PackageOperation, PowerAction, PowerCommand, PrinterAction, RemoteAssistance,
    SettingsPush, StatusCommand, UninstallCommand, UpdateRequest,
};
pub use commander::FleetCommander;
pub use config::{
    AdmissionConfig, BusConfig, DispatchConfig, FleetConfig, HealthConfig, StreamsConfig,
};
pub use dispatcher::{Dispatched, Dispatcher, Receipt};
pub use error::{ErrorKind, FleetError, FleetResult, PersistenceError};
pub use health::HealthProbe;
pub use lifecycle::{AgentStatus, LifecycleAction, Transition};
pub use provisioner::{ProvisionOutcome, StreamProvisioner};
pub use settlement::{LocalMutation, SettlementCoordinator, SettlementPlan};
pub use store::{AgentRecord, AgentStore};
pub use supervisor::{BusSupervisor, SupervisorState, Supervision};
