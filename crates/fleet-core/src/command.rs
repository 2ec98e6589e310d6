//! Per-agent commands and the envelope they travel in.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fleet_bus::SubjectPatterns;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::FleetError;
use crate::lifecycle::AgentStatus;

/// Logical command name, the middle token of the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Certificate,
    Enable,
    Disable,
    Uninstall,
    Update,
    Deploy,
    Restart,
    Power,
    RemoteAssistance,
    Printer,
    Settings,
    Report,
}

impl Command {
    /// Commands that go through the durable command stream.
    pub const DURABLE: [Command; 6] = [
        Self::Certificate,
        Self::Enable,
        Self::Disable,
        Self::Uninstall,
        Self::Update,
        Self::Deploy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Uninstall => "uninstall",
            Self::Update => "update",
            Self::Deploy => "deploy",
            Self::Restart => "restart",
            Self::Power => "power",
            Self::RemoteAssistance => "remoteassistance",
            Self::Printer => "printer",
            Self::Settings => "settings",
            Self::Report => "report",
        }
    }
}

/// How an envelope is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Accepted into the durable stream; survives the agent being offline.
    Durable,
    /// Direct answer from the agent within `timeout`.
    Request { timeout: Duration },
    /// Published from a background task; the caller never waits.
    Detached,
}

/// One instruction for one agent.
#[derive(Debug, Clone)]
pub struct DispatchEnvelope {
    /// Correlation id, only used for logging.
    pub id: Uuid,
    pub agent_id: String,
    pub command: Command,
    pub payload: Bytes,
    pub mode: DeliveryMode,
}

impl DispatchEnvelope {
    pub fn new(
        agent_id: impl Into<String>,
        command: Command,
        payload: Bytes,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            command,
            payload,
            mode,
        }
    }

    /// Durable envelope with a JSON payload.
    pub fn durable<T: Serialize>(
        agent_id: impl Into<String>,
        command: Command,
        payload: &T,
    ) -> Result<Self, FleetError> {
        Ok(Self::new(agent_id, command, encode(payload)?, DeliveryMode::Durable))
    }

    /// Request/reply envelope with a JSON payload.
    pub fn request<T: Serialize>(
        agent_id: impl Into<String>,
        command: Command,
        payload: &T,
        timeout: Duration,
    ) -> Result<Self, FleetError> {
        Ok(Self::new(
            agent_id,
            command,
            encode(payload)?,
            DeliveryMode::Request { timeout },
        ))
    }

    /// Detached envelope with a JSON payload.
    pub fn detached<T: Serialize>(
        agent_id: impl Into<String>,
        command: Command,
        payload: &T,
    ) -> Result<Self, FleetError> {
        Ok(Self::new(agent_id, command, encode(payload)?, DeliveryMode::Detached))
    }

    /// `<domain>.<command>.<agent_id>`
    pub fn subject(&self, domain: &str) -> String {
        SubjectPatterns::command(domain, self.command.name(), &self.agent_id)
    }

    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FleetError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

fn encode<T: Serialize>(payload: &T) -> Result<Bytes, FleetError> {
    Ok(Bytes::from(serde_json::to_vec(payload)?))
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Status the agent should run in. Used for enable, disable and their
/// compensations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCommand {
    pub agent_id: String,
    pub status: AgentStatus,
}

/// Subject fields for an agent certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSubject {
    pub common_name: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub organizational_unit: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub dns_names: Vec<String>,
}

impl CertificateSubject {
    pub fn for_agent(agent_id: &str) -> Self {
        Self {
            common_name: agent_id.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub agent_id: String,
    pub subject: CertificateSubject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallCommand {
    pub agent_id: String,
}

/// Update the agent to `version`, now or at `when`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub version: String,
    #[serde(default)]
    pub when: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageOperation {
    Install,
    Update,
    Uninstall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAction {
    pub package_id: String,
    pub package_name: String,
    pub operation: PackageOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Reboot,
    PowerOff,
    WakeOnLan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerCommand {
    pub action: PowerAction,
    #[serde(default)]
    pub when: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAssistance {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PrinterAction {
    SetDefault { printer: String },
    Remove { printer: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPush {
    pub agent_id: String,
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub agent_id: String,
}

/// Error field agents put in request/reply answers.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReplyStatus {
    #[serde(default)]
    pub error: Option<String>,
}

impl ReplyStatus {
    /// Application error carried by a reply, if any.
    ///
    /// Replies that are not JSON objects carry no error.
    pub(crate) fn error_in(reply: &[u8]) -> Option<String> {
        serde_json::from_slice::<ReplyStatus>(reply)
            .ok()
            .and_then(|s| s.error)
            .filter(|e| !e.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_layout() {
        let envelope = DispatchEnvelope::durable(
            "a1",
            Command::Enable,
            &StatusCommand {
                agent_id: "a1".into(),
                status: AgentStatus::Enabled,
            },
        )
        .unwrap();

        assert_eq!(envelope.subject("agent"), "agent.enable.a1");
        assert_eq!(envelope.mode, DeliveryMode::Durable);

        let decoded: StatusCommand = envelope.decode().unwrap();
        assert_eq!(decoded.status, AgentStatus::Enabled);
    }

    #[test]
    fn test_reply_error_detection() {
        assert_eq!(
            ReplyStatus::error_in(br#"{"error":"printer not found"}"#),
            Some("printer not found".to_string())
        );
        assert_eq!(ReplyStatus::error_in(br#"{"error":""}"#), None);
        assert_eq!(ReplyStatus::error_in(br#"{"ok":true}"#), None);
        assert_eq!(ReplyStatus::error_in(b"pong"), None);
        assert_eq!(ReplyStatus::error_in(b""), None);
    }

    #[test]
    fn test_printer_action_wire_shape() {
        let json = serde_json::to_value(PrinterAction::SetDefault {
            printer: "HP".into(),
        })
        .unwrap();
        assert_eq!(json["action"], "set_default");
        assert_eq!(json["printer"], "HP");
    }
}
