//! Fleet orchestration configuration.

use fleet_bus::{NatsConfig, NatsTls, StreamConfig, StreamRetention, SubjectPatterns};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::command::Command;

/// Main fleet configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Bus connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Delay between reconnection attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    pub tls: Option<NatsTls>,
}

fn default_servers() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

fn default_client_name() -> String {
    "fleet-console".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_reconnect_interval() -> u64 {
    120
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            client_name: default_client_name(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_interval_secs: default_reconnect_interval(),
            tls: None,
        }
    }
}

/// Durable stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsConfig {
    #[serde(default = "default_command_stream")]
    pub command_stream: String,
    /// Companion stream owned by another service, if any
    #[serde(default = "default_companion_stream")]
    pub companion_stream: Option<String>,
    /// Service whose registration makes the companion stream mandatory
    #[serde(default = "default_companion_service")]
    pub companion_service: String,
}

fn default_command_stream() -> String {
    "AGENTS_STREAM".to_string()
}

fn default_companion_stream() -> Option<String> {
    Some("SERVERS_STREAM".to_string())
}

fn default_companion_service() -> String {
    "server-updater".to_string()
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            command_stream: default_command_stream(),
            companion_stream: default_companion_stream(),
            companion_service: default_companion_service(),
        }
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// First subject token of every agent command
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_domain() -> String {
    fleet_bus::AGENT_DOMAIN.to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Worker health probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: Vec<String>,
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_workers() -> Vec<String> {
    ["agentworker", "notificationworker", "certmanagerworker"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout(),
            workers: default_workers(),
        }
    }
}

/// Admission configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdmissionConfig {
    /// Admit unknown agents on first contact
    #[serde(default)]
    pub auto_admit: bool,
    /// Tag applied to agents when they are admitted
    #[serde(default)]
    pub default_tag: Option<String>,
}

impl FleetConfig {
    /// Build from `FLEET_*` environment variables, defaulting anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(servers) = std::env::var("FLEET_NATS_SERVERS") {
            let servers: Vec<String> = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !servers.is_empty() {
                config.bus.servers = servers;
            }
        }
        if let Ok(name) = std::env::var("FLEET_NATS_CLIENT_NAME") {
            config.bus.client_name = name;
        }
        if let (Ok(cert), Ok(key)) = (
            std::env::var("FLEET_NATS_CERT"),
            std::env::var("FLEET_NATS_KEY"),
        ) {
            config.bus.tls = Some(NatsTls {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
                ca: std::env::var("FLEET_NATS_CA").ok().map(PathBuf::from),
            });
        }
        if let Some(secs) = env_parse("FLEET_RECONNECT_SECS") {
            config.bus.reconnect_interval_secs = secs;
        }
        if let Some(secs) = env_parse("FLEET_REQUEST_TIMEOUT_SECS") {
            config.dispatch.request_timeout_secs = secs;
        }
        if let Some(auto_admit) = env_parse("FLEET_AUTO_ADMIT") {
            config.admission.auto_admit = auto_admit;
        }
        if let Ok(tag) = std::env::var("FLEET_DEFAULT_TAG") {
            config.admission.default_tag = Some(tag).filter(|t| !t.is_empty());
        }

        config
    }

    /// Connection settings for the NATS connector.
    pub fn nats(&self) -> NatsConfig {
        let mut nats = NatsConfig::default()
            .with_urls(self.bus.servers.clone())
            .with_name(self.bus.client_name.clone());
        nats.connect_timeout = Duration::from_secs(self.bus.connect_timeout_secs);
        nats.request_timeout = self.request_timeout();
        if let Some(tls) = &self.bus.tls {
            nats = nats.with_tls(tls.clone());
        }
        nats
    }

    /// Declaration of the fleet command stream.
    pub fn command_stream(&self) -> StreamConfig {
        let subjects = Command::DURABLE
            .iter()
            .map(|c| SubjectPatterns::all_agents(&self.dispatch.domain, c.name()))
            .collect();

        StreamConfig::new(&self.streams.command_stream)
            .subjects(subjects)
            .retention(StreamRetention::Interest)
            .replicas_for_nodes(self.bus.servers.len())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.bus.reconnect_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health.probe_timeout_ms)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
