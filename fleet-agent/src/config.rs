//! Agent configuration, read from a TOML file.
//!
//! Every section and field has a default, so a missing file or a partial one
//! still yields a usable agent.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "FLEET_AGENT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "fleet-agent.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mqtt: MqttConfig,
    pub agent: AgentInfo,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// Defaults to `fleet-agent-<node_id>`.
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub metrics_topic: String,
    pub task_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            metrics_topic: "fleet/node_metrics".to_string(),
            task_topic: "fleet/task_assignment".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInfo {
    pub node_id: String,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self { node_id: local_hostname() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub report_interval_secs: u64,
    /// Window over which CPU usage is measured.
    pub cpu_sample_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
            cpu_sample_ms: 1000,
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-node".to_string())
}

impl AgentConfig {
    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("fleet-agent-{}", self.agent.node_id))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid agent configuration")
    }

    pub fn config_file_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
            .into()
    }

    /// Loads `path`; a missing file yields the defaults, an unreadable or
    /// invalid one is an error.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no agent config file, using defaults");
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::parse(&content)
    }

    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()).await
    }
}
