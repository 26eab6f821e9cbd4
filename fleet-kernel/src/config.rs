use crate::engine::{EngineConfig, SelectionConfig};
use crate::models::DEFAULT_TASK_NAME;
use crate::scoring::InvalidWeight;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_PATH_ENV: &str = "FLEET_KERNEL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "kernel.yaml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    /// `mqtt: null` runs the kernel without a broker.
    pub mqtt: Option<MqttConf>,
    pub http: HttpConf,
    pub selection: SelectionConfig,
    pub ingest: IngestConf,
    pub sink: SinkConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub metrics_topic: String,
    pub task_topic: String,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "fleet-kernel".into(),
            keep_alive_secs: 15,
            metrics_topic: "fleet/node_metrics".into(),
            task_topic: "fleet/task_assignment".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct IngestConf {
    pub admission_interval_secs: f64,
    pub latency_window: usize,
    pub throughput_window: usize,
    pub throughput_period_secs: f64,
    pub task_name: String,
}

impl Default for IngestConf {
    fn default() -> Self {
        Self {
            admission_interval_secs: 60.0,
            latency_window: 60,
            throughput_window: 60,
            throughput_period_secs: 1.0,
            task_name: DEFAULT_TASK_NAME.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SinkConf {
    /// Disabled when absent.
    pub csv_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroCapacity { field: &'static str },
    #[error("{field} must be a finite value >= {min}, got {value}")]
    OutOfRange { field: &'static str, min: f64, value: f64 },
    #[error(transparent)]
    Weight(#[from] InvalidWeight),
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mqtt: Some(MqttConf::default()),
            http: HttpConf::default(),
            selection: SelectionConfig::default(),
            ingest: IngestConf::default(),
            sink: SinkConf::default(),
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingest = &self.ingest;
        if ingest.latency_window == 0 {
            return Err(ConfigError::ZeroCapacity { field: "ingest.latency_window" });
        }
        if ingest.throughput_window == 0 {
            return Err(ConfigError::ZeroCapacity { field: "ingest.throughput_window" });
        }
        let interval = ingest.admission_interval_secs;
        if !interval.is_finite() || interval < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "ingest.admission_interval_secs",
                min: 0.0,
                value: interval,
            });
        }
        let period = ingest.throughput_period_secs;
        if !period.is_finite() || period <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "ingest.throughput_period_secs",
                min: f64::MIN_POSITIVE,
                value: period,
            });
        }
        self.selection.weights.validate()?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            selection: self.selection.clone(),
            admission_interval_secs: self.ingest.admission_interval_secs,
            latency_window: self.ingest.latency_window,
            throughput_window: self.ingest.throughput_window,
            throughput_period_secs: self.ingest.throughput_period_secs,
            task_name: self.ingest.task_name.clone(),
        }
    }
}

/// Parses YAML text; an empty document yields the defaults.
pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into())
        .into()
}

/// Loads `path`, falling back to defaults when it is missing, unreadable or
/// invalid.
pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return KernelConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config, using defaults");
            return KernelConfig::default();
        }
    };
    parse_config(&txt).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid config, using defaults");
        KernelConfig::default()
    })
}

pub async fn load_config() -> KernelConfig {
    load_config_from(&config_path()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{Criterion, Metric};

    #[test]
    fn parses_full_document() {
        let yaml = r#"
mqtt:
  host: broker.lan
  port: 1884
  metrics_topic: lab/metrics
selection:
  criterion: ALL
  weights: { CPU: 0.4, Memory: 0.2, Battery: 0.1, Load: 0.3 }
ingest:
  admission_interval_secs: 30
  latency_window: 120
sink:
  csv_path: /tmp/optimal.csv
"#;
        let cfg = parse_config(yaml).unwrap();
        let mqtt = cfg.mqtt.clone().unwrap();
        assert_eq!(mqtt.host, "broker.lan");
        assert_eq!(mqtt.port, 1884);
        assert_eq!(mqtt.metrics_topic, "lab/metrics");
        assert_eq!(mqtt.task_topic, "fleet/task_assignment");
        assert_eq!(cfg.selection.criterion, Criterion::All);
        assert_eq!(cfg.selection.weights.get(Metric::Cpu), 0.4);
        assert_eq!(cfg.ingest.admission_interval_secs, 30.0);
        assert_eq!(cfg.ingest.latency_window, 120);
        assert_eq!(cfg.ingest.throughput_window, 60);
        assert_eq!(cfg.sink.csv_path, Some(PathBuf::from("/tmp/optimal.csv")));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = parse_config("  \n").unwrap();
        assert_eq!(cfg, KernelConfig::default());
        let engine = cfg.engine_config();
        assert_eq!(engine.admission_interval_secs, 60.0);
        assert_eq!(engine.task_name, "Perform task");
        assert_eq!(engine.selection.criterion, Criterion::Single(Metric::Cpu));
    }

    #[test]
    fn null_mqtt_disables_broker() {
        let cfg = parse_config("mqtt: null\nhttp: { bind: \"127.0.0.1:9000\" }").unwrap();
        assert!(cfg.mqtt.is_none());
        assert_eq!(cfg.http.bind, "127.0.0.1:9000");
    }

    #[test]
    fn unknown_criterion_is_a_parse_error() {
        assert!(parse_config("selection: { criterion: GPU }").is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = KernelConfig::default();
        cfg.ingest.latency_window = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroCapacity { field: "ingest.latency_window" })
        );

        let mut cfg = KernelConfig::default();
        cfg.ingest.throughput_period_secs = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::OutOfRange { .. })));

        let mut cfg = KernelConfig::default();
        cfg.selection.weights = cfg.selection.weights.clone().with(Metric::Cpu, -1.0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Weight(_))));
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.yaml")).await;
        assert_eq!(cfg, KernelConfig::default());
    }

    #[tokio::test]
    async fn unreadable_path_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        // exists, but a directory cannot be read as text
        let cfg = load_config_from(dir.path()).await;
        assert_eq!(cfg, KernelConfig::default());
    }

    #[tokio::test]
    async fn file_on_disk_is_parsed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fleet.yaml");
        std::fs::write(&path, "ingest: { admission_interval_secs: 5 }").unwrap();
        let cfg = load_config_from(&path).await;
        assert_eq!(cfg.ingest.admission_interval_secs, 5.0);
    }
}
