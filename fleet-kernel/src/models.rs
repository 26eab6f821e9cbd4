use serde::{Deserialize, Serialize};

/// Task name sent with every assignment unless configured otherwise.
pub const DEFAULT_TASK_NAME: &str = "Perform task";

/// One observation from one node, as published on the metrics topic.
///
/// Fields are private so a report cannot change once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    cpu_load: f64,
    memory_usage: f64,
    battery_level: f64,
    load_avg: f64,
    node_id: String,
    /// Sampling time on the node, seconds since the Unix epoch.
    timestamp: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReportError {
    #[error("empty node_id")]
    EmptyNodeId,
    #[error("field {field} must be a finite non-negative number, got {value}")]
    InvalidValue { field: &'static str, value: f64 },
    #[error("battery_level must be within [0, 100], got {0}")]
    BatteryOutOfRange(f64),
}

impl MetricReport {
    pub fn new(
        node_id: impl Into<String>,
        cpu_load: f64,
        memory_usage: f64,
        battery_level: f64,
        load_avg: f64,
        timestamp: f64,
    ) -> Self {
        Self {
            cpu_load,
            memory_usage,
            battery_level,
            load_avg,
            node_id: node_id.into(),
            timestamp,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn cpu_load(&self) -> f64 {
        self.cpu_load
    }

    pub fn memory_usage(&self) -> f64 {
        self.memory_usage
    }

    pub fn battery_level(&self) -> f64 {
        self.battery_level
    }

    pub fn load_avg(&self) -> f64 {
        self.load_avg
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Checks the value ranges a well-formed report must respect.
    /// Called at the decoding boundary, the engine itself trusts its input.
    pub fn validate(&self) -> Result<(), ReportError> {
        if self.node_id.trim().is_empty() {
            return Err(ReportError::EmptyNodeId);
        }
        let fields = [
            ("cpu_load", self.cpu_load),
            ("memory_usage", self.memory_usage),
            ("battery_level", self.battery_level),
            ("load_avg", self.load_avg),
            ("timestamp", self.timestamp),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ReportError::InvalidValue { field, value });
            }
        }
        if self.battery_level > 100.0 {
            return Err(ReportError::BatteryOutOfRange(self.battery_level));
        }
        Ok(())
    }
}

/// Outbound directive published on the task topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task: String,
    pub node_id: String,
}

impl TaskAssignment {
    pub fn new(task: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            node_id: node_id.into(),
        }
    }
}

/// Current global optimum. `score` is `+inf` until a node has been selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestNodeState {
    pub node_id: Option<String>,
    pub score: f64,
    /// Engine time of the last recomputation, seconds since the Unix epoch.
    pub last_updated: Option<f64>,
}

impl Default for BestNodeState {
    fn default() -> Self {
        Self {
            node_id: None,
            score: f64::INFINITY,
            last_updated: None,
        }
    }
}

/// Row appended to the persistence sink on every best-node update.
/// Field order is the on-disk column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalRecord {
    pub node_id: String,
    pub score: f64,
    pub cpu_load: f64,
    pub memory_usage: f64,
    pub battery_level: f64,
    pub load_avg: f64,
}

impl OptimalRecord {
    pub fn from_report(report: &MetricReport, score: f64) -> Self {
        Self {
            node_id: report.node_id().to_string(),
            score,
            cpu_load: report.cpu_load(),
            memory_usage: report.memory_usage(),
            battery_level: report.battery_level(),
            load_avg: report.load_avg(),
        }
    }
}
