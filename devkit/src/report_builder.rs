/*!
Builder for metric reports, with neutral defaults so tests only spell out
the metric they care about.
*/

use fleet_kernel::MetricReport;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    node_id: String,
    cpu_load: f64,
    memory_usage: f64,
    battery_level: f64,
    load_avg: f64,
    timestamp: f64,
}

impl ReportBuilder {
    /// Idle node at t=0: no CPU, memory or load, full battery.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            cpu_load: 0.0,
            memory_usage: 0.0,
            battery_level: 100.0,
            load_avg: 0.0,
            timestamp: 0.0,
        }
    }

    pub fn cpu(mut self, value: f64) -> Self {
        self.cpu_load = value;
        self
    }

    pub fn memory(mut self, value: f64) -> Self {
        self.memory_usage = value;
        self
    }

    pub fn battery(mut self, value: f64) -> Self {
        self.battery_level = value;
        self
    }

    pub fn load(mut self, value: f64) -> Self {
        self.load_avg = value;
        self
    }

    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn build(&self) -> MetricReport {
        MetricReport::new(
            self.node_id.as_str(),
            self.cpu_load,
            self.memory_usage,
            self.battery_level,
            self.load_avg,
            self.timestamp,
        )
    }

    /// The report as an agent would publish it.
    pub fn json(&self) -> Value {
        json!({
            "cpu_load": self.cpu_load,
            "memory_usage": self.memory_usage,
            "battery_level": self.battery_level,
            "load_avg": self.load_avg,
            "node_id": self.node_id,
            "timestamp": self.timestamp,
        })
    }

    pub fn payload(&self) -> Vec<u8> {
        self.json().to_string().into_bytes()
    }
}
