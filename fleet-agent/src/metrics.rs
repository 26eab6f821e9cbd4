//! Local metric sampling.
//!
//! - CPU: global usage in percent, measured between two refreshes
//! - Memory: used / total in percent
//! - Battery: charge percent from [`crate::battery`], full when there is none
//! - Load: 1-minute load average (0 where the platform has none)

use crate::battery;
use chrono::Utc;
use fleet_kernel::MetricReport;
use std::time::Duration;
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

pub const FULL_BATTERY: f64 = 100.0;

pub struct MetricsSampler {
    sys: System,
    node_id: String,
    cpu_window: Duration,
}

impl MetricsSampler {
    pub fn new(node_id: impl Into<String>, cpu_window: Duration) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        Self {
            sys,
            node_id: node_id.into(),
            cpu_window: cpu_window.max(MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    /// Takes one sample. Waits for the CPU window before reading usage.
    pub async fn sample(&mut self) -> MetricReport {
        self.sys.refresh_cpu();
        tokio::time::sleep(self.cpu_window).await;
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        let cpu_load = f64::from(self.sys.global_cpu_info().cpu_usage());
        let memory_usage = memory_percent(self.sys.used_memory(), self.sys.total_memory());
        let load_avg = System::load_average().one;
        let battery_level = battery::detect_battery();

        let report = build_report(
            &self.node_id,
            cpu_load,
            memory_usage,
            battery_level,
            load_avg,
            unix_timestamp(),
        );
        debug!(?report, "metrics sampled");
        report
    }
}

pub fn memory_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64 * 100.0
}

/// Clamps readings into the ranges the kernel accepts. A machine without a
/// battery reports [`FULL_BATTERY`].
pub fn build_report(
    node_id: &str,
    cpu_load: f64,
    memory_usage: f64,
    battery_level: Option<f64>,
    load_avg: f64,
    timestamp: f64,
) -> MetricReport {
    let non_negative = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };
    let battery = battery_level
        .filter(|v| v.is_finite())
        .map_or(FULL_BATTERY, |v| v.clamp(0.0, FULL_BATTERY));
    MetricReport::new(
        node_id,
        non_negative(cpu_load),
        non_negative(memory_usage),
        battery,
        non_negative(load_avg),
        timestamp,
    )
}

pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
