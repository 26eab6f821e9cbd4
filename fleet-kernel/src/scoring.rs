//! Fitness scoring for node reports.
//!
//! A score is a normalized metric multiplied by its weight. The LOWEST score
//! wins. CPU, memory and load are normalized with `1 / (1 + value)`, so a
//! busier node gets a smaller score and is favored under those criteria,
//! while under `Battery` the node with the least charge is favored. Callers
//! downstream rely on this ordering; it is kept as is.

use crate::models::MetricReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Weight applied to a metric missing from the weight map.
pub const DEFAULT_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    Cpu,
    Memory,
    Battery,
    Load,
}

impl Metric {
    /// Order used when averaging for [`Criterion::All`].
    pub const ALL: [Metric; 4] = [Metric::Cpu, Metric::Memory, Metric::Battery, Metric::Load];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Cpu => "CPU",
            Metric::Memory => "Memory",
            Metric::Battery => "Battery",
            Metric::Load => "Load",
        }
    }

    /// Raw field of the report this metric reads.
    pub fn value(self, report: &MetricReport) -> f64 {
        match self {
            Metric::Cpu => report.cpu_load(),
            Metric::Memory => report.memory_usage(),
            Metric::Battery => report.battery_level(),
            Metric::Load => report.load_avg(),
        }
    }

    pub fn normalize(self, value: f64) -> f64 {
        match self {
            Metric::Cpu | Metric::Memory | Metric::Load => 1.0 / (1.0 + value),
            Metric::Battery => value / 100.0,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown selection criterion '{0}' (expected CPU, Memory, Battery, Load or ALL)")]
pub struct ParseCriterionError(pub String);

impl FromStr for Metric {
    type Err = ParseCriterionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" | "1" => Ok(Metric::Cpu),
            "memory" | "2" => Ok(Metric::Memory),
            "battery" | "3" => Ok(Metric::Battery),
            "load" | "4" => Ok(Metric::Load),
            _ => Err(ParseCriterionError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Metric {
    type Error = ParseCriterionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Metric> for String {
    fn from(metric: Metric) -> Self {
        metric.name().to_string()
    }
}

/// What the engine optimizes for. Lower score wins, see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Criterion {
    Single(Metric),
    /// Mean of the four weighted per-metric scores.
    All,
}

impl Default for Criterion {
    fn default() -> Self {
        Criterion::Single(Metric::Cpu)
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Single(metric) => fmt::Display::fmt(metric, f),
            Criterion::All => f.write_str("ALL"),
        }
    }
}

impl FromStr for Criterion {
    type Err = ParseCriterionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "5" => Ok(Criterion::All),
            _ => s.parse().map(Criterion::Single),
        }
    }
}

impl TryFrom<String> for Criterion {
    type Error = ParseCriterionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Criterion> for String {
    fn from(criterion: Criterion) -> Self {
        criterion.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("weight for {metric} must be finite and non-negative, got {value}")]
pub struct InvalidWeight {
    pub metric: Metric,
    pub value: f64,
}

/// Per-metric weights. Metrics without an entry weigh [`DEFAULT_WEIGHT`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreWeights(BTreeMap<Metric, f64>);

impl ScoreWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same weight for all four metrics.
    pub fn uniform(weight: f64) -> Self {
        Metric::ALL.iter().map(|m| (*m, weight)).collect()
    }

    pub fn with(mut self, metric: Metric, weight: f64) -> Self {
        self.0.insert(metric, weight);
        self
    }

    pub fn get(&self, metric: Metric) -> f64 {
        self.0.get(&metric).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn validate(&self) -> Result<(), InvalidWeight> {
        for (metric, value) in &self.0 {
            if !value.is_finite() || *value < 0.0 {
                return Err(InvalidWeight { metric: *metric, value: *value });
            }
        }
        Ok(())
    }
}

impl FromIterator<(Metric, f64)> for ScoreWeights {
    fn from_iter<I: IntoIterator<Item = (Metric, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Weighted, normalized contribution of one metric.
pub fn metric_score(report: &MetricReport, metric: Metric, weights: &ScoreWeights) -> f64 {
    metric.normalize(metric.value(report)) * weights.get(metric)
}

pub fn score(report: &MetricReport, criterion: Criterion, weights: &ScoreWeights) -> f64 {
    match criterion {
        Criterion::Single(metric) => metric_score(report, metric, weights),
        Criterion::All => {
            let total: f64 = Metric::ALL
                .iter()
                .map(|metric| metric_score(report, *metric, weights))
                .sum();
            total / Metric::ALL.len() as f64
        }
    }
}
