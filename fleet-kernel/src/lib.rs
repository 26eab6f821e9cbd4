//! Fleet kernel: ingests node metric reports, keeps a registry of the
//! latest report per node and selects the best node under the active
//! criterion. The binary wires it to MQTT and a small HTTP API.

pub mod config;
pub mod engine;
pub mod health;
pub mod http;
pub mod logging;
pub mod models;
pub mod mqtt;
pub mod ports;
pub mod registry;
pub mod scoring;
pub mod tracker;
pub mod window;

pub use engine::{Engine, EngineConfig, IngestError, IngestOutcome, SelectionConfig};
pub use models::{BestNodeState, MetricReport, OptimalRecord, TaskAssignment};
pub use scoring::{Criterion, Metric, ScoreWeights};
