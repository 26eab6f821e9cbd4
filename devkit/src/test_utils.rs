/*!
Scenario harness for the fleet engine.

Drives an [`Engine`] on a manual clock with recording ports wired in, so a
test reads as a timeline of reports and expectations.
*/

use crate::mqtt_stub::{FailingDispatcher, RecordingDispatcher};
use crate::report_builder::ReportBuilder;
use crate::sink_stub::{FailingSink, MemorySink};
use anyhow::{bail, Result};
use fleet_kernel::engine::Diagnostics;
use fleet_kernel::mqtt::decode_report;
use fleet_kernel::{
    Criterion, Engine, EngineConfig, IngestError, IngestOutcome, MetricReport, ScoreWeights,
    SelectionConfig, TaskAssignment,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub struct TestHarness {
    pub engine: Arc<Engine>,
    dispatcher: Arc<FailingDispatcher>,
    sink: Arc<FailingSink>,
    clock: f64,
}

impl TestHarness {
    /// Engine with default settings, clock and throughput anchor at t=0.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_selection(criterion: Criterion, weights: ScoreWeights) -> Self {
        Self::with_config(EngineConfig {
            selection: SelectionConfig { criterion, weights },
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();

        let dispatcher = Arc::new(FailingDispatcher::new(Arc::new(RecordingDispatcher::default())));
        dispatcher.set_failing(false);
        let sink = Arc::new(FailingSink::new(Arc::new(MemorySink::new())));
        sink.set_failing(false);

        let engine = Engine::new(config, dispatcher.clone())
            .with_sink(sink.clone())
            .started_at(0.0);

        Self {
            engine: Arc::new(engine),
            dispatcher,
            sink,
            clock: 0.0,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock
    }

    pub fn set_clock(&mut self, t: f64) -> &mut Self {
        self.clock = t;
        self
    }

    pub fn advance(&mut self, secs: f64) -> &mut Self {
        self.clock += secs;
        self
    }

    /// Builder for a report sampled at the current clock.
    pub fn report(&self, node_id: &str) -> ReportBuilder {
        ReportBuilder::new(node_id).at(self.clock)
    }

    pub fn send(&self, report: MetricReport) -> Result<IngestOutcome, IngestError> {
        self.engine.ingest_at(report, self.clock)
    }

    pub fn send_built(&self, builder: &ReportBuilder) -> Result<IngestOutcome, IngestError> {
        self.send(builder.build())
    }

    /// Decodes a raw payload like the MQTT listener does and ingests it at
    /// the current clock.
    pub fn send_payload(&self, payload: &[u8]) -> Result<IngestOutcome> {
        let report = decode_report(payload)?;
        Ok(self.send(report)?)
    }

    pub fn fail_dispatch(&self, failing: bool) {
        self.dispatcher.set_failing(failing);
    }

    pub fn fail_sink(&self, failing: bool) {
        self.sink.set_failing(failing);
    }

    pub fn assignments(&self) -> Vec<TaskAssignment> {
        self.dispatcher.recorder().assignments()
    }

    pub fn dispatcher(&self) -> &RecordingDispatcher {
        self.dispatcher.recorder()
    }

    pub fn sink(&self) -> &MemorySink {
        self.sink.memory()
    }

    pub fn best_node_id(&self) -> Option<String> {
        self.engine.best_node().node_id
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.engine.diagnostics()
    }

    pub fn expect_best(&self, node_id: &str) -> Result<()> {
        match self.best_node_id() {
            Some(actual) if actual == node_id => Ok(()),
            other => bail!("expected best node {node_id}, got {other:?}"),
        }
    }

    pub fn expect_score(&self, expected: f64, tolerance: f64) -> Result<()> {
        let actual = self.engine.best_node().score;
        if (actual - expected).abs() > tolerance {
            bail!("expected best score {expected} (±{tolerance}), got {actual}");
        }
        Ok(())
    }

    /// Checks that exactly `count` assignments went out, all to `node_id`.
    pub fn expect_assignments_to(&self, node_id: &str, count: usize) -> Result<()> {
        let assignments = self.assignments();
        if assignments.len() != count {
            bail!("expected {count} assignments, got {}", assignments.len());
        }
        if let Some(other) = assignments.iter().find(|a| a.node_id != node_id) {
            bail!("assignment sent to {} instead of {node_id}", other.node_id);
        }
        info!(node_id, count, "assignments verified");
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("FLEET_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
