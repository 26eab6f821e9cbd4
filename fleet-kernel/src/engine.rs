//! Ingestion controller: the only place where node state changes.
//!
//! Registry, windows, best node, counters and selection settings live in one
//! [`Mutex`] so that admission, snapshot update and recomputation of a report
//! never interleave with another report. Dispatch and persistence run inside
//! the same critical section, which keeps per-node dispatch order equal to
//! acceptance order. Pause is a flag checked before taking the lock and again
//! once it is held.

use crate::models::{BestNodeState, MetricReport, TaskAssignment, DEFAULT_TASK_NAME};
use crate::ports::{DispatchError, Dispatcher, PersistenceSink, SinkError};
use crate::registry::NodeRegistry;
use crate::scoring::{Criterion, InvalidWeight, Metric, ScoreWeights};
use crate::tracker::BestNodeTracker;
use crate::window::RollingWindow;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Seconds since the Unix epoch, the time base of every engine operation.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub selection: SelectionConfig,
    pub admission_interval_secs: f64,
    pub latency_window: usize,
    pub throughput_window: usize,
    pub throughput_period_secs: f64,
    pub task_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            admission_interval_secs: 60.0,
            latency_window: 60,
            throughput_window: 60,
            throughput_period_secs: 1.0,
            task_name: DEFAULT_TASK_NAME.to_string(),
        }
    }
}

/// Criterion and weights, swapped together under the engine lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub criterion: Criterion,
    pub weights: ScoreWeights,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            criterion: Criterion::Single(Metric::Cpu),
            weights: ScoreWeights::uniform(0.25),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Running,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Report admitted; carries the recomputed optimum.
    Accepted(BestNodeState),
    /// Same node reported again inside the admission interval.
    Gated,
    /// Dropped unseen because ingestion is paused.
    Paused,
}

/// Side-effect failures after a report was admitted. The registry and best
/// node are already updated when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("persistence failed: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub latency_ms: Vec<f64>,
    pub throughput: Vec<f64>,
    pub nodes_tracked: usize,
    pub accepted_total: u64,
    pub gated_total: u64,
    pub dropped_while_paused: u64,
    pub paused: bool,
}

struct Inner {
    registry: NodeRegistry,
    tracker: BestNodeTracker,
    selection: SelectionConfig,
    latency: RollingWindow<f64>,
    throughput: RollingWindow<f64>,
    throughput_period: f64,
    messages_since_sample: u64,
    throughput_anchor: f64,
    accepted_total: u64,
    gated_total: u64,
}

impl Inner {
    /// Counts one accepted message and emits a throughput sample once the
    /// sampling period has elapsed since the previous one.
    fn tick_throughput(&mut self, now: f64) {
        self.messages_since_sample += 1;
        let elapsed = (now - self.throughput_anchor).abs();
        if elapsed >= self.throughput_period {
            let rate = self.messages_since_sample as f64 / elapsed;
            self.throughput.push(rate);
            self.messages_since_sample = 0;
            self.throughput_anchor = now;
            info!("throughput: {:.2} messages/sec", rate);
        }
    }
}

pub struct Engine {
    inner: Mutex<Inner>,
    paused: AtomicBool,
    dropped_while_paused: AtomicU64,
    dispatcher: Arc<dyn Dispatcher>,
    sink: Option<Arc<dyn PersistenceSink>>,
    task_name: String,
}

impl Engine {
    pub fn new(config: EngineConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let inner = Inner {
            registry: NodeRegistry::new(config.admission_interval_secs),
            tracker: BestNodeTracker::new(),
            selection: config.selection,
            latency: RollingWindow::new(config.latency_window),
            throughput: RollingWindow::new(config.throughput_window),
            throughput_period: config.throughput_period_secs,
            messages_since_sample: 0,
            throughput_anchor: unix_now(),
            accepted_total: 0,
            gated_total: 0,
        };

        Self {
            inner: Mutex::new(inner),
            paused: AtomicBool::new(false),
            dropped_while_paused: AtomicU64::new(0),
            dispatcher,
            sink: None,
            task_name: config.task_name,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Overrides the throughput anchor, for replays with their own clock.
    pub fn started_at(self, now: f64) -> Self {
        self.inner.lock().throughput_anchor = now;
        self
    }

    pub fn ingest(&self, report: MetricReport) -> Result<IngestOutcome, IngestError> {
        self.ingest_at(report, unix_now())
    }

    /// Runs one report through gate, registry, windows and recomputation,
    /// then records and dispatches the new best node.
    pub fn ingest_at(&self, report: MetricReport, now: f64) -> Result<IngestOutcome, IngestError> {
        if self.is_paused() {
            return Ok(self.drop_paused(&report));
        }

        let mut inner = self.inner.lock();
        // pause() may have returned while this report waited for the lock
        if self.is_paused() {
            return Ok(self.drop_paused(&report));
        }
        let node_id = report.node_id().to_string();
        let sampled_at = report.timestamp();

        if !inner.registry.admit(report, now) {
            inner.gated_total += 1;
            debug!(node_id = %node_id, "report ignored due to interval check");
            return Ok(IngestOutcome::Gated);
        }
        inner.accepted_total += 1;
        inner.latency.push((now - sampled_at).abs() * 1000.0);

        let Inner { registry, tracker, selection, .. } = &mut *inner;
        let selected = tracker.recompute(registry, selection.criterion, &selection.weights, now);
        inner.tick_throughput(now);

        let Some(best_id) = selected.state.node_id.clone() else {
            return Ok(IngestOutcome::Accepted(selected.state));
        };
        info!(node_id = %best_id, score = selected.state.score, "new best node");

        let sink_result = match (&self.sink, &selected.record) {
            (Some(sink), Some(record)) => sink.record(record),
            _ => Ok(()),
        };
        let assignment = TaskAssignment::new(self.task_name.as_str(), best_id);
        let dispatch_result = self.dispatcher.send(&assignment);
        drop(inner);

        match (dispatch_result, sink_result) {
            (Ok(()), Ok(())) => {
                debug!(node_id = %assignment.node_id, task = %assignment.task, "task assigned");
                Ok(IngestOutcome::Accepted(selected.state))
            }
            (Err(dispatch), Err(sink)) => {
                warn!(error = %sink, "optimal record not persisted");
                Err(dispatch.into())
            }
            (Err(dispatch), Ok(())) => Err(dispatch.into()),
            (Ok(()), Err(sink)) => Err(sink.into()),
        }
    }

    fn drop_paused(&self, report: &MetricReport) -> IngestOutcome {
        self.dropped_while_paused.fetch_add(1, Ordering::Relaxed);
        debug!(node_id = report.node_id(), "ingestion paused, report dropped");
        IngestOutcome::Paused
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("pausing ingestion");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("resuming ingestion");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        if self.is_paused() {
            RunState::Paused
        } else {
            RunState::Running
        }
    }

    pub fn best_node(&self) -> BestNodeState {
        self.inner.lock().tracker.current().clone()
    }

    /// Registry snapshot in first-seen order.
    pub fn nodes(&self) -> Vec<MetricReport> {
        self.inner.lock().registry.iter().cloned().collect()
    }

    pub fn nodes_tracked(&self) -> usize {
        self.inner.lock().registry.len()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let inner = self.inner.lock();
        Diagnostics {
            latency_ms: inner.latency.values(),
            throughput: inner.throughput.values(),
            nodes_tracked: inner.registry.len(),
            accepted_total: inner.accepted_total,
            gated_total: inner.gated_total,
            dropped_while_paused: self.dropped_while_paused.load(Ordering::Relaxed),
            paused: self.is_paused(),
        }
    }

    pub fn selection(&self) -> SelectionConfig {
        self.inner.lock().selection.clone()
    }

    /// Replaces criterion and weights. Applies from the next accepted report.
    pub fn set_selection(&self, selection: SelectionConfig) -> Result<(), InvalidWeight> {
        selection.weights.validate()?;
        info!(criterion = %selection.criterion, "selection updated");
        self.inner.lock().selection = selection;
        Ok(())
    }

    pub fn set_criterion(&self, criterion: Criterion) {
        info!(criterion = %criterion, "selection criterion updated");
        self.inner.lock().selection.criterion = criterion;
    }

    pub fn set_weights(&self, weights: ScoreWeights) -> Result<(), InvalidWeight> {
        weights.validate()?;
        self.inner.lock().selection.weights = weights;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptimalRecord;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<TaskAssignment>>,
        records: Mutex<Vec<OptimalRecord>>,
        fail_dispatch: AtomicBool,
        fail_sink: AtomicBool,
    }

    impl Dispatcher for Recorder {
        fn send(&self, assignment: &TaskAssignment) -> Result<(), DispatchError> {
            if self.fail_dispatch.load(Ordering::SeqCst) {
                return Err(DispatchError::Transport("broker down".into()));
            }
            self.sent.lock().push(assignment.clone());
            Ok(())
        }
    }

    impl PersistenceSink for Recorder {
        fn record(&self, record: &OptimalRecord) -> Result<(), SinkError> {
            if self.fail_sink.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.records.lock().push(record.clone());
            Ok(())
        }
    }

    fn cpu_engine(recorder: &Arc<Recorder>) -> Engine {
        let config = EngineConfig {
            selection: SelectionConfig {
                criterion: Criterion::Single(Metric::Cpu),
                weights: ScoreWeights::new().with(Metric::Cpu, 0.25),
            },
            ..EngineConfig::default()
        };
        Engine::new(config, recorder.clone())
            .with_sink(recorder.clone())
            .started_at(0.0)
    }

    fn report(node: &str, cpu: f64, at: f64) -> MetricReport {
        MetricReport::new(node, cpu, 50.0, 90.0, 1.0, at)
    }

    #[test]
    fn accepted_report_updates_best_node_and_ports() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);

        let outcome = engine.ingest_at(report("n1", 2.0, 0.0), 0.0).unwrap();
        let IngestOutcome::Accepted(best) = outcome else {
            panic!("expected acceptance, got {outcome:?}");
        };
        assert_eq!(best.node_id.as_deref(), Some("n1"));
        assert!((best.score - 0.25 / 3.0).abs() < 1e-12);

        assert_eq!(recorder.sent.lock().as_slice(), &[TaskAssignment::new("Perform task", "n1")]);
        assert_eq!(recorder.records.lock()[0].node_id, "n1");
        assert_eq!(engine.best_node(), best);
    }

    #[test]
    fn gated_report_changes_nothing() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);

        engine.ingest_at(report("n1", 2.0, 0.0), 0.0).unwrap();
        let before = engine.best_node();
        let outcome = engine.ingest_at(report("n1", 0.0, 30.0), 30.0).unwrap();

        assert_eq!(outcome, IngestOutcome::Gated);
        assert_eq!(engine.best_node(), before);
        assert_eq!(engine.nodes()[0].cpu_load(), 2.0);
        assert_eq!(recorder.sent.lock().len(), 1);
        assert_eq!(engine.diagnostics().gated_total, 1);
    }

    #[test]
    fn latency_is_distance_to_sampling_time_in_ms() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);

        engine.ingest_at(report("n1", 1.0, 99.75), 100.0).unwrap();
        engine.ingest_at(report("n2", 1.0, 100.5), 100.0).unwrap();

        assert_eq!(engine.diagnostics().latency_ms, vec![250.0, 500.0]);
    }

    #[test]
    fn throughput_sampled_once_per_period() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);

        engine.ingest_at(report("a", 1.0, 0.2), 0.2).unwrap();
        engine.ingest_at(report("b", 1.0, 0.5), 0.5).unwrap();
        assert!(engine.diagnostics().throughput.is_empty());

        // third message lands 2s after the anchor: 3 messages / 2s
        engine.ingest_at(report("c", 1.0, 2.0), 2.0).unwrap();
        assert_eq!(engine.diagnostics().throughput, vec![1.5]);

        // counter and anchor were reset
        engine.ingest_at(report("d", 1.0, 2.5), 2.5).unwrap();
        engine.ingest_at(report("e", 1.0, 4.0), 4.0).unwrap();
        assert_eq!(engine.diagnostics().throughput, vec![1.5, 1.0]);
    }

    #[test]
    fn pause_drops_reports_without_mutation() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);

        engine.pause();
        engine.pause();
        assert_eq!(engine.state(), RunState::Paused);
        for i in 0..100 {
            let outcome = engine.ingest_at(report(&format!("n{i}"), 1.0, 0.0), 0.0).unwrap();
            assert_eq!(outcome, IngestOutcome::Paused);
        }

        let diagnostics = engine.diagnostics();
        assert_eq!(diagnostics.nodes_tracked, 0);
        assert!(diagnostics.latency_ms.is_empty());
        assert_eq!(diagnostics.dropped_while_paused, 100);
        assert_eq!(engine.best_node(), BestNodeState::default());
        assert!(recorder.sent.lock().is_empty());

        engine.resume();
        assert_eq!(engine.state(), RunState::Running);
        assert!(matches!(
            engine.ingest_at(report("n1", 1.0, 1.0), 1.0).unwrap(),
            IngestOutcome::Accepted(_)
        ));
        assert_eq!(engine.nodes_tracked(), 1);
    }

    #[test]
    fn dispatch_failure_is_reported_but_state_kept() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);
        recorder.fail_dispatch.store(true, Ordering::SeqCst);

        let err = engine.ingest_at(report("n1", 2.0, 0.0), 0.0).unwrap_err();
        assert!(matches!(err, IngestError::Dispatch(DispatchError::Transport(_))));
        assert_eq!(engine.best_node().node_id.as_deref(), Some("n1"));
        assert_eq!(recorder.records.lock().len(), 1);

        recorder.fail_dispatch.store(false, Ordering::SeqCst);
        assert!(engine.ingest_at(report("n2", 2.0, 1.0), 1.0).is_ok());
        assert_eq!(recorder.sent.lock().len(), 1);
    }

    #[test]
    fn sink_failure_still_dispatches() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);
        recorder.fail_sink.store(true, Ordering::SeqCst);

        let err = engine.ingest_at(report("n1", 2.0, 0.0), 0.0).unwrap_err();
        assert!(matches!(err, IngestError::Sink(SinkError::Io(_))));
        assert_eq!(recorder.sent.lock().len(), 1);
        assert_eq!(engine.best_node().node_id.as_deref(), Some("n1"));
    }

    #[test]
    fn selection_change_applies_on_next_report() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);

        // n1 busier CPU, n2 lower battery
        engine.ingest_at(MetricReport::new("n1", 9.0, 10.0, 80.0, 0.0, 0.0), 0.0).unwrap();
        engine.ingest_at(MetricReport::new("n2", 1.0, 10.0, 20.0, 0.0, 0.0), 0.0).unwrap();
        assert_eq!(engine.best_node().node_id.as_deref(), Some("n1"));

        engine.set_criterion(Criterion::Single(Metric::Battery));
        assert_eq!(engine.best_node().node_id.as_deref(), Some("n1"));

        engine.ingest_at(MetricReport::new("n3", 9.0, 10.0, 50.0, 0.0, 0.0), 0.0).unwrap();
        assert_eq!(engine.best_node().node_id.as_deref(), Some("n2"));
    }

    #[test]
    fn invalid_weights_are_refused() {
        let recorder = Arc::new(Recorder::default());
        let engine = cpu_engine(&recorder);
        let before = engine.selection();

        let bad = ScoreWeights::new().with(Metric::Load, f64::NAN);
        assert!(engine.set_weights(bad.clone()).is_err());
        assert!(engine
            .set_selection(SelectionConfig { criterion: Criterion::All, weights: bad })
            .is_err());
        assert_eq!(engine.selection(), before);
    }

    /// Blocks inside `send` until released, holding the engine lock.
    struct HeldDispatcher {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Dispatcher for HeldDispatcher {
        fn send(&self, _assignment: &TaskAssignment) -> Result<(), DispatchError> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
            Ok(())
        }
    }

    #[test]
    fn report_waiting_on_lock_is_dropped_after_pause() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let dispatcher = Arc::new(HeldDispatcher {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let engine = Arc::new(Engine::new(EngineConfig::default(), dispatcher).started_at(0.0));

        let first = {
            let engine = engine.clone();
            thread::spawn(move || engine.ingest_at(report("a", 1.0, 0.0), 0.0))
        };
        entered_rx.recv().unwrap();

        let second = {
            let engine = engine.clone();
            thread::spawn(move || engine.ingest_at(report("b", 1.0, 0.0), 0.0))
        };
        thread::sleep(Duration::from_millis(50));
        engine.pause();
        release_tx.send(()).unwrap();

        assert!(matches!(first.join().unwrap().unwrap(), IngestOutcome::Accepted(_)));
        assert_eq!(second.join().unwrap().unwrap(), IngestOutcome::Paused);
        assert_eq!(engine.nodes_tracked(), 1);
        let diagnostics = engine.diagnostics();
        assert_eq!(diagnostics.accepted_total, 1);
        assert_eq!(diagnostics.dropped_while_paused, 1);
        assert_eq!(engine.best_node().node_id.as_deref(), Some("a"));
    }
}
