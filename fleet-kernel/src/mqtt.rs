//! MQTT binding: metrics topic in, task topic out.

use crate::config::MqttConf;
use crate::engine::{Engine, IngestOutcome};
use crate::health::HealthTracker;
use crate::models::{MetricReport, ReportError, TaskAssignment};
use crate::ports::{DispatchError, Dispatcher};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid report: {0}")]
    Invalid(#[from] ReportError),
}

pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(conf.client_id.as_str(), conf.host.as_str(), conf.port);
    opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs));
    AsyncClient::new(opts, 10)
}

/// Decodes and range-checks one metrics payload.
pub fn decode_report(payload: &[u8]) -> Result<MetricReport, DecodeError> {
    let report: MetricReport = serde_json::from_slice(payload)?;
    report.validate()?;
    Ok(report)
}

/// Feeds one payload to the engine and logs the outcome. Returns `None` when
/// the payload was malformed or a side effect failed.
pub fn handle_payload(engine: &Engine, payload: &[u8]) -> Option<IngestOutcome> {
    let report = match decode_report(payload) {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, payload = %String::from_utf8_lossy(payload), "metrics payload rejected");
            return None;
        }
    };

    let node_id = report.node_id().to_string();
    match engine.ingest(report) {
        Ok(outcome) => {
            match &outcome {
                IngestOutcome::Accepted(best) => info!(
                    node_id = %node_id,
                    best_node = ?best.node_id,
                    score = best.score,
                    "report accepted"
                ),
                IngestOutcome::Gated => debug!(node_id = %node_id, "report gated"),
                IngestOutcome::Paused => debug!(node_id = %node_id, "report dropped, paused"),
            }
            Some(outcome)
        }
        Err(e) => {
            warn!(node_id = %node_id, error = %e, "report accepted with failed side effect");
            None
        }
    }
}

/// [`handle_payload`] on the blocking pool. Ingestion waits on the engine
/// lock and may append to the CSV file, so it stays off the runtime workers;
/// awaiting the handle keeps reports in broker order.
pub async fn ingest_blocking(
    engine: Arc<Engine>,
    payload: impl AsRef<[u8]> + Send + 'static,
) -> Option<IngestOutcome> {
    match task::spawn_blocking(move || handle_payload(&engine, payload.as_ref())).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "failed to join metrics handler");
            None
        }
    }
}

/// Polls the broker forever: subscribes on every (re)connection and routes
/// metrics publishes to the engine.
pub fn spawn_mqtt_listener(
    engine: Arc<Engine>,
    client: AsyncClient,
    mut eventloop: EventLoop,
    metrics_topic: String,
    health: HealthTracker,
) -> JoinHandle<()> {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    match client.try_subscribe(metrics_topic.as_str(), QoS::AtLeastOnce) {
                        Ok(()) => info!(topic = %metrics_topic, "subscribed to node metrics"),
                        Err(e) => warn!(topic = %metrics_topic, error = ?e, "subscribe failed"),
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == metrics_topic => {
                    ingest_blocking(engine.clone(), p.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = ?e, "MQTT connection error");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

/// Publishes task assignments as JSON on the task topic.
///
/// Uses the non-blocking request queue of the client, so a full queue is a
/// dispatch error rather than a stall of the ingestion path.
#[derive(Clone)]
pub struct MqttDispatcher {
    client: AsyncClient,
    topic: String,
}

impl MqttDispatcher {
    pub fn new(client: AsyncClient, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }
}

impl Dispatcher for MqttDispatcher {
    fn send(&self, assignment: &TaskAssignment) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(assignment)?;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        debug!(topic = %self.topic, node_id = %assignment.node_id, "task published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::ports::LogDispatcher;

    const PAYLOAD: &str = r#"{"cpu_load":2.0,"memory_usage":50.0,"battery_level":90.0,"load_avg":1.0,"node_id":"n1","timestamp":1700000000.0}"#;

    #[test]
    fn decodes_valid_payload() {
        let report = decode_report(PAYLOAD.as_bytes()).unwrap();
        assert_eq!(report.node_id(), "n1");
        assert_eq!(report.load_avg(), 1.0);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(decode_report(b"not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode_report(br#"{"cpu_load":2.0,"node_id":"n1"}"#),
            Err(DecodeError::Json(_))
        ));
        let negative = PAYLOAD.replace("\"load_avg\":1.0", "\"load_avg\":-1.0");
        assert!(matches!(decode_report(negative.as_bytes()), Err(DecodeError::Invalid(_))));
    }

    #[test]
    fn handle_payload_routes_to_engine() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(LogDispatcher));

        assert!(handle_payload(&engine, b"{}").is_none());
        assert_eq!(engine.nodes_tracked(), 0);

        assert!(matches!(
            handle_payload(&engine, PAYLOAD.as_bytes()),
            Some(IngestOutcome::Accepted(_))
        ));
        assert_eq!(handle_payload(&engine, PAYLOAD.as_bytes()), Some(IngestOutcome::Gated));
        assert_eq!(engine.best_node().node_id.as_deref(), Some("n1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_ingest_appends_csv_row() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("optimal.csv");
        let sink = crate::ports::CsvSink::open(&path).unwrap();
        let engine = Arc::new(
            Engine::new(EngineConfig::default(), Arc::new(LogDispatcher)).with_sink(Arc::new(sink)),
        );

        let outcome = ingest_blocking(engine.clone(), PAYLOAD.as_bytes()).await;
        assert!(matches!(outcome, Some(IngestOutcome::Accepted(_))));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("n1,"));
        assert!(content.ends_with(",2.0,50.0,90.0,1.0\n"));
    }

    #[tokio::test]
    async fn blocking_ingest_keeps_payload_order() {
        let engine = Arc::new(Engine::new(EngineConfig::default(), Arc::new(LogDispatcher)));

        assert!(ingest_blocking(engine.clone(), b"garbage".to_vec()).await.is_none());
        assert!(matches!(
            ingest_blocking(engine.clone(), PAYLOAD.as_bytes()).await,
            Some(IngestOutcome::Accepted(_))
        ));
        assert_eq!(
            ingest_blocking(engine.clone(), PAYLOAD.to_string().into_bytes()).await,
            Some(IngestOutcome::Gated)
        );
        assert_eq!(engine.diagnostics().accepted_total, 1);
    }

    #[tokio::test]
    async fn dispatcher_reports_full_request_queue() {
        let opts = MqttOptions::new("fleet-kernel-test", "localhost", 1883);
        let (client, _eventloop) = AsyncClient::new(opts, 1);
        let dispatcher = MqttDispatcher::new(client, "fleet/task_assignment");
        let assignment = TaskAssignment::new("Perform task", "n1");

        assert!(dispatcher.send(&assignment).is_ok());
        assert!(matches!(
            dispatcher.send(&assignment),
            Err(DispatchError::Transport(_))
        ));
    }
}
