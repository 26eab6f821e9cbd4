/**
 * OUTBOUND PORTS - Boundaries between the engine and the outside world
 *
 * ROLE :
 * The engine never talks to a broker or a file directly. Every best-node
 * update goes through two ports:
 * - Dispatcher      : sends the task assignment to the selected node
 * - PersistenceSink : appends the optimal-node record (append-only)
 *
 * BEHAVIOUR :
 * - Both calls are synchronous and must not block on I/O for long, they run
 *   inside the engine's critical section so per-node order is preserved
 * - Failures are returned to the caller, never retried
 *
 * IMPLEMENTATIONS :
 * - MqttDispatcher (crate::mqtt) : publish on the task topic
 * - CsvSink (csv_sink)           : one CSV row per update
 * - LogDispatcher                : tracing only, when no broker is configured
 */

use crate::models::{OptimalRecord, TaskAssignment};
use tracing::info;

pub mod csv_sink;

pub use csv_sink::CsvSink;

/// Failure to hand a task assignment to the transport.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to append an optimal-node record.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Outbound task channel. Fire-and-forget, no acknowledgement is awaited.
pub trait Dispatcher: Send + Sync {
    fn send(&self, assignment: &TaskAssignment) -> Result<(), DispatchError>;
}

/// Append-only store of best-node updates. Never read back by the engine.
pub trait PersistenceSink: Send + Sync {
    fn record(&self, record: &OptimalRecord) -> Result<(), SinkError>;
}

/// Dispatcher that only logs, used when the kernel runs without a broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    fn send(&self, assignment: &TaskAssignment) -> Result<(), DispatchError> {
        info!(node_id = %assignment.node_id, task = %assignment.task, "task assignment (not published)");
        Ok(())
    }
}
