//! Task assignments received from the kernel.

use fleet_kernel::TaskAssignment;
use tokio::task::{self, JoinHandle};
use tracing::{info, warn};

pub const LOAD_TASK: &str = "load_task";

const LOAD_ROUNDS: u64 = 1000;
const LOAD_SPAN: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Load,
    Unknown(String),
}

impl TaskKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            LOAD_TASK => TaskKind::Load,
            other => TaskKind::Unknown(other.to_string()),
        }
    }
}

/// Decodes a task-topic payload. Returns `None` for assignments addressed to
/// another node or for payloads that do not decode.
pub fn accept_assignment(payload: &[u8], node_id: &str) -> Option<TaskKind> {
    let assignment: TaskAssignment = match serde_json::from_slice(payload) {
        Ok(a) => a,
        Err(e) => {
            warn!(error = %e, "undecodable task assignment");
            return None;
        }
    };
    if assignment.node_id != node_id {
        return None;
    }
    info!(node_id, task = %assignment.task, "task received");
    Some(TaskKind::from_name(&assignment.task))
}

/// Bounded CPU-bound work standing in for a real job.
pub fn run_load_task() -> u64 {
    (0..LOAD_ROUNDS)
        .map(|_| (0..LOAD_SPAN).map(|i| i * i).sum::<u64>())
        .fold(0u64, u64::wrapping_add)
}

/// Starts the task off the async runtime. Unknown tasks are only logged.
pub fn execute(kind: TaskKind, node_id: String) -> Option<JoinHandle<()>> {
    match kind {
        TaskKind::Load => Some(task::spawn_blocking(move || {
            info!(node_id = %node_id, "starting load task");
            let checksum = run_load_task();
            info!(node_id = %node_id, checksum, "load task completed");
        })),
        TaskKind::Unknown(name) => {
            warn!(node_id = %node_id, task = %name, "unknown task type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_by_node_id() {
        let payload = br#"{"task":"load_task","node_id":"node_2"}"#;
        assert_eq!(accept_assignment(payload, "node_2"), Some(TaskKind::Load));
        assert_eq!(accept_assignment(payload, "node_1"), None);
        assert_eq!(accept_assignment(b"garbage", "node_2"), None);
    }

    #[test]
    fn other_names_are_unknown() {
        assert_eq!(
            TaskKind::from_name("Perform task"),
            TaskKind::Unknown("Perform task".to_string())
        );
    }

    #[test]
    fn load_task_is_deterministic() {
        // 1000 rounds of sum(i^2, i < 1000)
        assert_eq!(run_load_task(), 1000 * 332_833_500);
    }

    #[tokio::test]
    async fn execute_runs_load_on_blocking_thread() {
        let handle = execute(TaskKind::Load, "n1".to_string()).unwrap();
        handle.await.unwrap();
        assert!(execute(TaskKind::Unknown("x".into()), "n1".to_string()).is_none());
    }
}
