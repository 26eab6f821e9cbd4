/*!
Dispatchers that stand in for the MQTT task publisher.

Messages are captured with the topic, QoS and payload the real dispatcher
would use, so assertions can be written against the wire format.
*/

use fleet_kernel::ports::{DispatchError, Dispatcher};
use fleet_kernel::TaskAssignment;
use parking_lot::Mutex;
use rumqttc::QoS;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_TASK_TOPIC: &str = "fleet/task_assignment";

#[derive(Debug, Clone, PartialEq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Captures every assignment as a published message.
#[derive(Debug)]
pub struct RecordingDispatcher {
    topic: String,
    published: Mutex<Vec<MockMessage>>,
}

impl RecordingDispatcher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<MockMessage> {
        self.published.lock().clone()
    }

    /// Decoded assignments in publish order.
    pub fn assignments(&self) -> Vec<TaskAssignment> {
        self.published
            .lock()
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    pub fn last_json<T: DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        match self.published.lock().last() {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

impl Default for RecordingDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TOPIC)
    }
}

impl Dispatcher for RecordingDispatcher {
    fn send(&self, assignment: &TaskAssignment) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(assignment)?;
        debug!(topic = %self.topic, node_id = %assignment.node_id, "[mock] task published");
        self.published.lock().push(MockMessage {
            topic: self.topic.clone(),
            payload,
            qos: QoS::AtLeastOnce,
            retain: false,
        });
        Ok(())
    }
}

/// Fails while switched on, forwards to a [`RecordingDispatcher`] otherwise.
#[derive(Debug)]
pub struct FailingDispatcher {
    inner: Arc<RecordingDispatcher>,
    failing: AtomicBool,
    failures: AtomicUsize,
}

impl FailingDispatcher {
    pub fn new(inner: Arc<RecordingDispatcher>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sends refused so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn recorder(&self) -> &Arc<RecordingDispatcher> {
        &self.inner
    }
}

impl Dispatcher for FailingDispatcher {
    fn send(&self, assignment: &TaskAssignment) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(DispatchError::Transport("broker unavailable".into()));
        }
        self.inner.send(assignment)
    }
}
