use crate::engine::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub nodes_tracked: u32,
    pub paused: bool,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

/// Broker connection status and uptime, shared by the MQTT loop and the API.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disabled(&self) {
        *self.mqtt_status.lock() = "disabled".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, engine: &Engine) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            nodes_tracked: engine.nodes_tracked() as u32,
            paused: engine.is_paused(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::ports::LogDispatcher;

    #[test]
    fn reports_status_transitions() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(LogDispatcher));
        let tracker = HealthTracker::new();
        assert_eq!(tracker.get_health(&engine).mqtt_status, "connecting");

        tracker.increment_reconnects();
        tracker.increment_reconnects();
        let health = tracker.get_health(&engine);
        assert_eq!(health.mqtt_status, "reconnecting");
        assert_eq!(health.mqtt_reconnects, 2);

        tracker.mark_mqtt_connected();
        engine.pause();
        let health = tracker.get_health(&engine);
        assert_eq!(health.mqtt_status, "connected");
        assert!(health.paused);
        assert_eq!(health.nodes_tracked, 0);
    }
}
