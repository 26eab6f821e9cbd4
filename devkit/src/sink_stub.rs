/*!
In-memory persistence sinks.
*/

use fleet_kernel::ports::{PersistenceSink, SinkError};
use fleet_kernel::OptimalRecord;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Keeps every optimal-node record in append order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<OptimalRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OptimalRecord> {
        self.records.lock().clone()
    }

    pub fn last(&self) -> Option<OptimalRecord> {
        self.records.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl PersistenceSink for MemorySink {
    fn record(&self, record: &OptimalRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Fails with an I/O error while switched on, appends to a [`MemorySink`]
/// otherwise.
#[derive(Debug)]
pub struct FailingSink {
    inner: Arc<MemorySink>,
    failing: AtomicBool,
    failures: AtomicUsize,
}

impl FailingSink {
    pub fn new(inner: Arc<MemorySink>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn memory(&self) -> &Arc<MemorySink> {
        &self.inner
    }
}

impl PersistenceSink for FailingSink {
    fn record(&self, record: &OptimalRecord) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(io::Error::other("disk full").into());
        }
        self.inner.record(record)
    }
}
