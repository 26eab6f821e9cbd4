//! CSV persistence of optimal-node records.
//!
//! One row per best-node update, no header:
//! `node_id,score,cpu_load,memory_usage,battery_level,load_avg`.
//! The file is opened in append mode so history survives restarts.

use super::{PersistenceSink, SinkError};
use crate::models::OptimalRecord;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct CsvSink {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvSink {
    /// Opens (or creates) `path` for appending, creating parent directories.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceSink for CsvSink {
    fn record(&self, record: &OptimalRecord) -> Result<(), SinkError> {
        let mut writer = self.writer.lock();
        writer.serialize(record)?;
        writer.flush()?;
        debug!(node_id = %record.node_id, path = ?self.path, "optimal record appended");
        Ok(())
    }
}
