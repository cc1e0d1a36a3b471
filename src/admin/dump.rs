use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::admin::{open_for_inspection, Result};
use crate::options::DbOptions;
use crate::tx::LogRecord;

/// One decoded log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Position in the dump; 0 is the newest record.
    pub position: usize,
    /// Record kind, e.g. `SETINT64`.
    pub kind: &'static str,
    /// Owning transaction, absent for checkpoints.
    pub tx: Option<u64>,
    /// Rendered record, e.g. `<SETINT64 7 [data.dat:3] 80 42>`.
    pub text: String,
}

/// Contents of the write-ahead log.
#[derive(Debug, Clone, Serialize)]
pub struct LogReport {
    /// Log file name inside the database directory.
    pub log_file: String,
    /// Blocks the log occupies.
    pub blocks: u32,
    /// Records, newest first.
    pub records: Vec<LogEntry>,
    /// Number of records per kind.
    pub counts: BTreeMap<&'static str, usize>,
}

/// Decodes every record of the log in `dir`, newest first.
///
/// # Errors
///
/// Fails when the directory is missing or a record does not decode.
pub fn dump_log(dir: impl AsRef<Path>, opts: &DbOptions) -> Result<LogReport> {
    let db = open_for_inspection(dir.as_ref(), opts)?;
    let lm = db.log_manager();
    let mut records = Vec::new();
    let mut counts = BTreeMap::new();
    for (position, bytes) in lm.iter()?.enumerate() {
        let record = LogRecord::decode(&bytes?)?;
        *counts.entry(record.kind()).or_insert(0) += 1;
        records.push(LogEntry {
            position,
            kind: record.kind(),
            tx: record.tx().map(|tx| tx.0),
            text: record.to_string(),
        });
    }
    Ok(LogReport {
        log_file: lm.log_file().to_string(),
        blocks: db.file_manager().length(lm.log_file())?,
        records,
        counts,
    })
}
