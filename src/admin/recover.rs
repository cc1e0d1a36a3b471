use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::admin::{open_existing, Result};
use crate::options::DbOptions;

/// Report generated after an explicit recovery run.
#[derive(Debug, Clone, Serialize)]
pub struct RecoverReport {
    /// Transaction that performed the recovery.
    pub tx: u64,
    /// Updates of unfinished transactions that were undone.
    pub undone: usize,
    /// Duration of the recovery in milliseconds.
    pub duration_ms: f64,
}

/// Runs crash recovery on `dir` and commits the recovering transaction.
///
/// # Errors
///
/// Returns an error if the directory is missing or recovery fails.
pub fn recover(dir: impl AsRef<Path>, opts: &DbOptions) -> Result<RecoverReport> {
    let db = open_existing(dir.as_ref(), opts)?;
    let start = Instant::now();
    let mut tx = db.new_transaction()?;
    let undone = tx.recover()?;
    tx.commit()?;
    let elapsed = start.elapsed();
    Ok(RecoverReport {
        tx: tx.id().0,
        undone,
        duration_ms: elapsed.as_secs_f64() * 1_000.0,
    })
}
