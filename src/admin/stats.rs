use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use crate::admin::{open_for_inspection, Result};
use crate::options::DbOptions;

/// Overview of a database directory.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    /// Database directory as given.
    pub dir: String,
    /// Block size the directory was opened with.
    pub block_size: usize,
    /// Data files, sorted by name; the log is reported separately.
    pub files: Vec<FileStats>,
    /// Write-ahead log summary.
    pub wal: WalSection,
    /// Buffer pool of the inspecting open.
    pub buffers: BufferSection,
}

/// One data file.
#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    /// File name inside the directory.
    pub name: String,
    /// Whole blocks in the file.
    pub blocks: u32,
    /// File length in bytes.
    pub size_bytes: u64,
}

/// Write-ahead log summary.
#[derive(Debug, Clone, Serialize)]
pub struct WalSection {
    /// Log file name.
    pub file: String,
    /// Blocks the log occupies.
    pub blocks: u32,
    /// Log length in bytes; 0 when the file does not exist.
    pub size_bytes: u64,
    /// Records readable from the log.
    pub records: usize,
    /// Tail flushes performed by this open.
    pub flushes: u64,
}

/// Buffer pool counters.
#[derive(Debug, Clone, Serialize)]
pub struct BufferSection {
    /// Buffers in the pool.
    pub pool_size: usize,
    /// Buffers currently unpinned.
    pub available: usize,
    /// Pins served by an already mapped buffer.
    pub hits: u64,
    /// Pins that read the block from disk.
    pub misses: u64,
    /// Dirty pages written back.
    pub writebacks: u64,
    /// Pins that waited for a free buffer.
    pub pin_waits: u64,
    /// Pins that gave up waiting.
    pub pin_timeouts: u64,
}

/// Collects file sizes and engine counters for `dir` without modifying it.
///
/// # Errors
///
/// Fails when the directory is missing or a log record cannot be read.
pub fn stats(dir: impl AsRef<Path>, opts: &DbOptions) -> Result<StatsReport> {
    let dir = dir.as_ref();
    let db = open_for_inspection(dir, opts)?;
    let fm = db.file_manager();
    let lm = db.log_manager();

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == lm.log_file() || !entry.file_type()?.is_file() {
            continue;
        }
        files.push(FileStats {
            blocks: fm.length(&name)?,
            size_bytes: entry.metadata()?.len(),
            name,
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));

    let records = lm.iter()?.try_fold(0usize, |n, record| record.map(|_| n + 1))?;
    let size_bytes = match fs::metadata(dir.join(lm.log_file())) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == ErrorKind::NotFound => 0,
        Err(err) => return Err(err.into()),
    };
    let wal_stats = db.wal_stats();
    let wal = WalSection {
        file: lm.log_file().to_string(),
        blocks: fm.length(lm.log_file())?,
        size_bytes,
        records,
        flushes: wal_stats.flushes,
    };

    let pool = db.buffer_stats();
    let buffers = BufferSection {
        pool_size: db.buffer_manager().capacity(),
        available: pool.available,
        hits: pool.hits,
        misses: pool.misses,
        writebacks: pool.writebacks,
        pin_waits: pool.pin_waits,
        pin_timeouts: pool.pin_timeouts,
    };

    Ok(StatsReport {
        dir: dir.display().to_string(),
        block_size: fm.block_size(),
        files,
        wal,
        buffers,
    })
}
