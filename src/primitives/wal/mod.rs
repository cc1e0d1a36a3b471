#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::primitives::file::FileManager;
use crate::types::{BlockId, DbError, Lsn, Page, Result};

/// Width of the boundary header and of every record length prefix.
const BOUNDARY_LEN: usize = std::mem::size_of::<i32>();

/// Statistics tracking WAL operations.
#[derive(Clone, Debug, Default)]
pub struct WalStats {
    /// Number of records appended since open.
    pub records_appended: u64,
    /// Payload bytes appended since open.
    pub bytes_appended: u64,
    /// Number of times the tail block was written out.
    pub flushes: u64,
    /// Number of fresh log blocks allocated.
    pub blocks_allocated: u64,
}

struct LogState {
    page: Page,
    current_block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
    stats: WalStats,
}

/// Append-only log of opaque records stored in fixed-size blocks.
///
/// The tail block lives in memory and is packed backward from its end.
/// Offset 0 holds the boundary: the position of the earliest record still in
/// the block. A record is a 4-byte length followed by its bytes, so reading a
/// block from the boundary forward yields the newest record first.
pub struct LogManager {
    fm: Arc<FileManager>,
    log_file: String,
    state: Mutex<LogState>,
}

impl LogManager {
    /// Opens the log file, creating its first block when the file is empty.
    ///
    /// Over a read-only [`FileManager`] nothing is created: a missing log
    /// iterates as empty, and `append` fails with `ReadOnly`.
    pub fn open(fm: Arc<FileManager>, log_file: impl Into<String>) -> Result<Self> {
        let log_file = log_file.into();
        let block_size = fm.block_size();
        if block_size <= 2 * BOUNDARY_LEN || i32::try_from(block_size).is_err() {
            return Err(DbError::Invalid("block size too small for the log"));
        }
        let mut page = Page::new(block_size);
        let mut stats = WalStats::default();
        let len = fm.length(&log_file)?;
        let current_block = if len == 0 && fm.is_read_only() {
            page.set_i32(0, block_size as i32)?;
            BlockId::new(log_file.as_str(), 0)
        } else if len == 0 {
            stats.blocks_allocated += 1;
            append_block(&fm, &log_file, &mut page)?
        } else {
            let block = BlockId::new(log_file.as_str(), len - 1);
            fm.read(&block, &mut page)?;
            if page.get_i32(0)? == 0 {
                // appended but never initialised before a crash
                page.set_i32(0, block_size as i32)?;
            }
            block
        };
        debug!(file = %log_file, block = %current_block, "wal.open");
        Ok(Self {
            fm,
            log_file,
            state: Mutex::new(LogState {
                page,
                current_block,
                latest_lsn: Lsn(0),
                last_saved_lsn: Lsn(0),
                stats,
            }),
        })
    }

    /// Name of the log file.
    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    /// Appends a record and returns its LSN; the record is not yet durable.
    pub fn append(&self, record: &[u8]) -> Result<Lsn> {
        if self.fm.is_read_only() {
            return Err(DbError::ReadOnly);
        }
        let block_size = self.fm.block_size();
        let needed = Page::max_length(record.len());
        let capacity = block_size - BOUNDARY_LEN;
        if needed > capacity {
            return Err(DbError::LogRecordTooLarge {
                len: record.len(),
                capacity: capacity - BOUNDARY_LEN,
            });
        }
        let mut state = self.state.lock();
        let mut boundary = read_boundary(&state.page)?;
        if boundary < needed + BOUNDARY_LEN {
            self.flush_locked(&mut state)?;
            let LogState {
                page,
                current_block,
                stats,
                ..
            } = &mut *state;
            *current_block = append_block(&self.fm, &self.log_file, page)?;
            stats.blocks_allocated += 1;
            boundary = block_size;
        }
        let pos = boundary - needed;
        state.page.set_bytes(pos, record)?;
        state.page.set_i32(0, pos as i32)?;
        state.latest_lsn = Lsn(state.latest_lsn.0 + 1);
        state.stats.records_appended += 1;
        state.stats.bytes_appended += record.len() as u64;
        Ok(state.latest_lsn)
    }

    /// Writes the tail block when `lsn` is not yet known durable, or when forced.
    pub fn flush(&self, lsn: Lsn, force: bool) -> Result<()> {
        if self.fm.is_read_only() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if force || lsn >= state.last_saved_lsn {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Flushes the tail and returns an iterator over records, newest first.
    ///
    /// A read-only log has nothing buffered, so nothing is written.
    pub fn iter(&self) -> Result<LogIterator> {
        let mut state = self.state.lock();
        if !self.fm.is_read_only() {
            self.flush_locked(&mut state)?;
        }
        LogIterator::new(Arc::clone(&self.fm), state.current_block.clone())
    }

    /// LSN of the most recent append.
    pub fn latest_lsn(&self) -> Lsn {
        self.state.lock().latest_lsn
    }

    /// LSN known to be on disk.
    pub fn last_saved_lsn(&self) -> Lsn {
        self.state.lock().last_saved_lsn
    }

    /// Returns current statistics for this log.
    pub fn stats(&self) -> WalStats {
        self.state.lock().stats.clone()
    }

    fn flush_locked(&self, state: &mut LogState) -> Result<()> {
        self.fm.write(&state.current_block, &state.page)?;
        state.last_saved_lsn = state.latest_lsn;
        state.stats.flushes += 1;
        debug!(
            lsn = state.latest_lsn.0,
            block = %state.current_block,
            "wal.flush"
        );
        Ok(())
    }
}

fn append_block(fm: &FileManager, log_file: &str, page: &mut Page) -> Result<BlockId> {
    let block = fm.append(log_file)?;
    page.clear();
    page.set_i32(0, fm.block_size() as i32)?;
    fm.write(&block, page)?;
    Ok(block)
}

fn read_boundary(page: &Page) -> Result<usize> {
    let raw = page.get_i32(0)?;
    match usize::try_from(raw) {
        Ok(boundary) if boundary >= BOUNDARY_LEN && boundary <= page.len() => Ok(boundary),
        _ => Err(DbError::BadLogRecord("log block boundary out of range")),
    }
}

/// Reverse iterator over the log: newest record first, walking back block by block.
pub struct LogIterator {
    fm: Arc<FileManager>,
    block: BlockId,
    page: Page,
    current_pos: usize,
    done: bool,
}

impl LogIterator {
    fn new(fm: Arc<FileManager>, block: BlockId) -> Result<Self> {
        let page = Page::new(fm.block_size());
        let mut iter = Self {
            fm,
            block,
            page,
            current_pos: 0,
            done: false,
        };
        iter.load_block()?;
        Ok(iter)
    }

    fn load_block(&mut self) -> Result<()> {
        self.fm.read(&self.block, &mut self.page)?;
        self.current_pos = if self.page.get_i32(0)? == 0 {
            self.page.len()
        } else {
            read_boundary(&self.page)?
        };
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        while self.current_pos >= self.page.len() {
            if self.block.number() == 0 {
                return Ok(None);
            }
            self.block = BlockId::new(self.block.filename(), self.block.number() - 1);
            self.load_block()?;
        }
        let record = self
            .page
            .get_bytes(self.current_pos)
            .map_err(|_| DbError::BadLogRecord("log record overruns its block"))?
            .to_vec();
        self.current_pos += Page::max_length(record.len());
        Ok(Some(record))
    }
}

impl Iterator for LogIterator {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
