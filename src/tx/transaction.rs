use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::primitives::buffer::{BufferHandle, BufferManager};
use crate::primitives::concurrency::{ConcurrencyManager, LockTable};
use crate::primitives::file::FileManager;
use crate::primitives::wal::LogManager;
use crate::tx::recovery::RecoveryManager;
use crate::types::{BlockId, DbError, Page, Result, TxId};

/// Hands out process-unique, increasing transaction ids.
#[derive(Debug)]
pub struct TxIdGenerator {
    last: AtomicU64,
}

impl TxIdGenerator {
    /// Continues numbering after `last_used`.
    pub fn new(last_used: u64) -> Self {
        Self {
            last: AtomicU64::new(last_used),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> TxId {
        TxId(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Most recently issued id, or the seed when none was issued yet.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxState {
    /// Accepting reads and writes.
    Active,
    /// Commit completed.
    Committed,
    /// Rollback completed, explicitly or after a fatal error.
    RolledBack,
    /// Rollback could not finish. Pins are gone but the locks stay held so
    /// nobody reads the half-undone blocks; recovery restores them on restart.
    Failed,
}

/// Buffers pinned by one transaction, with a pin per call to `pin`.
#[derive(Default)]
struct BufferList {
    buffers: HashMap<BlockId, BufferHandle>,
    pins: Vec<BlockId>,
}

impl BufferList {
    fn get(&self, block: &BlockId) -> Result<&BufferHandle> {
        self.buffers
            .get(block)
            .ok_or_else(|| DbError::BlockNotPinned(block.clone()))
    }

    fn pin(&mut self, bm: &BufferManager, block: &BlockId) -> Result<()> {
        let buf = bm.pin(block)?;
        self.buffers.insert(block.clone(), buf);
        self.pins.push(block.clone());
        Ok(())
    }

    fn unpin(&mut self, bm: &BufferManager, block: &BlockId) -> Result<()> {
        let buf = Arc::clone(self.get(block)?);
        bm.unpin(&buf);
        if let Some(pos) = self.pins.iter().position(|b| b == block) {
            self.pins.swap_remove(pos);
        }
        if !self.pins.contains(block) {
            self.buffers.remove(block);
        }
        Ok(())
    }

    fn unpin_all(&mut self, bm: &BufferManager) {
        for block in self.pins.drain(..) {
            if let Some(buf) = self.buffers.get(&block) {
                bm.unpin(buf);
            }
        }
        self.buffers.clear();
    }
}

/// Unit of work over the shared storage components.
///
/// Reads take a shared lock and writes an exclusive lock on the block,
/// held until commit or rollback. Every logged write records the old value
/// before the page changes. A fatal error (see
/// [`DbError::is_fatal_to_transaction`]) rolls the transaction back before
/// it is returned.
pub struct Transaction {
    id: TxId,
    state: TxState,
    fm: Arc<FileManager>,
    bm: Arc<BufferManager>,
    recovery: RecoveryManager,
    concurrency: ConcurrencyManager,
    buffers: BufferList,
}

impl Transaction {
    /// Starts transaction `id`, logging its `Start` record.
    pub fn new(
        id: TxId,
        fm: Arc<FileManager>,
        lm: Arc<LogManager>,
        bm: Arc<BufferManager>,
        locks: Arc<LockTable>,
    ) -> Result<Self> {
        let recovery = RecoveryManager::new(id, lm, Arc::clone(&bm))?;
        debug!(tx = id.0, "tx.start");
        Ok(Self {
            id,
            state: TxState::Active,
            fm,
            bm,
            recovery,
            concurrency: ConcurrencyManager::new(locks),
            buffers: BufferList::default(),
        })
    }

    /// Transaction id.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Pins `block` for this transaction.
    pub fn pin(&mut self, block: &BlockId) -> Result<()> {
        self.guard(|tx| tx.pin_raw(block))
    }

    /// Releases one pin on `block`.
    pub fn unpin(&mut self, block: &BlockId) -> Result<()> {
        self.guard(|tx| tx.unpin_raw(block))
    }

    /// Reads an `i64` under a shared lock.
    pub fn get_i64(&mut self, block: &BlockId, offset: usize) -> Result<i64> {
        self.guard(|tx| {
            let buf = tx.read_locked(block)?;
            let value = buf.lock().contents().get_i64(offset)?;
            Ok(value)
        })
    }

    /// Reads an `i8` under a shared lock.
    pub fn get_i8(&mut self, block: &BlockId, offset: usize) -> Result<i8> {
        self.guard(|tx| {
            let buf = tx.read_locked(block)?;
            let value = buf.lock().contents().get_i8(offset)?;
            Ok(value)
        })
    }

    /// Reads a string under a shared lock.
    pub fn get_string(&mut self, block: &BlockId, offset: usize) -> Result<String> {
        self.guard(|tx| {
            let buf = tx.read_locked(block)?;
            let value = buf.lock().contents().get_string(offset)?;
            Ok(value)
        })
    }

    /// Writes an `i64` under an exclusive lock.
    ///
    /// `log = false` skips the undo record; only use it to format blocks no
    /// committed transaction could have seen.
    pub fn set_i64(&mut self, block: &BlockId, offset: usize, value: i64, log: bool) -> Result<()> {
        self.guard(|tx| tx.set_i64_raw(block, offset, value, log))
    }

    /// Writes an `i8` under an exclusive lock.
    pub fn set_i8(&mut self, block: &BlockId, offset: usize, value: i8, log: bool) -> Result<()> {
        self.guard(|tx| tx.set_i8_raw(block, offset, value, log))
    }

    /// Writes a string under an exclusive lock.
    pub fn set_string(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: &str,
        log: bool,
    ) -> Result<()> {
        self.guard(|tx| tx.set_string_raw(block, offset, value, log))
    }

    /// Extends `filename` by one block, holding its end-of-file lock exclusively.
    pub fn append(&mut self, filename: &str) -> Result<BlockId> {
        self.guard(|tx| {
            tx.concurrency.xlock(&end_of_file(filename))?;
            tx.fm.append(filename)
        })
    }

    /// Number of blocks in `filename`, under a shared end-of-file lock.
    pub fn size(&mut self, filename: &str) -> Result<u32> {
        self.guard(|tx| {
            tx.concurrency.slock(&end_of_file(filename))?;
            tx.fm.length(filename)
        })
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        self.fm.block_size()
    }

    /// Unpinned buffers left in the shared pool.
    pub fn available_buffers(&self) -> usize {
        self.bm.available()
    }

    /// Commits: pages first, then a forced commit record, then locks and pins go.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        if let Err(err) = self.recovery.commit() {
            warn!(tx = self.id.0, error = %err, "tx.commit.failed");
            self.abort();
            return Err(err);
        }
        self.finish(TxState::Committed);
        debug!(tx = self.id.0, "tx.commit");
        Ok(())
    }

    /// Restores every value this transaction wrote and ends it.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.end_with_rollback().map(|_| ())
    }

    /// Undoes unfinished transactions found in the log and checkpoints.
    ///
    /// Returns the number of updates undone. Call once at startup, before
    /// any other transaction writes.
    pub fn recover(&mut self) -> Result<usize> {
        self.guard(|tx| {
            let recovery = tx.recovery.clone();
            recovery.recover(tx)
        })
    }

    pub(crate) fn pin_raw(&mut self, block: &BlockId) -> Result<()> {
        self.buffers.pin(&self.bm, block)
    }

    pub(crate) fn unpin_raw(&mut self, block: &BlockId) -> Result<()> {
        self.buffers.unpin(&self.bm, block)
    }

    pub(crate) fn set_i64_raw(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: i64,
        log: bool,
    ) -> Result<()> {
        let buf = self.write_locked(block)?;
        let mut buf = buf.lock();
        check_fits(buf.contents(), offset, 8)?;
        let lsn = if log {
            Some(self.recovery.set_i64(&buf, offset)?)
        } else {
            None
        };
        buf.contents_mut().set_i64(offset, value)?;
        buf.set_modified(self.id, lsn);
        Ok(())
    }

    pub(crate) fn set_i8_raw(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: i8,
        log: bool,
    ) -> Result<()> {
        let buf = self.write_locked(block)?;
        let mut buf = buf.lock();
        check_fits(buf.contents(), offset, 1)?;
        let lsn = if log {
            Some(self.recovery.set_i8(&buf, offset)?)
        } else {
            None
        };
        buf.contents_mut().set_i8(offset, value)?;
        buf.set_modified(self.id, lsn);
        Ok(())
    }

    pub(crate) fn set_string_raw(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: &str,
        log: bool,
    ) -> Result<()> {
        let buf = self.write_locked(block)?;
        let mut buf = buf.lock();
        check_fits(buf.contents(), offset, Page::max_length(value.len()))?;
        let lsn = if log {
            Some(self.recovery.set_string(&buf, offset, value.len())?)
        } else {
            None
        };
        buf.contents_mut().set_string(offset, value)?;
        buf.set_modified(self.id, lsn);
        Ok(())
    }

    fn read_locked(&mut self, block: &BlockId) -> Result<BufferHandle> {
        let buf = Arc::clone(self.buffers.get(block)?);
        self.concurrency.slock(block)?;
        Ok(buf)
    }

    fn write_locked(&mut self, block: &BlockId) -> Result<BufferHandle> {
        let buf = Arc::clone(self.buffers.get(block)?);
        self.concurrency.xlock(block)?;
        Ok(buf)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxState::Active => Ok(()),
            _ => Err(DbError::TransactionClosed(self.id)),
        }
    }

    fn guard<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.ensure_active()?;
        match op(self) {
            Err(err) if err.is_fatal_to_transaction() => {
                warn!(tx = self.id.0, error = %err, "tx.abort");
                self.abort();
                Err(err)
            }
            other => other,
        }
    }

    fn abort(&mut self) {
        if let Err(err) = self.end_with_rollback() {
            warn!(tx = self.id.0, error = %err, "tx.abort.rollback_failed");
        }
    }

    fn end_with_rollback(&mut self) -> Result<usize> {
        // undo pins every block it restores; our own pins may hold the whole pool
        self.buffers.unpin_all(&self.bm);
        let recovery = self.recovery.clone();
        match recovery.rollback(self) {
            Ok(undone) => {
                debug!(tx = self.id.0, undone, "tx.rollback");
                self.finish(TxState::RolledBack);
                Ok(undone)
            }
            Err(err) => {
                self.buffers.unpin_all(&self.bm);
                self.state = TxState::Failed;
                warn!(
                    tx = self.id.0,
                    locks = self.concurrency.held_count(),
                    "tx.rollback.failed_locks_kept"
                );
                Err(err)
            }
        }
    }

    fn finish(&mut self, state: TxState) {
        self.concurrency.release();
        self.buffers.unpin_all(&self.bm);
        self.state = state;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            warn!(tx = self.id.0, "tx.drop.rollback");
            self.abort();
        }
    }
}

/// Sentinel block standing for the end of `filename`.
fn end_of_file(filename: &str) -> BlockId {
    BlockId::new(filename, u32::MAX)
}

fn check_fits(page: &Page, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= page.len() => Ok(()),
        _ => Err(DbError::PageOutOfBounds {
            offset,
            len,
            page_size: page.len(),
        }),
    }
}
