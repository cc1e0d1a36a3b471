//! Undo-only recovery: pre-image logging, rollback and crash recovery.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::primitives::buffer::{Buffer, BufferManager};
use crate::primitives::wal::LogManager;
use crate::tx::record::LogRecord;
use crate::tx::Transaction;
use crate::types::{BlockId, DbError, Lsn, Page, Result, TxId};

/// Per-transaction recovery manager.
///
/// Logs the old value of every byte range before it changes. Commit forces
/// the transaction's pages and then its commit record; rollback and recovery
/// walk the log newest-first restoring pre-images. Nothing is ever redone.
#[derive(Clone)]
pub struct RecoveryManager {
    tx: TxId,
    lm: Arc<LogManager>,
    bm: Arc<BufferManager>,
}

impl RecoveryManager {
    /// Writes the `Start` record for `tx`.
    pub fn new(tx: TxId, lm: Arc<LogManager>, bm: Arc<BufferManager>) -> Result<Self> {
        LogRecord::Start(tx).write_to_log(&lm)?;
        Ok(Self { tx, lm, bm })
    }

    /// Transaction this manager logs for.
    pub fn tx(&self) -> TxId {
        self.tx
    }

    /// Logs the `i64` currently at `offset` in `buf`.
    pub fn set_i64(&self, buf: &Buffer, offset: usize) -> Result<Lsn> {
        let old = buf.contents().get_i64(offset)?;
        LogRecord::SetInt64 {
            tx: self.tx,
            block: mapped_block(buf)?,
            offset,
            old,
        }
        .write_to_log(&self.lm)
    }

    /// Logs the `i8` currently at `offset` in `buf`.
    pub fn set_i8(&self, buf: &Buffer, offset: usize) -> Result<Lsn> {
        let old = buf.contents().get_i8(offset)?;
        LogRecord::SetInt8 {
            tx: self.tx,
            block: mapped_block(buf)?,
            offset,
            old,
        }
        .write_to_log(&self.lm)
    }

    /// Logs the bytes a string of `new_len` bytes at `offset` will overwrite.
    ///
    /// A readable old string is logged as one `SetString`; whatever the new
    /// value reaches beyond it, or the whole range when the current bytes are
    /// not a string, is logged as raw `SetInt64`/`SetInt8` pre-images.
    pub fn set_string(&self, buf: &Buffer, offset: usize, new_len: usize) -> Result<Lsn> {
        let page = buf.contents();
        let block = mapped_block(buf)?;
        let end = offset + Page::max_length(new_len);
        let mut lsn = None;
        let mut pos = offset;
        if let Ok(old) = page.get_string(offset) {
            pos += Page::max_length(old.len());
            lsn = Some(
                LogRecord::SetString {
                    tx: self.tx,
                    block: block.clone(),
                    offset,
                    old,
                }
                .write_to_log(&self.lm)?,
            );
        }
        while pos < end {
            let (record, width) = if end - pos >= 8 {
                let old = page.get_i64(pos)?;
                let record = LogRecord::SetInt64 {
                    tx: self.tx,
                    block: block.clone(),
                    offset: pos,
                    old,
                };
                (record, 8)
            } else {
                let old = page.get_i8(pos)?;
                let record = LogRecord::SetInt8 {
                    tx: self.tx,
                    block: block.clone(),
                    offset: pos,
                    old,
                };
                (record, 1)
            };
            lsn = Some(record.write_to_log(&self.lm)?);
            pos += width;
        }
        lsn.ok_or(DbError::Invalid("string write covers no bytes"))
    }

    /// Flushes the transaction's pages, then makes its commit record durable.
    pub fn commit(&self) -> Result<()> {
        self.bm.flush_all(self.tx)?;
        let lsn = LogRecord::Commit(self.tx).write_to_log(&self.lm)?;
        self.lm.flush(lsn, true)?;
        debug!(tx = self.tx.0, lsn = lsn.0, "recovery.commit");
        Ok(())
    }

    /// Undoes every write of this transaction, newest first, then logs the rollback.
    pub fn rollback(&self, tx: &mut Transaction) -> Result<usize> {
        let mut undone = 0;
        for bytes in self.lm.iter()? {
            let record = LogRecord::decode(&bytes?)?;
            if record.tx() != Some(self.tx) {
                continue;
            }
            if matches!(record, LogRecord::Start(_)) {
                break;
            }
            if record.undo(tx)? {
                undone += 1;
            }
        }
        self.bm.flush_all(self.tx)?;
        let lsn = LogRecord::Rollback(self.tx).write_to_log(&self.lm)?;
        self.lm.flush(lsn, true)?;
        debug!(tx = self.tx.0, undone, "recovery.rollback");
        Ok(undone)
    }

    /// Undoes every write of transactions that never finished, back to the
    /// last checkpoint, then writes a fresh checkpoint.
    ///
    /// Must run before any other transaction modifies data.
    pub fn recover(&self, tx: &mut Transaction) -> Result<usize> {
        let mut finished = HashSet::new();
        let mut undone = 0;
        let mut scanned = 0usize;
        for bytes in self.lm.iter()? {
            let record = LogRecord::decode(&bytes?)?;
            scanned += 1;
            match &record {
                LogRecord::Checkpoint => break,
                LogRecord::Commit(id) | LogRecord::Rollback(id) => {
                    finished.insert(*id);
                }
                LogRecord::Start(_) => {}
                _ => {
                    let Some(owner) = record.tx() else {
                        return Err(DbError::BadLogRecord("update record without owner"));
                    };
                    if !finished.contains(&owner) && record.undo(tx)? {
                        undone += 1;
                        debug!(record = %record, "recovery.undo");
                    }
                }
            }
        }
        self.bm.flush_all(self.tx)?;
        let lsn = LogRecord::Checkpoint.write_to_log(&self.lm)?;
        self.lm.flush(lsn, true)?;
        info!(tx = self.tx.0, scanned, undone, "recovery.recover");
        Ok(undone)
    }
}

fn mapped_block(buf: &Buffer) -> Result<BlockId> {
    buf.block()
        .cloned()
        .ok_or(DbError::Invalid("buffer is not mapped to a block"))
}
