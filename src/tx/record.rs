//! Log record kinds and their byte layout.
//!
//! Every record starts with a little-endian `i32` op-code. Transaction
//! records follow it with the `i64` transaction id; update records add the
//! target block (length-prefixed file name, `i32` block number), the `i32`
//! offset and finally the pre-image of the changed value.

use std::fmt;

use crate::primitives::wal::LogManager;
use crate::tx::Transaction;
use crate::types::{BlockId, DbError, Lsn, Page, Result, TxId};

const CHECKPOINT: i32 = 0;
const START: i32 = 1;
const COMMIT: i32 = 2;
const ROLLBACK: i32 = 3;
const SET_INT64: i32 = 4;
const SET_STRING: i32 = 5;
const SET_INT8: i32 = 6;

const OP_LEN: usize = 4;
const TX_LEN: usize = 8;

/// One entry of the write-ahead log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
    /// Recovery need not look further back than this record.
    Checkpoint,
    /// Transaction began.
    Start(TxId),
    /// Transaction committed.
    Commit(TxId),
    /// Transaction finished rolling back.
    Rollback(TxId),
    /// Pre-image of an `i64` about to be overwritten.
    SetInt64 {
        /// Writing transaction.
        tx: TxId,
        /// Block holding the value.
        block: BlockId,
        /// Byte offset inside the block.
        offset: usize,
        /// Value before the write.
        old: i64,
    },
    /// Pre-image of a string about to be overwritten.
    SetString {
        /// Writing transaction.
        tx: TxId,
        /// Block holding the value.
        block: BlockId,
        /// Byte offset inside the block.
        offset: usize,
        /// Value before the write.
        old: String,
    },
    /// Pre-image of an `i8` about to be overwritten.
    SetInt8 {
        /// Writing transaction.
        tx: TxId,
        /// Block holding the value.
        block: BlockId,
        /// Byte offset inside the block.
        offset: usize,
        /// Value before the write.
        old: i8,
    },
}

impl LogRecord {
    /// Stable upper-case name of the record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::Checkpoint => "CHECKPOINT",
            LogRecord::Start(_) => "START",
            LogRecord::Commit(_) => "COMMIT",
            LogRecord::Rollback(_) => "ROLLBACK",
            LogRecord::SetInt64 { .. } => "SETINT64",
            LogRecord::SetString { .. } => "SETSTRING",
            LogRecord::SetInt8 { .. } => "SETINT8",
        }
    }

    fn op_code(&self) -> i32 {
        match self {
            LogRecord::Checkpoint => CHECKPOINT,
            LogRecord::Start(_) => START,
            LogRecord::Commit(_) => COMMIT,
            LogRecord::Rollback(_) => ROLLBACK,
            LogRecord::SetInt64 { .. } => SET_INT64,
            LogRecord::SetString { .. } => SET_STRING,
            LogRecord::SetInt8 { .. } => SET_INT8,
        }
    }

    /// Transaction the record belongs to; `None` for checkpoints.
    pub fn tx(&self) -> Option<TxId> {
        match self {
            LogRecord::Checkpoint => None,
            LogRecord::Start(tx) | LogRecord::Commit(tx) | LogRecord::Rollback(tx) => Some(*tx),
            LogRecord::SetInt64 { tx, .. }
            | LogRecord::SetString { tx, .. }
            | LogRecord::SetInt8 { tx, .. } => Some(*tx),
        }
    }

    /// True for the records that carry a pre-image.
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            LogRecord::SetInt64 { .. } | LogRecord::SetString { .. } | LogRecord::SetInt8 { .. }
        )
    }

    /// Serializes the record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut page = Page::new(self.encoded_len());
        page.set_i32(0, self.op_code())?;
        match self {
            LogRecord::Checkpoint => {}
            LogRecord::Start(tx) | LogRecord::Commit(tx) | LogRecord::Rollback(tx) => {
                page.set_i64(OP_LEN, tx_to_raw(*tx)?)?;
            }
            LogRecord::SetInt64 {
                tx,
                block,
                offset,
                old,
            } => {
                let pos = encode_target(&mut page, *tx, block, *offset)?;
                page.set_i64(pos, *old)?;
            }
            LogRecord::SetString {
                tx,
                block,
                offset,
                old,
            } => {
                let pos = encode_target(&mut page, *tx, block, *offset)?;
                page.set_string(pos, old)?;
            }
            LogRecord::SetInt8 {
                tx,
                block,
                offset,
                old,
            } => {
                let pos = encode_target(&mut page, *tx, block, *offset)?;
                page.set_i8(pos, *old)?;
            }
        }
        Ok(page.contents().to_vec())
    }

    /// Rebuilds a record from the bytes produced by [`LogRecord::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(DbError::EmptyLogRecord);
        }
        if bytes.len() < OP_LEN {
            return Err(DbError::BadLogRecord("truncated op-code"));
        }
        let page = Page::from_bytes(bytes.to_vec());
        let op = page.get_i32(0)?;
        let record = match op {
            CHECKPOINT => LogRecord::Checkpoint,
            START => LogRecord::Start(decode_tx(&page)?),
            COMMIT => LogRecord::Commit(decode_tx(&page)?),
            ROLLBACK => LogRecord::Rollback(decode_tx(&page)?),
            SET_INT64 => {
                let (tx, block, offset, pos) = decode_target(&page)?;
                let old = page.get_i64(pos).map_err(truncated)?;
                LogRecord::SetInt64 {
                    tx,
                    block,
                    offset,
                    old,
                }
            }
            SET_STRING => {
                let (tx, block, offset, pos) = decode_target(&page)?;
                let old = page.get_string(pos).map_err(truncated)?;
                LogRecord::SetString {
                    tx,
                    block,
                    offset,
                    old,
                }
            }
            SET_INT8 => {
                let (tx, block, offset, pos) = decode_target(&page)?;
                let old = page.get_i8(pos).map_err(truncated)?;
                LogRecord::SetInt8 {
                    tx,
                    block,
                    offset,
                    old,
                }
            }
            other => return Err(DbError::UnknownLogRecord(other)),
        };
        Ok(record)
    }

    /// Encodes the record and appends it to the log.
    pub fn write_to_log(&self, lm: &LogManager) -> Result<Lsn> {
        lm.append(&self.encode()?)
    }

    /// Restores the pre-image through `tx`, without logging.
    ///
    /// Returns false for records that carry nothing to undo.
    pub fn undo(&self, tx: &mut Transaction) -> Result<bool> {
        let block = match self {
            LogRecord::SetInt64 { block, .. }
            | LogRecord::SetString { block, .. }
            | LogRecord::SetInt8 { block, .. } => block,
            _ => return Ok(false),
        };
        tx.pin_raw(block)?;
        let restored = match self {
            LogRecord::SetInt64 { offset, old, .. } => tx.set_i64_raw(block, *offset, *old, false),
            LogRecord::SetString { offset, old, .. } => {
                tx.set_string_raw(block, *offset, old, false)
            }
            LogRecord::SetInt8 { offset, old, .. } => tx.set_i8_raw(block, *offset, *old, false),
            _ => Ok(()),
        };
        // unpin even when the write failed so the pool is not leaked
        tx.unpin_raw(block)?;
        restored.map(|()| true)
    }

    fn encoded_len(&self) -> usize {
        let target = |block: &BlockId| {
            OP_LEN + TX_LEN + Page::max_length(block.filename().len()) + 4 + 4
        };
        match self {
            LogRecord::Checkpoint => OP_LEN,
            LogRecord::Start(_) | LogRecord::Commit(_) | LogRecord::Rollback(_) => {
                OP_LEN + TX_LEN
            }
            LogRecord::SetInt64 { block, .. } => target(block) + 8,
            LogRecord::SetString { block, old, .. } => target(block) + Page::max_length(old.len()),
            LogRecord::SetInt8 { block, .. } => target(block) + 1,
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Checkpoint => write!(f, "<CHECKPOINT>"),
            LogRecord::Start(tx) | LogRecord::Commit(tx) | LogRecord::Rollback(tx) => {
                write!(f, "<{} {}>", self.kind(), tx)
            }
            LogRecord::SetInt64 {
                tx,
                block,
                offset,
                old,
            } => write!(f, "<{} {} {} {} {}>", self.kind(), tx, block, offset, old),
            LogRecord::SetString {
                tx,
                block,
                offset,
                old,
            } => write!(f, "<{} {} {} {} {}>", self.kind(), tx, block, offset, old),
            LogRecord::SetInt8 {
                tx,
                block,
                offset,
                old,
            } => write!(f, "<{} {} {} {} {}>", self.kind(), tx, block, offset, old),
        }
    }
}

fn truncated(_: DbError) -> DbError {
    DbError::BadLogRecord("record body truncated")
}

fn tx_to_raw(tx: TxId) -> Result<i64> {
    i64::try_from(tx.0).map_err(|_| DbError::Invalid("transaction id exceeds i64"))
}

fn decode_tx(page: &Page) -> Result<TxId> {
    let raw = page.get_i64(OP_LEN).map_err(truncated)?;
    u64::try_from(raw)
        .map(TxId)
        .map_err(|_| DbError::BadLogRecord("negative transaction id"))
}

fn encode_target(page: &mut Page, tx: TxId, block: &BlockId, offset: usize) -> Result<usize> {
    let offset = i32::try_from(offset).map_err(|_| DbError::Invalid("offset exceeds i32"))?;
    page.set_i64(OP_LEN, tx_to_raw(tx)?)?;
    let mut pos = OP_LEN + TX_LEN;
    page.set_string(pos, block.filename())?;
    pos += Page::max_length(block.filename().len());
    page.set_i32(pos, block.number() as i32)?;
    page.set_i32(pos + 4, offset)?;
    Ok(pos + 8)
}

fn decode_target(page: &Page) -> Result<(TxId, BlockId, usize, usize)> {
    let tx = decode_tx(page)?;
    let mut pos = OP_LEN + TX_LEN;
    let filename = page.get_string(pos).map_err(|err| match err {
        DbError::InvalidUtf8 => DbError::BadLogRecord("file name is not UTF-8"),
        other => truncated(other),
    })?;
    pos += Page::max_length(filename.len());
    let number = page.get_i32(pos).map_err(truncated)? as u32;
    let offset = page.get_i32(pos + 4).map_err(truncated)?;
    let offset =
        usize::try_from(offset).map_err(|_| DbError::BadLogRecord("negative record offset"))?;
    Ok((tx, BlockId::new(filename, number), offset, pos + 8))
}
