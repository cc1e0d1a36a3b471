use std::io;

use thiserror::Error;

use super::{BlockId, TxId};

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, DbError>;

/// Errors surfaced by the storage substrate.
#[derive(Debug, Error)]
pub enum DbError {
    /// Physical I/O failed (disk full, permissions, closed handle).
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    /// A lock wait exceeded the configured timeout.
    #[error("lock abort: timed out waiting for {block}")]
    LockAbort {
        /// Block whose lock could not be acquired.
        block: BlockId,
    },
    /// No buffer became free before the pin deadline.
    #[error("no available buffers")]
    NoAvailableBuffers,
    /// A log record carried an op-code this engine does not know.
    #[error("unknown log record op-code {0}")]
    UnknownLogRecord(i32),
    /// A log record had no bytes at all.
    #[error("empty log record")]
    EmptyLogRecord,
    /// A log record was truncated or otherwise malformed.
    #[error("bad log record: {0}")]
    BadLogRecord(&'static str),
    /// A typed page access fell outside the page.
    #[error("page access out of bounds: offset={offset} len={len} page_size={page_size}")]
    PageOutOfBounds {
        /// Requested start offset.
        offset: usize,
        /// Requested length in bytes.
        len: usize,
        /// Size of the page.
        page_size: usize,
    },
    /// A length-prefixed string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// A record does not fit in an empty log block.
    #[error("log record of {len} bytes exceeds block capacity {capacity}")]
    LogRecordTooLarge {
        /// Encoded record length.
        len: usize,
        /// Bytes available for records in one block.
        capacity: usize,
    },
    /// The transaction already committed or rolled back.
    #[error("transaction {0} is no longer active")]
    TransactionClosed(TxId),
    /// The transaction accessed a block it never pinned.
    #[error("block {0} is not pinned by this transaction")]
    BlockNotPinned(BlockId),
    /// A write was attempted through a read-only open.
    #[error("database is open read-only")]
    ReadOnly,
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be parsed or validated.
    #[error("config: {0}")]
    Config(String),
}

impl DbError {
    /// Returns true for errors after which the transaction must be rolled back.
    pub fn is_fatal_to_transaction(&self) -> bool {
        matches!(
            self,
            DbError::Io(_) | DbError::LockAbort { .. } | DbError::NoAvailableBuffers
        )
    }
}
