//! Basalt: the transactional storage core of an embeddable database.
//!
//! Fixed-size block I/O, an undo-only write-ahead log, a pinned buffer pool
//! and block-level two-phase locking, wrapped by a [`Transaction`] façade.

#![warn(missing_docs)]

pub mod admin;
pub mod db;
pub mod options;
pub mod primitives;
pub mod tx;
pub mod types;

pub use db::Database;
pub use options::{DbOptions, Synchronous};
pub use tx::{LogRecord, Transaction, TxState};
pub use types::{BlockId, DbError, Lsn, Page, Result, TxId};
