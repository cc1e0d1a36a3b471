//! Low-level primitives for building the storage engine.
//!
//! Includes platform I/O, block-granular file access, the write-ahead log,
//! block locking and the buffer pool.

/// Buffer pool: fixed set of page frames with pin counting.
pub mod buffer;

/// Block-level shared/exclusive locking.
pub mod concurrency;

/// Block-granular file access for one database directory.
pub mod file;

/// I/O abstractions and utilities.
///
/// Interfaces for positional reads and writes against files.
pub mod io;

/// Write-ahead logging (WAL) for crash recovery.
///
/// Ensures durability through sequential logging of database operations.
pub mod wal;
