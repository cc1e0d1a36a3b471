//! Database handle: the shared components behind every transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::options::DbOptions;
use crate::primitives::buffer::{BufferManager, BufferPoolStats};
use crate::primitives::concurrency::LockTable;
use crate::primitives::file::FileManager;
use crate::primitives::wal::{LogManager, WalStats};
use crate::tx::{Transaction, TxIdGenerator};
use crate::types::Result;

/// One open database directory.
///
/// The file manager, log, buffer pool, lock table and id generator are built
/// once here and shared by every transaction through `Arc`.
pub struct Database {
    dir: PathBuf,
    options: DbOptions,
    fm: Arc<FileManager>,
    lm: Arc<LogManager>,
    bm: Arc<BufferManager>,
    locks: Arc<LockTable>,
    ids: TxIdGenerator,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.dir)
            .field("options", &self.options)
            .field("last_tx_id", &self.ids.last())
            .finish()
    }
}

impl Database {
    /// Opens `dir` with default options.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(dir, DbOptions::default())
    }

    /// Opens `dir`, creating it when missing.
    ///
    /// An existing directory is recovered in a fresh transaction unless
    /// `recover_on_open` is off.
    pub fn open_with_options(dir: impl AsRef<Path>, options: DbOptions) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let fm = FileManager::open(
            &dir,
            options.block_size,
            options.synchronous,
            &options.temp_prefix,
        )?;
        let db = Self::assemble(dir, options, fm)?;
        if db.fm.is_new() {
            info!(dir = %db.dir.display(), "db.open.new");
        } else if db.options.recover_on_open {
            let mut tx = db.new_transaction()?;
            let undone = tx.recover()?;
            tx.commit()?;
            info!(dir = %db.dir.display(), undone, "db.open.recovered");
        }
        Ok(db)
    }

    /// Opens an existing `dir` for inspection without changing it.
    ///
    /// Temp files stay, the log is neither created nor rewritten and recovery
    /// does not run. Starting a transaction fails with `ReadOnly`.
    pub fn open_read_only(dir: impl AsRef<Path>, options: DbOptions) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let fm = FileManager::open_read_only(&dir, options.block_size)?;
        let db = Self::assemble(dir, options, fm)?;
        info!(dir = %db.dir.display(), "db.open.read_only");
        Ok(db)
    }

    fn assemble(dir: PathBuf, options: DbOptions, fm: FileManager) -> Result<Self> {
        let fm = Arc::new(fm);
        let lm = Arc::new(LogManager::open(Arc::clone(&fm), options.log_file.as_str())?);
        let bm = Arc::new(BufferManager::new(
            Arc::clone(&fm),
            Arc::clone(&lm),
            options.buffer_pool_size,
            options.max_pin_time,
        )?);
        let locks = Arc::new(LockTable::new(options.lock_wait_timeout));
        let ids = TxIdGenerator::new(options.last_tx_id);
        Ok(Self {
            dir,
            options,
            fm,
            lm,
            bm,
            locks,
            ids,
        })
    }

    /// Starts a transaction with the next id.
    pub fn new_transaction(&self) -> Result<Transaction> {
        Transaction::new(
            self.ids.next_id(),
            Arc::clone(&self.fm),
            Arc::clone(&self.lm),
            Arc::clone(&self.bm),
            Arc::clone(&self.locks),
        )
    }

    /// True when the directory was created by this open.
    pub fn is_new(&self) -> bool {
        self.fm.is_new()
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Options the database was opened with.
    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    /// Last transaction id handed out; persist it to seed the next open.
    pub fn last_tx_id(&self) -> u64 {
        self.ids.last()
    }

    /// Storage manager.
    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.fm
    }

    /// Write-ahead log.
    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.lm
    }

    /// Buffer pool.
    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.bm
    }

    /// Lock table.
    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Snapshot of WAL counters.
    pub fn wal_stats(&self) -> WalStats {
        self.lm.stats()
    }

    /// Snapshot of buffer pool counters.
    pub fn buffer_stats(&self) -> BufferPoolStats {
        self.bm.stats()
    }
}
