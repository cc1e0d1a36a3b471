#![forbid(unsafe_code)]
//! Block-granular access to the files of one database directory.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::options::Synchronous;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{BlockId, DbError, Page, Result};

/// Storage manager: reads, writes and appends whole blocks.
///
/// Every operation runs under one mutex, so physical I/O on a manager is
/// fully serialized. Throughput comes from the buffer pool sitting above.
pub struct FileManager {
    db_dir: PathBuf,
    block_size: usize,
    synchronous: Synchronous,
    is_new: bool,
    read_only: bool,
    open_files: Mutex<HashMap<String, Arc<dyn FileIo>>>,
}

impl FileManager {
    /// Opens (or creates) `db_dir` and removes leftover temp files.
    pub fn open(
        db_dir: impl AsRef<Path>,
        block_size: usize,
        synchronous: Synchronous,
        temp_prefix: &str,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(DbError::Invalid("block size must be non-zero"));
        }
        let db_dir = db_dir.as_ref().to_path_buf();
        let is_new = !db_dir.exists();
        if is_new {
            fs::create_dir_all(&db_dir)?;
            info!(dir = %db_dir.display(), "file.open.created");
        }
        if !temp_prefix.is_empty() {
            for entry in fs::read_dir(&db_dir)? {
                let entry = entry?;
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(temp_prefix) && entry.path().is_file() {
                    fs::remove_file(entry.path())?;
                    debug!(file = %name.to_string_lossy(), "file.open.removed_temp");
                }
            }
        }
        Ok(Self {
            db_dir,
            block_size,
            synchronous,
            is_new,
            read_only: false,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    /// Opens an existing `db_dir` without changing anything in it.
    ///
    /// Temp files are left alone, files are opened read-only and missing
    /// files behave as empty. Writes and appends fail with `ReadOnly`.
    pub fn open_read_only(db_dir: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(DbError::Invalid("block size must be non-zero"));
        }
        let db_dir = db_dir.as_ref().to_path_buf();
        if !db_dir.is_dir() {
            return Err(DbError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{} is not a database directory", db_dir.display()),
            )));
        }
        debug!(dir = %db_dir.display(), "file.open.read_only");
        Ok(Self {
            db_dir,
            block_size,
            synchronous: Synchronous::Off,
            is_new: false,
            read_only: true,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    /// Size of every block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// True when the directory did not exist before [`FileManager::open`].
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// True when opened through [`FileManager::open_read_only`].
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Directory holding the database files.
    pub fn dir(&self) -> &Path {
        &self.db_dir
    }

    /// Reads `block` into `page`; bytes past the end of the file read as zero.
    pub fn read(&self, block: &BlockId, page: &mut Page) -> Result<()> {
        self.check_page(page)?;
        let mut files = self.open_files.lock();
        let Some(file) = self.file(&mut files, block.filename())? else {
            page.clear();
            return Ok(());
        };
        match file.read_at(self.offset(block), page.contents_mut()) {
            Ok(()) => Ok(()),
            Err(DbError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                page.clear();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Writes `page` to `block`.
    pub fn write(&self, block: &BlockId, page: &Page) -> Result<()> {
        self.check_page(page)?;
        let mut files = self.open_files.lock();
        let file = self.writable_file(&mut files, block.filename())?;
        file.write_at(self.offset(block), page.contents())?;
        if self.synchronous == Synchronous::Full {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Extends `filename` by one zero-filled block and returns its address.
    pub fn append(&self, filename: &str) -> Result<BlockId> {
        let mut files = self.open_files.lock();
        let file = self.writable_file(&mut files, filename)?;
        let number = self.blocks_in(file.as_ref())?;
        let block = BlockId::new(filename, number);
        file.write_at(self.offset(&block), &vec![0u8; self.block_size])?;
        if self.synchronous == Synchronous::Full {
            file.sync_data()?;
        }
        debug!(block = %block, "file.append");
        Ok(block)
    }

    /// Number of whole blocks in `filename`.
    pub fn length(&self, filename: &str) -> Result<u32> {
        let mut files = self.open_files.lock();
        match self.file(&mut files, filename)? {
            Some(file) => self.blocks_in(file.as_ref()),
            None => Ok(0),
        }
    }

    fn blocks_in(&self, file: &dyn FileIo) -> Result<u32> {
        u32::try_from(file.len()? / self.block_size as u64)
            .map_err(|_| DbError::Invalid("file exceeds addressable block count"))
    }

    fn offset(&self, block: &BlockId) -> u64 {
        u64::from(block.number()) * self.block_size as u64
    }

    fn check_page(&self, page: &Page) -> Result<()> {
        if page.len() != self.block_size {
            return Err(DbError::Invalid("page size does not match block size"));
        }
        Ok(())
    }

    /// Handle for `filename`; `None` only for a missing file in read-only mode.
    fn file(
        &self,
        files: &mut HashMap<String, Arc<dyn FileIo>>,
        filename: &str,
    ) -> Result<Option<Arc<dyn FileIo>>> {
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(DbError::Invalid("file name must be a plain name"));
        }
        if let Some(file) = files.get(filename) {
            return Ok(Some(Arc::clone(file)));
        }
        let path = self.db_dir.join(filename);
        let file: Arc<dyn FileIo> = if self.read_only {
            match StdFileIo::open_read_only(&path) {
                Ok(file) => Arc::new(file),
                Err(DbError::Io(err)) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err),
            }
        } else {
            Arc::new(StdFileIo::open(&path)?)
        };
        files.insert(filename.to_string(), Arc::clone(&file));
        Ok(Some(file))
    }

    fn writable_file(
        &self,
        files: &mut HashMap<String, Arc<dyn FileIo>>,
        filename: &str,
    ) -> Result<Arc<dyn FileIo>> {
        if self.read_only {
            return Err(DbError::ReadOnly);
        }
        self.file(files, filename)?.ok_or(DbError::ReadOnly)
    }
}
