#![forbid(unsafe_code)]

//! Database administration utilities.
//!
//! Each command opens an existing database directory, does its work and
//! returns a serializable report the CLI prints as text or JSON. `log` and
//! `stats` open read-only and never change the directory.

mod dump;
mod error;
mod recover;
mod stats;

use std::path::Path;

use crate::db::Database;
use crate::options::DbOptions;

pub use error::{AdminError, Result};

/// Dump of every log record, newest first.
pub use dump::{dump_log, LogEntry, LogReport};

/// Explicit crash recovery.
pub use recover::{recover, RecoverReport};

/// Size and counter overview.
pub use stats::{stats, BufferSection, FileStats, StatsReport, WalSection};

/// Opens `dir` for writing without running recovery on open.
pub(crate) fn open_existing(dir: &Path, opts: &DbOptions) -> Result<Database> {
    ensure_database_dir(dir)?;
    let opts = DbOptions {
        recover_on_open: false,
        ..opts.clone()
    };
    Ok(Database::open_with_options(dir, opts)?)
}

/// Opens `dir` read-only; inspection leaves every file untouched.
pub(crate) fn open_for_inspection(dir: &Path, opts: &DbOptions) -> Result<Database> {
    ensure_database_dir(dir)?;
    Ok(Database::open_read_only(dir, opts.clone())?)
}

fn ensure_database_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Err(AdminError::MissingDatabase(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(AdminError::NotADirectory(dir.to_path_buf()));
    }
    Ok(())
}
