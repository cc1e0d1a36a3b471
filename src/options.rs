//! Database configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{DbError, Result};

/// Smallest block size that still fits every log record header.
pub const MIN_BLOCK_SIZE: usize = 64;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Durability mode for physical block writes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Synchronous {
    /// fsync after every data or log block write.
    #[default]
    Full,
    /// Leave flushing to the operating system.
    Off,
}

impl Synchronous {
    /// Returns the string representation of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Off => "off",
        }
    }

    /// Parses a mode from a string (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Some(Synchronous::Full),
            "off" => Some(Synchronous::Off),
            _ => None,
        }
    }
}

/// Options used when opening a database directory.
#[derive(Clone, Debug)]
pub struct DbOptions {
    /// Size of every data and log block in bytes.
    pub block_size: usize,
    /// Number of buffers in the fixed pool.
    pub buffer_pool_size: usize,
    /// How long a lock request may wait before aborting.
    pub lock_wait_timeout: Duration,
    /// How long a pin may wait for a free buffer.
    pub max_pin_time: Duration,
    /// Name of the WAL file inside the database directory.
    pub log_file: String,
    /// Durability mode for block writes.
    pub synchronous: Synchronous,
    /// Last transaction id handed out before this process started.
    pub last_tx_id: u64,
    /// Files starting with this prefix are removed when the directory is opened.
    pub temp_prefix: String,
    /// Run crash recovery when opening an existing directory.
    pub recover_on_open: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_pool_size: 64,
            lock_wait_timeout: Duration::from_secs(10),
            max_pin_time: Duration::from_secs(10),
            log_file: "basalt.log".to_string(),
            synchronous: Synchronous::Full,
            last_tx_id: 0,
            temp_prefix: "temp_".to_string(),
            recover_on_open: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    block_size: Option<usize>,
    buffer_pool_size: Option<usize>,
    lock_wait_timeout_ms: Option<u64>,
    max_pin_time_ms: Option<u64>,
    log_file: Option<String>,
    synchronous: Option<String>,
    last_tx_id: Option<u64>,
    temp_prefix: Option<String>,
    recover_on_open: Option<bool>,
}

impl DbOptions {
    /// Parses options from a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawOptions =
            toml::from_str(contents).map_err(|err| DbError::Config(err.to_string()))?;
        let mut opts = DbOptions::default();
        if let Some(block_size) = raw.block_size {
            opts.block_size = block_size;
        }
        if let Some(size) = raw.buffer_pool_size {
            opts.buffer_pool_size = size;
        }
        if let Some(ms) = raw.lock_wait_timeout_ms {
            opts.lock_wait_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.max_pin_time_ms {
            opts.max_pin_time = Duration::from_millis(ms);
        }
        if let Some(log_file) = raw.log_file {
            opts.log_file = log_file;
        }
        if let Some(value) = raw.synchronous {
            opts.synchronous = Synchronous::parse(&value)
                .ok_or_else(|| DbError::Config(format!("invalid synchronous mode '{value}'")))?;
        }
        if let Some(seed) = raw.last_tx_id {
            opts.last_tx_id = seed;
        }
        if let Some(prefix) = raw.temp_prefix {
            opts.temp_prefix = prefix;
        }
        if let Some(recover) = raw.recover_on_open {
            opts.recover_on_open = recover;
        }
        opts.validate()?;
        Ok(opts)
    }

    /// Reads and parses a TOML options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| DbError::Config(format!("failed to read {}: {err}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(DbError::Config(format!(
                "block_size {} is smaller than {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        if i32::try_from(self.block_size).is_err() {
            return Err(DbError::Config("block_size does not fit in 32 bits".into()));
        }
        if self.buffer_pool_size == 0 {
            return Err(DbError::Config("buffer_pool_size must be non-zero".into()));
        }
        if self.log_file.is_empty() {
            return Err(DbError::Config("log_file must not be empty".into()));
        }
        Ok(())
    }
}
