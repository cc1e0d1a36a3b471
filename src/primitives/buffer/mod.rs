#![forbid(unsafe_code)]
//! Fixed-size buffer pool with pin counting and bounded waits.

mod frame;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::primitives::file::FileManager;
use crate::primitives::wal::LogManager;
use crate::types::{BlockId, DbError, Result, TxId};

pub use frame::Buffer;

/// Shared handle to one pool slot.
pub type BufferHandle = Arc<Mutex<Buffer>>;

/// Buffer pool counters.
#[derive(Clone, Debug, Default)]
pub struct BufferPoolStats {
    /// Pins satisfied by a buffer already mapped to the block.
    pub hits: u64,
    /// Pins that had to read the block from disk.
    pub misses: u64,
    /// Dirty pages written back, by eviction or by flush.
    pub writebacks: u64,
    /// Pins that had to wait for a free buffer.
    pub pin_waits: u64,
    /// Pins that gave up with `NoAvailableBuffers`.
    pub pin_timeouts: u64,
    /// Buffers currently unpinned.
    pub available: usize,
}

struct PoolState {
    available: usize,
    stats: BufferPoolStats,
}

/// Owns every buffer for the lifetime of the process.
///
/// Pin and unpin are serialized by the pool mutex; page contents are guarded
/// by each buffer's own mutex. Lock order is always pool, then buffer.
pub struct BufferManager {
    fm: Arc<FileManager>,
    lm: Arc<LogManager>,
    max_pin_time: Duration,
    pool: Vec<BufferHandle>,
    state: Mutex<PoolState>,
    freed: Condvar,
}

impl BufferManager {
    /// Allocates `size` buffers up front.
    pub fn new(
        fm: Arc<FileManager>,
        lm: Arc<LogManager>,
        size: usize,
        max_pin_time: Duration,
    ) -> Result<Self> {
        if size == 0 {
            return Err(DbError::Invalid("buffer pool size must be non-zero"));
        }
        let pool = (0..size)
            .map(|_| Arc::new(Mutex::new(Buffer::new(fm.block_size()))))
            .collect();
        Ok(Self {
            fm,
            lm,
            max_pin_time,
            pool,
            state: Mutex::new(PoolState {
                available: size,
                stats: BufferPoolStats::default(),
            }),
            freed: Condvar::new(),
        })
    }

    /// Number of buffers in the pool.
    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    /// Number of unpinned buffers.
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Snapshot of pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.available = state.available;
        stats
    }

    /// Pins `block`, waiting up to the configured pin time for a free buffer.
    pub fn pin(&self, block: &BlockId) -> Result<BufferHandle> {
        let deadline = Instant::now() + self.max_pin_time;
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            if let Some(idx) = self.try_to_pin(&mut state, block)? {
                return Ok(Arc::clone(&self.pool[idx]));
            }
            if !waited {
                waited = true;
                state.stats.pin_waits += 1;
                debug!(block = %block, "buffer.pin.wait");
            }
            if self.freed.wait_until(&mut state, deadline).timed_out() {
                if let Some(idx) = self.try_to_pin(&mut state, block)? {
                    return Ok(Arc::clone(&self.pool[idx]));
                }
                state.stats.pin_timeouts += 1;
                warn!(
                    block = %block,
                    max_pin_ms = self.max_pin_time.as_millis() as u64,
                    "buffer.pin.timeout"
                );
                return Err(DbError::NoAvailableBuffers);
            }
        }
    }

    /// Drops one pin; a buffer reaching zero pins wakes every waiter.
    pub fn unpin(&self, buffer: &BufferHandle) {
        let mut state = self.state.lock();
        let mut buf = buffer.lock();
        buf.unpin();
        if !buf.is_pinned() {
            state.available += 1;
            drop(buf);
            drop(state);
            self.freed.notify_all();
        }
    }

    /// Writes back every buffer last modified by `tx`, log first.
    pub fn flush_all(&self, tx: TxId) -> Result<()> {
        let mut written = 0u64;
        for handle in &self.pool {
            let mut buf = handle.lock();
            if buf.modifying_tx() == Some(tx) && buf.flush(&self.fm, &self.lm)? {
                written += 1;
            }
        }
        if written > 0 {
            self.state.lock().stats.writebacks += written;
        }
        debug!(tx = tx.0, buffers = written, "buffer.flush_all");
        Ok(())
    }

    fn try_to_pin(&self, state: &mut PoolState, block: &BlockId) -> Result<Option<usize>> {
        let idx = match self.find_existing(block) {
            Some(idx) => {
                state.stats.hits += 1;
                idx
            }
            None => {
                let Some(idx) = self.choose_unpinned() else {
                    return Ok(None);
                };
                let mut buf = self.pool[idx].lock();
                if buf.assign_to_block(block.clone(), &self.fm, &self.lm)? {
                    state.stats.writebacks += 1;
                }
                state.stats.misses += 1;
                idx
            }
        };
        let mut buf = self.pool[idx].lock();
        if !buf.is_pinned() {
            state.available -= 1;
        }
        buf.pin();
        Ok(Some(idx))
    }

    fn find_existing(&self, block: &BlockId) -> Option<usize> {
        self.pool
            .iter()
            .position(|handle| handle.lock().block() == Some(block))
    }

    fn choose_unpinned(&self) -> Option<usize> {
        self.pool
            .iter()
            .position(|handle| !handle.lock().is_pinned())
    }
}
