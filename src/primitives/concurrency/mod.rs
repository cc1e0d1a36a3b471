#![forbid(unsafe_code)]
//! Block-level two-phase locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::types::{BlockId, DbError, Result};

const EXCLUSIVE: i32 = -1;

/// Kind of lock a transaction holds on a block.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LockMode {
    /// Shared (read) lock.
    Shared,
    /// Exclusive (write) lock.
    Exclusive,
}

/// Snapshot of one block's lock state for observability.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockSnapshot {
    /// Nobody holds a lock.
    Unlocked,
    /// Number of shared holders.
    Shared(u32),
    /// One exclusive holder.
    Exclusive,
}

/// Process-wide lock table.
///
/// Each entry is a shared-holder count, or `-1` for an exclusive holder.
/// Waiters sleep on one condition variable, re-check their predicate on every
/// broadcast and give up with [`DbError::LockAbort`] once the deadline passes.
pub struct LockTable {
    timeout: Duration,
    locks: Mutex<HashMap<BlockId, i32>>,
    released: Condvar,
}

impl LockTable {
    /// Creates an empty table whose waits are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    /// Acquires a shared lock, waiting while an exclusive lock is held.
    pub fn slock(&self, block: &BlockId) -> Result<()> {
        let mut locks = self.wait_while(block, |val| val == EXCLUSIVE, "lock.slock.abort")?;
        *locks.entry(block.clone()).or_insert(0) += 1;
        Ok(())
    }

    /// Acquires an exclusive lock.
    ///
    /// The caller is expected to hold a shared lock on `block` already, so
    /// the wait ends once it is the only shared holder left.
    pub fn xlock(&self, block: &BlockId) -> Result<()> {
        let mut locks = self.wait_while(block, |val| val > 1 || val == EXCLUSIVE, "lock.xlock.abort")?;
        locks.insert(block.clone(), EXCLUSIVE);
        Ok(())
    }

    /// Releases one lock on `block` and wakes every waiter.
    pub fn unlock(&self, block: &BlockId) {
        let mut locks = self.locks.lock();
        match locks.get_mut(block) {
            Some(val) if *val > 1 => *val -= 1,
            Some(_) => {
                locks.remove(block);
            }
            None => {}
        }
        drop(locks);
        self.released.notify_all();
    }

    /// Returns the current lock state of `block`.
    pub fn snapshot(&self, block: &BlockId) -> LockSnapshot {
        match self.locks.lock().get(block).copied() {
            None | Some(0) => LockSnapshot::Unlocked,
            Some(EXCLUSIVE) => LockSnapshot::Exclusive,
            Some(n) => LockSnapshot::Shared(n.unsigned_abs()),
        }
    }

    fn wait_while(
        &self,
        block: &BlockId,
        conflicts: impl Fn(i32) -> bool,
        abort_event: &'static str,
    ) -> Result<MutexGuard<'_, HashMap<BlockId, i32>>> {
        let deadline = Instant::now() + self.timeout;
        let mut locks = self.locks.lock();
        while conflicts(locks.get(block).copied().unwrap_or(0)) {
            if self.released.wait_until(&mut locks, deadline).timed_out() {
                if conflicts(locks.get(block).copied().unwrap_or(0)) {
                    warn!(block = %block, timeout_ms = self.timeout.as_millis() as u64, "{}", abort_event);
                    return Err(DbError::LockAbort {
                        block: block.clone(),
                    });
                }
                break;
            }
        }
        Ok(locks)
    }
}

/// Per-transaction ledger of held locks.
///
/// Avoids asking the shared table twice for the same block and releases
/// everything in one sweep at end of transaction.
pub struct ConcurrencyManager {
    table: Arc<LockTable>,
    held: HashMap<BlockId, LockMode>,
}

impl ConcurrencyManager {
    /// Creates an empty ledger over the shared `table`.
    pub fn new(table: Arc<LockTable>) -> Self {
        Self {
            table,
            held: HashMap::new(),
        }
    }

    /// Takes a shared lock unless any lock on `block` is already held.
    pub fn slock(&mut self, block: &BlockId) -> Result<()> {
        if !self.held.contains_key(block) {
            self.table.slock(block)?;
            self.held.insert(block.clone(), LockMode::Shared);
        }
        Ok(())
    }

    /// Takes an exclusive lock, acquiring the shared lock first when needed.
    pub fn xlock(&mut self, block: &BlockId) -> Result<()> {
        if self.held.get(block) != Some(&LockMode::Exclusive) {
            self.slock(block)?;
            self.table.xlock(block)?;
            self.held.insert(block.clone(), LockMode::Exclusive);
        }
        Ok(())
    }

    /// Releases every lock this transaction holds.
    pub fn release(&mut self) {
        let count = self.held.len();
        for (block, _) in self.held.drain() {
            self.table.unlock(&block);
        }
        debug!(locks = count, "lock.release");
    }

    /// Lock currently held on `block`, if any.
    pub fn held(&self, block: &BlockId) -> Option<LockMode> {
        self.held.get(block).copied()
    }

    /// Number of blocks this transaction holds a lock on.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}
