use crate::primitives::file::FileManager;
use crate::primitives::wal::LogManager;
use crate::types::{BlockId, Lsn, Page, Result, TxId};

/// One pool slot: a page image, the block it maps, and dirty bookkeeping.
pub struct Buffer {
    page: Page,
    block: Option<BlockId>,
    pins: u32,
    modifying_tx: Option<TxId>,
    lsn: Option<Lsn>,
}

impl Buffer {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            page: Page::new(block_size),
            block: None,
            pins: 0,
            modifying_tx: None,
            lsn: None,
        }
    }

    /// Page image held by this buffer.
    pub fn contents(&self) -> &Page {
        &self.page
    }

    /// Mutable page image; callers must stamp [`Buffer::set_modified`].
    pub fn contents_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    /// Block currently mapped, if any.
    pub fn block(&self) -> Option<&BlockId> {
        self.block.as_ref()
    }

    /// Records that `tx` changed the page; `lsn` is the log record covering it.
    pub fn set_modified(&mut self, tx: TxId, lsn: Option<Lsn>) {
        self.modifying_tx = Some(tx);
        if let Some(lsn) = lsn {
            self.lsn = Some(lsn);
        }
    }

    /// True while at least one holder has the buffer pinned.
    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    /// Number of outstanding pins.
    pub fn pins(&self) -> u32 {
        self.pins
    }

    /// Transaction with unflushed changes in this buffer.
    pub fn modifying_tx(&self) -> Option<TxId> {
        self.modifying_tx
    }

    /// LSN of the latest logged change not yet written out.
    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }

    /// Writes the page back if dirty, forcing its log records first.
    ///
    /// Returns true when a write happened.
    pub(crate) fn flush(&mut self, fm: &FileManager, lm: &LogManager) -> Result<bool> {
        let (Some(_), Some(block)) = (self.modifying_tx, self.block.as_ref()) else {
            return Ok(false);
        };
        if let Some(lsn) = self.lsn {
            lm.flush(lsn, false)?;
        }
        fm.write(block, &self.page)?;
        self.modifying_tx = None;
        self.lsn = None;
        Ok(true)
    }

    /// Remaps the slot to `block`, writing back the old contents first.
    pub(crate) fn assign_to_block(
        &mut self,
        block: BlockId,
        fm: &FileManager,
        lm: &LogManager,
    ) -> Result<bool> {
        debug_assert!(!self.is_pinned(), "pinned buffer cannot be remapped");
        let wrote_back = self.flush(fm, lm)?;
        self.block = None;
        fm.read(&block, &mut self.page)?;
        self.block = Some(block);
        self.pins = 0;
        Ok(wrote_back)
    }

    pub(crate) fn pin(&mut self) {
        self.pins += 1;
    }

    pub(crate) fn unpin(&mut self) {
        self.pins = self.pins.saturating_sub(1);
    }
}
