use super::*;
use crate::wal::LogManager;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

pub(crate) type PageRef = Arc<RwLock<Page>>;

/// Builds the initial content of a freshly allocated block.
pub trait PageFormatter {
    fn format(&self, page: &mut [u8]);
}

/// Formats a new block as all zeroes.
pub struct ZeroFormatter;

impl PageFormatter for ZeroFormatter {
    fn format(&self, page: &mut [u8]) {
        page.fill(0);
    }
}

/// The in-memory image of one block.
#[derive(Debug)]
pub struct Page {
    contents: Box<[u8]>,
}

impl Page {
    fn new(block_size: usize) -> Self {
        Self {
            contents: vec![0u8; block_size].into_boxed_slice(),
        }
    }
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
    /// callers changing the page must `mark_modified` it through the pool
    /// before they drop the write guard
    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.contents
    }
    /// Overwrite the page with the pre-image saved at `offset`.
    pub fn restore(&mut self, store: &dyn UndoStore, offset: u64) -> Result<(), StorageError> {
        store.load(offset, &mut self.contents)
    }
}

/// Handle to a pinned frame, as returned by the pool. The page lock only
/// guards the contents; a guard may be held while calling into the pool.
#[derive(Clone, Debug)]
pub struct FrameRef {
    id: FrameID,
    block: BlockId,
    page: PageRef,
}

impl FrameRef {
    pub(crate) fn new(id: FrameID, block: BlockId, page: PageRef) -> Self {
        Self { id, block, page }
    }
    pub fn id(&self) -> FrameID {
        self.id
    }
    pub fn block(&self) -> &BlockId {
        &self.block
    }
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn same_frame(&self, other: &FrameRef) -> bool {
        Arc::ptr_eq(&self.page, &other.page)
    }
}

/// Bookkeeping of one slot of the buffer pool, owned by the pool and
/// changed only under its lock. The image itself sits behind `page`.
#[derive(Clone, Debug)]
pub struct BufferFrame {
    id: FrameID,
    /// `Some` iff the page is a valid image of that block
    block: Option<BlockId>,
    pin_count: usize,
    reference_value: usize,
    modified_by: HashSet<TxnID>,
    /// newest log record describing a change of this frame
    lsn: Option<Lsn>,
    page: PageRef,
}

impl BufferFrame {
    pub fn new(id: FrameID, block_size: usize) -> Self {
        Self {
            id,
            block: None,
            pin_count: 0,
            reference_value: 0,
            modified_by: HashSet::new(),
            lsn: None,
            page: Arc::new(RwLock::new(Page::new(block_size))),
        }
    }
    pub fn id(&self) -> FrameID {
        self.id
    }
    pub fn block(&self) -> Option<&BlockId> {
        self.block.as_ref()
    }
    pub fn pin_count(&self) -> usize {
        self.pin_count
    }
    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }
    pub fn reference_value(&self) -> usize {
        self.reference_value
    }
    pub fn is_modified_by(&self, txn: TxnID) -> bool {
        self.modified_by.contains(&txn)
    }
    pub fn is_dirty(&self) -> bool {
        !self.modified_by.is_empty()
    }
    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }
    /// someone holds the page lock
    pub fn is_latched(&self) -> bool {
        matches!(self.page.try_write(), Err(TryLockError::WouldBlock))
    }
    pub fn mark_modified(&mut self, txn: TxnID, lsn: Option<Lsn>) {
        self.modified_by.insert(txn);
        if let Some(lsn) = lsn {
            self.lsn = Some(self.lsn.map_or(lsn, |current| current.max(lsn)));
        }
    }

    pub(crate) fn page(&self) -> &PageRef {
        &self.page
    }
    /// `frame` was handed out for this slot and the slot still holds its block
    pub(crate) fn holds(&self, frame: &FrameRef) -> bool {
        Arc::ptr_eq(&self.page, &frame.page) && self.block.as_ref() == Some(&frame.block)
    }
    pub(crate) fn handle(&self, block: BlockId) -> FrameRef {
        FrameRef::new(self.id, block, self.page.clone())
    }
    /// Write `page`, the image of this frame, back if any transaction
    /// modified it. The log is forced up to the newest record of this
    /// page first.
    pub(crate) fn flush(
        &mut self,
        page: &Page,
        disk: &FileManager,
        log: &LogManager,
    ) -> Result<(), StorageError> {
        if let Some(block) = &self.block {
            if self.is_dirty() {
                if let Some(lsn) = self.lsn {
                    log.flush(lsn)?;
                }
                disk.write(block, page.contents())?;
                self.modified_by.clear();
                self.lsn = None;
            }
        }
        Ok(())
    }
    pub(crate) fn pin(&mut self) {
        self.pin_count += 1;
    }
    pub(crate) fn unpin(&mut self) -> Result<(), StorageError> {
        if self.pin_count == 0 {
            return Err(StorageError::UnbalancedUnpin(self.id));
        }
        self.pin_count -= 1;
        Ok(())
    }
    pub(crate) fn init_reference(&mut self, default_ref_count: usize) {
        self.reference_value = default_ref_count;
    }
    pub(crate) fn decay_reference(&mut self) {
        self.reference_value = self.reference_value.saturating_sub(1);
    }
    /// load `block` from disk into `page`, the old content must already be flushed
    pub(crate) fn assign_to_block(
        &mut self,
        page: &mut Page,
        block: BlockId,
        disk: &FileManager,
    ) -> Result<(), StorageError> {
        debug_assert!(!self.is_dirty());
        self.block = None;
        disk.read(&block, &mut page.contents)?;
        self.block = Some(block);
        Ok(())
    }
    /// format `page` and append it as a new block of `file_name`
    pub(crate) fn assign_to_new(
        &mut self,
        page: &mut Page,
        file_name: &str,
        formatter: &dyn PageFormatter,
        disk: &FileManager,
    ) -> Result<BlockId, StorageError> {
        debug_assert!(!self.is_dirty());
        self.block = None;
        formatter.format(&mut page.contents);
        let block = disk.append(file_name, &page.contents)?;
        self.block = Some(block.clone());
        Ok(block)
    }
}
