use super::clock::GClockReplacer;
use super::*;
use crate::wal::LogManager;
use itertools::Itertools;
use log::{debug, info, trace};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPoolConfig {
    pub num_buffers: usize,
    /// reference value of a frame when it is assigned or unpinned
    pub default_ref_count: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            num_buffers: DEFAULT_NUM_BUFFERS,
            default_ref_count: DEFAULT_REF_COUNT,
        }
    }
}

/// `BufferPoolManager` owns a fixed set of frames and maps blocks onto
/// them. The bookkeeping of every frame lives under one pool-wide lock,
/// and no pool operation waits for a page lock while holding it. When no
/// frame can be freed `pin` fails right away with `ResourceExhausted`,
/// waiting and retrying is up to the caller.
pub struct BufferPoolManager {
    disk: Arc<FileManager>,
    log: Arc<LogManager>,
    default_ref_count: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    frames: Vec<BufferFrame>,
    page_table: HashMap<BlockId, FrameID>,
    replacer: GClockReplacer,
    num_available: usize,
}

impl PoolState {
    /// the slot `frame` was handed out for, as long as it still holds that block
    fn slot(&mut self, frame: &FrameRef) -> Result<&mut BufferFrame, StorageError> {
        match self.frames.get_mut(frame.id()) {
            Some(slot) if slot.holds(frame) => Ok(slot),
            _ => Err(StorageError::StaleFrame(frame.id())),
        }
    }
    fn pin_slot(&mut self, frame_id: FrameID, block: BlockId) -> FrameRef {
        let frame = &mut self.frames[frame_id];
        if !frame.is_pinned() {
            self.num_available -= 1;
        }
        frame.pin();
        let handle = frame.handle(block.clone());
        self.page_table.insert(block, frame_id);
        handle
    }
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, disk: Arc<FileManager>, log: Arc<LogManager>) -> Self {
        let size = config.num_buffers;
        let frames = (0..size)
            .map(|frame_id| BufferFrame::new(frame_id, disk.block_size()))
            .collect_vec();
        info!(
            "created {} buffers, default reference value {}",
            size, config.default_ref_count
        );
        Self {
            disk,
            log,
            default_ref_count: config.default_ref_count,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                replacer: GClockReplacer::new(size),
                num_available: size,
            }),
        }
    }
    pub fn disk(&self) -> &Arc<FileManager> {
        &self.disk
    }
    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }
    pub fn default_ref_count(&self) -> usize {
        self.default_ref_count
    }
    pub fn num_buffers(&self) -> usize {
        self.lock().frames.len()
    }

    /// Pin a frame holding `block`, reading it from disk if it is not
    /// cached yet.
    pub fn pin(&self, block: &BlockId) -> Result<FrameRef, StorageError> {
        let mut state = self.lock();
        let cached = state.page_table.get(block).copied();
        let frame_id = match cached {
            Some(frame_id) => {
                trace!("pin {}: hit frame {}", block, frame_id);
                frame_id
            }
            None => {
                let (frame_id, ()) = self.replace(&mut state, block, |frame, page| {
                    frame.assign_to_block(page, block.clone(), &self.disk)
                })?;
                debug!("pin {}: loaded into frame {}", block, frame_id);
                frame_id
            }
        };
        Ok(state.pin_slot(frame_id, block.clone()))
    }

    /// Allocate a new block at the end of `file_name`, formatted by
    /// `formatter`, and pin it. Nothing is allocated if no frame is free.
    pub fn pin_new(
        &self,
        file_name: &str,
        formatter: &dyn PageFormatter,
    ) -> Result<FrameRef, StorageError> {
        let mut state = self.lock();
        let wanted = format!("new block of {}", file_name);
        let (frame_id, block) = self.replace(&mut state, &wanted, |frame, page| {
            frame.assign_to_new(page, file_name, formatter, &self.disk)
        })?;
        debug!("pin_new: {} allocated in frame {}", block, frame_id);
        Ok(state.pin_slot(frame_id, block))
    }

    /// The frame stays cached after its last unpin until the clock
    /// hand wears its reference value down.
    pub fn unpin(&self, frame: &FrameRef) -> Result<(), StorageError> {
        let mut state = self.lock();
        let slot = state.slot(frame)?;
        slot.unpin()?;
        if !slot.is_pinned() {
            slot.init_reference(self.default_ref_count);
            state.num_available += 1;
        }
        Ok(())
    }

    /// Record that `txn` changed the page of `frame`, as described by the
    /// log record at `lsn` if there is one. Call it before dropping the
    /// page's write guard.
    pub fn mark_modified(
        &self,
        frame: &FrameRef,
        txn: TxnID,
        lsn: Option<Lsn>,
    ) -> Result<(), StorageError> {
        self.lock().slot(frame)?.mark_modified(txn, lsn);
        Ok(())
    }

    /// Write back every frame modified by `txn`, pinned or not. Waiting
    /// for a page lock happens outside the pool lock, with the frame pinned
    /// so that it stays put. The caller must not hold any page guard.
    pub fn flush_all(&self, txn: TxnID) -> Result<(), StorageError> {
        let targets = {
            let mut state = self.lock();
            let PoolState {
                frames,
                num_available,
                ..
            } = &mut *state;
            frames
                .iter_mut()
                .filter(|frame| frame.is_modified_by(txn))
                .filter_map(|frame| {
                    let block = frame.block()?.clone();
                    if !frame.is_pinned() {
                        *num_available -= 1;
                    }
                    frame.pin();
                    Some(frame.handle(block))
                })
                .collect_vec()
        };
        let flushed = targets.iter().try_for_each(|frame| {
            let page = frame.read();
            let mut state = self.lock();
            state.slot(frame)?.flush(&page, &self.disk, &self.log)
        });
        let mut state = self.lock();
        for frame in targets.iter() {
            let slot = state.slot(frame)?;
            slot.unpin()?;
            if !slot.is_pinned() {
                state.num_available += 1;
            }
        }
        flushed
    }

    /// number of unpinned frames
    pub fn available_count(&self) -> usize {
        self.lock().num_available
    }
    pub fn contains_mapping(&self, block: &BlockId) -> bool {
        self.lock().page_table.contains_key(block)
    }
    /// handle of the frame caching `block`, without pinning it
    pub fn get_mapping(&self, block: &BlockId) -> Option<FrameRef> {
        let state = self.lock();
        state
            .page_table
            .get(block)
            .map(|&frame_id| state.frames[frame_id].handle(block.clone()))
    }
    /// snapshot of the bookkeeping of one frame
    pub fn frame_state(&self, frame_id: FrameID) -> Option<BufferFrame> {
        self.lock().frames.get(frame_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the clock over the frames and hand the chosen one to `assign`.
    /// Its old image is written back if dirty and its old block dropped
    /// from the page table first. The chosen page is only try-locked.
    fn replace<T>(
        &self,
        state: &mut PoolState,
        wanted: &dyn Display,
        assign: impl FnOnce(&mut BufferFrame, &mut Page) -> Result<T, StorageError>,
    ) -> Result<(FrameID, T), StorageError> {
        let PoolState {
            frames,
            page_table,
            replacer,
            ..
        } = state;
        let exhausted = || StorageError::ResourceExhausted(wanted.to_string());
        let frame_id = replacer
            .victim(frames.as_mut_slice())
            .ok_or_else(exhausted)?;
        let frame = &mut frames[frame_id];
        let latch = frame.page().clone();
        let mut page = match latch.try_write() {
            Ok(page) => page,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(exhausted()),
        };
        frame.flush(&page, &self.disk, &self.log)?;
        if let Some(old) = frame.block() {
            debug!(
                "gclock: evict {} from frame {}, hand at {}",
                old,
                frame_id,
                replacer.handle()
            );
            page_table.remove(old);
        }
        let assigned = assign(&mut *frame, &mut *page)?;
        frame.init_reference(self.default_ref_count);
        Ok((frame_id, assigned))
    }
}
