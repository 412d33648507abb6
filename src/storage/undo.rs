use super::*;
use log::debug;
use std::sync::Arc;

pub const UNDO_FILE: &str = "savedblocks.undo";

/// Side store holding block pre-images for undo. An update log record only
/// keeps the `offset` returned by `save`, the image itself lives here.
pub trait UndoStore: Send + Sync {
    /// save a copy of `image` (the current content of `block`)
    fn save(&self, block: &BlockId, image: &[u8]) -> Result<u64, StorageError>;
    /// copy the image saved at `offset` into `buf`
    fn load(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;
}

/// Keeps every pre-image as one block of a dedicated file, the
/// offset being that block's number.
pub struct FileUndoStore {
    disk: Arc<FileManager>,
    file_name: String,
}

impl FileUndoStore {
    pub fn new(disk: Arc<FileManager>) -> Self {
        Self::with_file_name(disk, UNDO_FILE)
    }
    pub fn with_file_name(disk: Arc<FileManager>, file_name: impl Into<String>) -> Self {
        Self {
            disk,
            file_name: file_name.into(),
        }
    }
}

impl UndoStore for FileUndoStore {
    fn save(&self, block: &BlockId, image: &[u8]) -> Result<u64, StorageError> {
        let saved = self.disk.append(&self.file_name, image)?;
        debug!("undo store: saved pre-image of {} at {}", block, saved.number());
        Ok(saved.number())
    }
    fn load(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        if offset >= self.disk.length(&self.file_name)? {
            return Err(StorageError::UndoImageMissing(offset));
        }
        self.disk.read(&BlockId::new(&self.file_name, offset), buf)
    }
}
