use super::*;
use log::info;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// `FileManager` reads and writes fixed-size blocks of the files
/// living in one database directory.
pub struct FileManager {
    dir: PathBuf,
    block_size: usize,
    is_new: bool,
    files: Mutex<HashMap<String, File>>,
}

impl FileManager {
    pub fn new(dir: impl AsRef<Path>, block_size: usize) -> Result<Self, StorageError> {
        if block_size == 0 {
            return Err(StorageError::InvalidBlockSize(block_size));
        }
        let dir = dir.as_ref().to_path_buf();
        let is_new = !dir.exists();
        if is_new {
            fs::create_dir_all(&dir)?;
            info!("create database directory {}", dir.display());
        }
        Ok(Self {
            dir,
            block_size,
            is_new,
            files: Mutex::new(HashMap::new()),
        })
    }
    pub fn block_size(&self) -> usize {
        self.block_size
    }
    pub fn is_new(&self) -> bool {
        self.is_new
    }
    pub fn dir(&self) -> &Path {
        &self.dir
    }
    /// a block which was never written reads as zeroes
    pub fn read(&self, block: &BlockId, buf: &mut [u8]) -> Result<(), StorageError> {
        debug_assert_eq!(buf.len(), self.block_size);
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let file = Self::open(&self.dir, &mut files, block.file_name())?;
        let offset = self.offset_of(block.number());
        let len = file.metadata()?.len();
        if offset >= len {
            buf.fill(0);
            return Ok(());
        }
        let available = ((len - offset) as usize).min(buf.len());
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);
        Ok(())
    }
    pub fn write(&self, block: &BlockId, buf: &[u8]) -> Result<(), StorageError> {
        debug_assert_eq!(buf.len(), self.block_size);
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let file = Self::open(&self.dir, &mut files, block.file_name())?;
        file.seek(SeekFrom::Start(self.offset_of(block.number())))?;
        file.write_all(buf)?;
        file.sync_data()?;
        Ok(())
    }
    /// allocate a new block at the end of `file_name` and fill it with `buf`
    pub fn append(&self, file_name: &str, buf: &[u8]) -> Result<BlockId, StorageError> {
        debug_assert_eq!(buf.len(), self.block_size);
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let file = Self::open(&self.dir, &mut files, file_name)?;
        let number = file.metadata()?.len() / self.block_size as u64;
        file.seek(SeekFrom::Start(self.offset_of(number)))?;
        file.write_all(buf)?;
        file.sync_data()?;
        Ok(BlockId::new(file_name, number))
    }
    /// number of blocks in `file_name`
    pub fn length(&self, file_name: &str) -> Result<BlockNum, StorageError> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let file = Self::open(&self.dir, &mut files, file_name)?;
        let len = file.metadata()?.len();
        Ok((len + self.block_size as u64 - 1) / self.block_size as u64)
    }
    fn offset_of(&self, number: BlockNum) -> u64 {
        number * self.block_size as u64
    }
    fn open<'a>(
        dir: &Path,
        files: &'a mut HashMap<String, File>,
        file_name: &str,
    ) -> Result<&'a mut File, StorageError> {
        match files.entry(file_name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(dir.join(file_name))?;
                Ok(entry.insert(file))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tempfile::tempdir;

    const BLOCK_SIZE: usize = 400;

    #[test]
    fn write_read_test() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path().join("db"), BLOCK_SIZE).unwrap();
        assert!(fm.is_new());
        let mut rng = rand::thread_rng();
        let mut data = vec![0u8; BLOCK_SIZE];
        rng.fill(&mut data[..]);
        let block = BlockId::new("test.tbl", 2);
        fm.write(&block, &data).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        fm.read(&block, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(fm.length("test.tbl").unwrap(), 3);
        // blocks before the written one are holes
        fm.read(&BlockId::new("test.tbl", 0), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn read_past_end_is_zeroed() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path(), BLOCK_SIZE).unwrap();
        assert!(!fm.is_new());
        let mut buf = vec![7u8; BLOCK_SIZE];
        fm.read(&BlockId::new("empty.tbl", 10), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(fm.length("empty.tbl").unwrap(), 0);
    }

    #[test]
    fn append_allocates_sequentially() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path(), BLOCK_SIZE).unwrap();
        for i in 0..5u8 {
            let block = fm.append("seq.tbl", &[i; BLOCK_SIZE]).unwrap();
            assert_eq!(block, BlockId::new("seq.tbl", i as BlockNum));
        }
        assert_eq!(fm.length("seq.tbl").unwrap(), 5);
        let mut buf = vec![0u8; BLOCK_SIZE];
        fm.read(&BlockId::new("seq.tbl", 3), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 3));
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            FileManager::new(dir.path().join("db"), 0),
            Err(StorageError::InvalidBlockSize(0))
        ));
        // nothing was created
        assert!(!dir.path().join("db").exists());
    }
}
