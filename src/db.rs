use crate::config::Config;
use crate::recovery::{RecoveryError, RecoveryManager, RECOVERY_TXN};
use crate::storage::{BufferPoolManager, FileManager, FileUndoStore, StorageError};
use crate::wal::{LogError, LogManager, DEFAULT_LOG_FILE};
use log::info;
use std::sync::Arc;
use thiserror::Error;

pub struct NaiveStorage {
    pool: Arc<BufferPoolManager>,
    recovery: RecoveryManager,
}

impl NaiveStorage {
    /// Open the database in `config.db_dir`. An existing database is
    /// recovered before this returns; if recovery fails, so does `open`.
    pub fn open(config: &Config) -> Result<Self, NaiveStorageError> {
        let disk = Arc::new(FileManager::new(&config.db_dir, config.block_size)?);
        let log = Arc::new(LogManager::new(disk.dir().join(DEFAULT_LOG_FILE))?);
        let pool = Arc::new(BufferPoolManager::new(
            config.buffer_pool(),
            disk.clone(),
            log,
        ));
        let undo = Arc::new(FileUndoStore::new(disk.clone()));
        let recovery = RecoveryManager::new(pool.clone(), undo);
        if disk.is_new() {
            info!("creating new database {}", config.db_dir.display());
        } else {
            info!("recovering existing database {}", config.db_dir.display());
            recovery.recover(RECOVERY_TXN)?;
        }
        Ok(Self { pool, recovery })
    }
    pub fn pool(&self) -> &Arc<BufferPoolManager> {
        &self.pool
    }
    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }
}

#[derive(Error, Debug)]
pub enum NaiveStorageError {
    #[error("StorageError: {0}")]
    Storage(#[from] StorageError),
    #[error("LogError: {0}")]
    Log(#[from] LogError),
    #[error("RecoveryError: {0}")]
    Recovery(#[from] RecoveryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BlockId;
    use crate::wal::LogValue;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::new(dir.join("db"));
        config.block_size = 128;
        config.buffers = 4;
        config
    }

    #[test]
    fn reopen_recovers_unfinished_work() {
        let dir = tempdir().unwrap();
        let block = BlockId::new("student.tbl", 0);
        {
            let db = NaiveStorage::open(&config(dir.path())).unwrap();
            let pool = db.pool();
            db.recovery().start(1).unwrap();
            let frame = pool.pin(&block).unwrap();
            {
                let mut page = frame.write();
                let lsn = db.recovery().log_update(1, &frame, &page).unwrap();
                page.contents_mut()[..4].copy_from_slice(b"dirt");
                pool.mark_modified(&frame, 1, Some(lsn)).unwrap();
            }
            pool.unpin(&frame).unwrap();
            pool.flush_all(1).unwrap();
        }
        let db = NaiveStorage::open(&config(dir.path())).unwrap();
        let frame = db.pool().pin(&block).unwrap();
        assert!(frame.read().contents().iter().all(|&b| b == 0));
        db.pool().unpin(&frame).unwrap();
        assert_eq!(db.pool().available_count(), 4);
    }

    #[test]
    fn open_fails_on_corrupt_log() {
        let dir = tempdir().unwrap();
        {
            let db = NaiveStorage::open(&config(dir.path())).unwrap();
            db.pool()
                .log()
                .append(&[LogValue::Int(77)])
                .unwrap();
        }
        assert!(matches!(
            NaiveStorage::open(&config(dir.path())),
            Err(NaiveStorageError::Recovery(RecoveryError::CorruptLogRecord(_)))
        ));
    }
}
