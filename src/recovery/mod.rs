use crate::storage::{
    BlockId, BufferPoolManager, FrameRef, Lsn, Page, StorageError, TxnID, UndoStore,
};
use crate::wal::{LogError, LogManager};
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

mod record;

pub use record::{LogRecord, RecordState, UpdateRecord};
pub use record::{CHECKPOINT, COMMIT, ROLLBACK, START, UPDATE};

use record::corrupt;

/// Transaction id reserved for undo done by `recover` at startup. User
/// transactions are numbered from 1.
pub const RECOVERY_TXN: TxnID = 0;

/// Writes the log records of transactions and replays their undo.
/// Pre-images are kept in the undo store, the log only points at them.
pub struct RecoveryManager {
    pool: Arc<BufferPoolManager>,
    undo: Arc<dyn UndoStore>,
}

impl RecoveryManager {
    pub fn new(pool: Arc<BufferPoolManager>, undo: Arc<dyn UndoStore>) -> Self {
        Self { pool, undo }
    }
    pub fn pool(&self) -> &Arc<BufferPoolManager> {
        &self.pool
    }
    fn log(&self) -> &LogManager {
        self.pool.log()
    }

    pub fn start(&self, txn: TxnID) -> Result<Lsn, RecoveryError> {
        check_user_txn(txn)?;
        LogRecord::Start(txn).write_to_log(self.log())
    }

    /// Save `page`, the current image of `frame`, and log an update
    /// pointing at it. Call this with the write guard held, before changing
    /// the page, then mark the frame modified with the returned lsn.
    pub fn log_update(
        &self,
        txn: TxnID,
        frame: &FrameRef,
        page: &Page,
    ) -> Result<Lsn, RecoveryError> {
        check_user_txn(txn)?;
        let offset = self.undo.save(frame.block(), page.contents())?;
        UpdateRecord::new(txn, frame.block().clone(), offset).write_to_log(self.log())
    }

    pub fn commit(&self, txn: TxnID) -> Result<(), RecoveryError> {
        self.pool.flush_all(txn)?;
        let lsn = LogRecord::Commit(txn).write_to_log(self.log())?;
        self.log().flush(lsn)?;
        info!("txn {} committed", txn);
        Ok(())
    }

    pub fn rollback(&self, txn: TxnID) -> Result<(), RecoveryError> {
        let undone = self.do_rollback(txn)?;
        self.pool.flush_all(txn)?;
        let lsn = LogRecord::Rollback(txn).write_to_log(self.log())?;
        self.log().flush(lsn)?;
        info!("txn {} rolled back, {} updates undone", txn, undone);
        Ok(())
    }

    /// Undo every update of a transaction that neither committed nor
    /// rolled back since the last checkpoint, then write a new checkpoint.
    /// Restored pages are marked modified by `txn`. Returns the number of
    /// updates undone.
    pub fn recover(&self, txn: TxnID) -> Result<usize, RecoveryError> {
        let undone = self.do_recover(txn)?;
        self.pool.flush_all(txn)?;
        let lsn = LogRecord::Checkpoint.write_to_log(self.log())?;
        self.log().flush(lsn)?;
        info!("recovery done, {} updates undone", undone);
        Ok(undone)
    }

    fn do_rollback(&self, txn: TxnID) -> Result<usize, RecoveryError> {
        let mut undone = 0;
        for cursor in self.log().iter()? {
            let mut cursor = cursor.map_err(corrupt)?;
            match LogRecord::decode(&mut cursor)? {
                LogRecord::Start(start) if start == txn => break,
                LogRecord::Update(mut update) if update.txn() == txn => {
                    debug!("rollback {}: {}", txn, update);
                    update.undo(txn, &self.pool, self.undo.as_ref())?;
                    undone += 1;
                }
                _ => {}
            }
        }
        Ok(undone)
    }

    fn do_recover(&self, txn: TxnID) -> Result<usize, RecoveryError> {
        let mut finished = HashSet::new();
        let mut undone = 0;
        for cursor in self.log().iter()? {
            let mut cursor = cursor.map_err(corrupt)?;
            match LogRecord::decode(&mut cursor)? {
                LogRecord::Checkpoint => break,
                LogRecord::Commit(done) | LogRecord::Rollback(done) => {
                    finished.insert(done);
                }
                LogRecord::Update(mut update) if !finished.contains(&update.txn()) => {
                    debug!("recover: {}", update);
                    update.undo(txn, &self.pool, self.undo.as_ref())?;
                    undone += 1;
                }
                _ => {}
            }
        }
        Ok(undone)
    }
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("corrupt log record: {0}")]
    CorruptLogRecord(String),
    #[error("undo cannot pin {block}: {source}")]
    UndoPinFailure {
        block: BlockId,
        #[source]
        source: StorageError,
    },
    #[error("{record} cannot {action} in state {state:?}")]
    InvalidRecordState {
        record: String,
        action: &'static str,
        state: RecordState,
    },
    #[error("{what} {value} does not fit in a log record")]
    IdOutOfRange { what: &'static str, value: u64 },
    #[error("transaction id {0} is reserved for recovery")]
    ReservedTxn(TxnID),
    #[error("Storage: {0}")]
    Storage(#[from] StorageError),
    #[error("Log: {0}")]
    Log(#[from] LogError),
}

fn check_user_txn(txn: TxnID) -> Result<(), RecoveryError> {
    if txn == RECOVERY_TXN {
        return Err(RecoveryError::ReservedTxn(txn));
    }
    Ok(())
}
