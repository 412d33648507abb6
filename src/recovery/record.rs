use super::RecoveryError;
use crate::storage::{BlockId, BufferPoolManager, Lsn, TxnID, UndoStore};
use crate::wal::{LogCursor, LogManager, LogValue};
use log::debug;
use std::fmt;

pub const CHECKPOINT: i64 = 0;
pub const START: i64 = 1;
pub const COMMIT: i64 = 2;
pub const ROLLBACK: i64 = 3;
pub const UPDATE: i64 = 4;

/// Every record starts with its kind, followed by the fields of
/// that kind in a fixed order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
    Checkpoint,
    Start(TxnID),
    Commit(TxnID),
    Rollback(TxnID),
    Update(UpdateRecord),
}

impl LogRecord {
    pub fn decode(cursor: &mut LogCursor) -> Result<Self, RecoveryError> {
        let record = match read_int(cursor)? {
            CHECKPOINT => LogRecord::Checkpoint,
            START => LogRecord::Start(read_id(cursor, "transaction id")?),
            COMMIT => LogRecord::Commit(read_id(cursor, "transaction id")?),
            ROLLBACK => LogRecord::Rollback(read_id(cursor, "transaction id")?),
            UPDATE => LogRecord::Update(UpdateRecord::from_cursor(cursor)?),
            kind => {
                return Err(RecoveryError::CorruptLogRecord(format!(
                    "record {}: unknown kind {}",
                    cursor.lsn(),
                    kind
                )))
            }
        };
        if !cursor.is_exhausted() {
            return Err(RecoveryError::CorruptLogRecord(format!(
                "record {}: trailing fields after {}",
                cursor.lsn(),
                record
            )));
        }
        Ok(record)
    }
    pub fn op(&self) -> i64 {
        match self {
            LogRecord::Checkpoint => CHECKPOINT,
            LogRecord::Start(_) => START,
            LogRecord::Commit(_) => COMMIT,
            LogRecord::Rollback(_) => ROLLBACK,
            LogRecord::Update(_) => UPDATE,
        }
    }
    pub fn txn(&self) -> Option<TxnID> {
        match self {
            LogRecord::Checkpoint => None,
            LogRecord::Start(txn) | LogRecord::Commit(txn) | LogRecord::Rollback(txn) => {
                Some(*txn)
            }
            LogRecord::Update(update) => Some(update.txn()),
        }
    }
    pub fn fields(&self) -> Result<Vec<LogValue>, RecoveryError> {
        match self {
            LogRecord::Checkpoint => Ok(vec![LogValue::Int(CHECKPOINT)]),
            LogRecord::Start(txn) | LogRecord::Commit(txn) | LogRecord::Rollback(txn) => Ok(vec![
                LogValue::Int(self.op()),
                write_id(*txn, "transaction id")?,
            ]),
            LogRecord::Update(update) => update.fields(),
        }
    }
    /// Append the record. An update goes through `UpdateRecord::write_to_log`
    /// and so must still be pending.
    pub fn write_to_log(&mut self, log: &LogManager) -> Result<Lsn, RecoveryError> {
        match self {
            LogRecord::Update(update) => update.write_to_log(log),
            _ => Ok(log.append(&self.fields()?)?),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Checkpoint => write!(f, "<CHECKPOINT>"),
            LogRecord::Start(txn) => write!(f, "<START {}>", txn),
            LogRecord::Commit(txn) => write!(f, "<COMMIT {}>", txn),
            LogRecord::Rollback(txn) => write!(f, "<ROLLBACK {}>", txn),
            LogRecord::Update(update) => fmt::Display::fmt(update, f),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    /// built in memory, not in the log yet
    Pending,
    /// in the log at the given lsn
    Appended(Lsn),
    /// its undo has been applied
    Replayed,
}

/// Describes a change of one block. The pre-image itself lives in the
/// undo store, the record only remembers where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateRecord {
    txn: TxnID,
    block: BlockId,
    offset: u64,
    state: RecordState,
}

impl UpdateRecord {
    pub fn new(txn: TxnID, block: BlockId, offset: u64) -> Self {
        Self {
            txn,
            block,
            offset,
            state: RecordState::Pending,
        }
    }
    /// decode the fields following the kind, in the order `fields` wrote them
    pub fn from_cursor(cursor: &mut LogCursor) -> Result<Self, RecoveryError> {
        let txn = read_id(cursor, "transaction id")?;
        let file_name = cursor.next_string().map_err(corrupt)?;
        let number = read_id(cursor, "block number")?;
        let offset = read_id(cursor, "undo offset")?;
        Ok(Self {
            txn,
            block: BlockId::new(file_name, number),
            offset,
            state: RecordState::Appended(cursor.lsn()),
        })
    }
    pub fn txn(&self) -> TxnID {
        self.txn
    }
    pub fn block(&self) -> &BlockId {
        &self.block
    }
    pub fn offset(&self) -> u64 {
        self.offset
    }
    pub fn state(&self) -> RecordState {
        self.state
    }
    fn fields(&self) -> Result<Vec<LogValue>, RecoveryError> {
        Ok(vec![
            LogValue::Int(UPDATE),
            write_id(self.txn, "transaction id")?,
            LogValue::Str(self.block.file_name().to_string()),
            write_id(self.block.number(), "block number")?,
            write_id(self.offset, "undo offset")?,
        ])
    }
    pub fn write_to_log(&mut self, log: &LogManager) -> Result<Lsn, RecoveryError> {
        self.expect_state("be appended", |state| state == RecordState::Pending)?;
        let lsn = log.append(&self.fields()?)?;
        self.state = RecordState::Appended(lsn);
        Ok(lsn)
    }
    /// Put the saved pre-image back into the block, on behalf of `txn`.
    /// Failing to pin the block is fatal for the undo pass.
    pub fn undo(
        &mut self,
        txn: TxnID,
        pool: &BufferPoolManager,
        store: &dyn UndoStore,
    ) -> Result<(), RecoveryError> {
        self.expect_state("be undone", |state| {
            matches!(state, RecordState::Appended(_))
        })?;
        let frame = pool
            .pin(&self.block)
            .map_err(|source| RecoveryError::UndoPinFailure {
                block: self.block.clone(),
                source,
            })?;
        let restored = {
            let mut page = frame.write();
            page.restore(store, self.offset)
                .and_then(|()| pool.mark_modified(&frame, txn, None))
        };
        pool.unpin(&frame)?;
        restored?;
        debug!("undo {}: restored {}", self, self.block);
        self.state = RecordState::Replayed;
        Ok(())
    }
    fn expect_state(
        &self,
        action: &'static str,
        allowed: impl Fn(RecordState) -> bool,
    ) -> Result<(), RecoveryError> {
        if allowed(self.state) {
            Ok(())
        } else {
            Err(RecoveryError::InvalidRecordState {
                record: self.to_string(),
                action,
                state: self.state,
            })
        }
    }
}

impl fmt::Display for UpdateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<UPDATE {} {} {} {}>",
            self.txn,
            self.block.file_name(),
            self.block.number(),
            self.offset
        )
    }
}

pub(super) fn corrupt(err: crate::wal::LogError) -> RecoveryError {
    RecoveryError::CorruptLogRecord(err.to_string())
}

fn read_int(cursor: &mut LogCursor) -> Result<i64, RecoveryError> {
    cursor.next_int().map_err(corrupt)
}

fn write_id(value: u64, what: &'static str) -> Result<LogValue, RecoveryError> {
    i64::try_from(value)
        .map(LogValue::Int)
        .map_err(|_| RecoveryError::IdOutOfRange { what, value })
}

fn read_id(cursor: &mut LogCursor, what: &str) -> Result<u64, RecoveryError> {
    let value = read_int(cursor)?;
    if value < 0 {
        return Err(RecoveryError::CorruptLogRecord(format!(
            "record {}: negative {} {}",
            cursor.lsn(),
            what,
            value
        )));
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BufferPoolConfig, FileManager, FileUndoStore};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    const BLOCK_SIZE: usize = 64;

    fn setup(num_buffers: usize) -> (TempDir, BufferPoolManager, FileUndoStore) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(FileManager::new(dir.path(), BLOCK_SIZE).unwrap());
        let log = Arc::new(LogManager::new(dir.path().join("test.log")).unwrap());
        let config = BufferPoolConfig {
            num_buffers,
            default_ref_count: 1,
        };
        let store = FileUndoStore::new(disk.clone());
        (dir, BufferPoolManager::new(config, disk, log), store)
    }

    fn newest(log: &LogManager) -> LogRecord {
        let mut cursor = log.iter().unwrap().next().unwrap().unwrap();
        LogRecord::decode(&mut cursor).unwrap()
    }

    #[test]
    fn encode_decode_kinds() {
        let (_dir, pool, _store) = setup(1);
        let records = vec![
            LogRecord::Checkpoint,
            LogRecord::Start(3),
            LogRecord::Commit(3),
            LogRecord::Rollback(4),
        ];
        for mut record in records {
            let lsn = record.write_to_log(pool.log()).unwrap();
            assert_eq!(lsn, pool.log().latest_lsn());
            assert_eq!(newest(pool.log()), record);
        }
        let mut update = UpdateRecord::new(7, BlockId::new("emp.tbl", 12), 3);
        let lsn = update.write_to_log(pool.log()).unwrap();
        assert_eq!(update.state(), RecordState::Appended(lsn));
        assert_eq!(newest(pool.log()), LogRecord::Update(update));
    }

    #[test]
    fn display() {
        let update = UpdateRecord::new(7, BlockId::new("emp.tbl", 12), 3);
        assert_eq!(update.to_string(), "<UPDATE 7 emp.tbl 12 3>");
        assert_eq!(LogRecord::Commit(2).to_string(), "<COMMIT 2>");
        assert_eq!(LogRecord::Checkpoint.to_string(), "<CHECKPOINT>");
    }

    #[test]
    fn corrupt_records() {
        let (_dir, pool, _store) = setup(1);
        let log = pool.log();
        let decode_newest = || {
            let mut cursor = log.iter().unwrap().next().unwrap().unwrap();
            LogRecord::decode(&mut cursor)
        };
        log.append(&[LogValue::Int(42)]).unwrap();
        assert!(matches!(
            decode_newest(),
            Err(RecoveryError::CorruptLogRecord(_))
        ));
        // fields out of order
        log.append(&[
            LogValue::Int(UPDATE),
            LogValue::from("emp.tbl"),
            LogValue::Int(1),
            LogValue::Int(2),
            LogValue::Int(3),
        ])
        .unwrap();
        assert!(matches!(
            decode_newest(),
            Err(RecoveryError::CorruptLogRecord(_))
        ));
        log.append(&[LogValue::Int(COMMIT), LogValue::Int(-1)]).unwrap();
        assert!(matches!(
            decode_newest(),
            Err(RecoveryError::CorruptLogRecord(_))
        ));
        log.append(&[LogValue::Int(START), LogValue::Int(1), LogValue::Int(1)])
            .unwrap();
        assert!(matches!(
            decode_newest(),
            Err(RecoveryError::CorruptLogRecord(_))
        ));
    }

    #[test]
    fn undo_round_trip() {
        let (_dir, pool, store) = setup(2);
        let block = BlockId::new("emp.tbl", 0);
        let frame = pool.pin(&block).unwrap();
        let mut record = {
            let mut page = frame.write();
            page.contents_mut().fill(0xc0);
            let offset = store.save(&block, page.contents()).unwrap();
            page.contents_mut().fill(0xc1);
            pool.mark_modified(&frame, 1, None).unwrap();
            UpdateRecord::new(1, block.clone(), offset)
        };
        pool.unpin(&frame).unwrap();
        assert_eq!(record.state(), RecordState::Pending);
        assert!(matches!(
            record.undo(1, &pool, &store),
            Err(RecoveryError::InvalidRecordState { .. })
        ));
        let lsn = record.write_to_log(pool.log()).unwrap();
        assert_eq!(record.state(), RecordState::Appended(lsn));
        record.undo(1, &pool, &store).unwrap();
        assert_eq!(record.state(), RecordState::Replayed);
        assert!(frame.read().contents().iter().all(|&b| b == 0xc0));
        let state = pool.frame_state(frame.id()).unwrap();
        assert!(state.is_modified_by(1));
        assert!(!state.is_pinned());
        assert!(matches!(
            record.undo(1, &pool, &store),
            Err(RecoveryError::InvalidRecordState { .. })
        ));
    }

    #[test]
    fn undo_fails_when_block_cannot_be_pinned() {
        let (_dir, pool, store) = setup(1);
        let offset = store.save(&BlockId::new("a.tbl", 0), &[0u8; BLOCK_SIZE]).unwrap();
        let mut record = UpdateRecord::new(1, BlockId::new("a.tbl", 0), offset);
        record.write_to_log(pool.log()).unwrap();
        let _busy = pool.pin(&BlockId::new("b.tbl", 0)).unwrap();
        assert!(matches!(
            record.undo(1, &pool, &store),
            Err(RecoveryError::UndoPinFailure { .. })
        ));
        assert!(matches!(record.state(), RecordState::Appended(_)));
    }

    #[test]
    fn ids_beyond_i64_are_not_logged() {
        let (_dir, pool, _store) = setup(1);
        let log = pool.log();
        let mut update = UpdateRecord::new(u64::MAX, BlockId::new("emp.tbl", 0), 0);
        assert!(matches!(
            update.write_to_log(log),
            Err(RecoveryError::IdOutOfRange { .. })
        ));
        assert_eq!(update.state(), RecordState::Pending);
        let mut update = UpdateRecord::new(1, BlockId::new("emp.tbl", 1 << 63), 0);
        assert!(update.write_to_log(log).is_err());
        assert!(LogRecord::Commit(u64::MAX).write_to_log(log).is_err());
        assert_eq!(log.latest_lsn(), 0);
        let largest = i64::MAX as u64;
        LogRecord::Commit(largest).write_to_log(log).unwrap();
        assert_eq!(newest(log), LogRecord::Commit(largest));
    }

    #[test]
    fn update_is_written_once() {
        let (_dir, pool, _store) = setup(1);
        let log = pool.log();
        let mut record = LogRecord::Update(UpdateRecord::new(2, BlockId::new("emp.tbl", 4), 1));
        let lsn = record.write_to_log(log).unwrap();
        match &record {
            LogRecord::Update(update) => assert_eq!(update.state(), RecordState::Appended(lsn)),
            other => panic!("unexpected {}", other),
        }
        assert!(matches!(
            record.write_to_log(log),
            Err(RecoveryError::InvalidRecordState { .. })
        ));
        assert_eq!(log.latest_lsn(), lsn);
    }
}
