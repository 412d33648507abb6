use crate::storage::Lsn;
use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

mod cursor;

pub use cursor::{LogCursor, LogIterator};

pub const DEFAULT_LOG_FILE: &str = "naive.log";

const INT_TAG: u8 = 0;
const STR_TAG: u8 = 1;

///
/// Log file format:
///
/// ```text
/// | Record[1] | Record[2] | ... | Record[n] |
/// ```
///
/// Record format
///
/// ```text
/// | len: u32 | payload | len: u32 |
/// ```
///
/// The length is repeated at the end so that the log can be read
/// from the newest record backwards. The payload is a sequence of
/// fields, each prefixed by a one byte tag:
///
/// ```text
/// | 0 | i64 |   or   | 1 | len: u32 | utf8 |
/// ```
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogValue {
    Int(i64),
    Str(String),
}

impl LogValue {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            LogValue::Int(value) => {
                buf.push(INT_TAG);
                buf.extend_from_slice(&value.to_le_bytes());
            }
            LogValue::Str(value) => {
                buf.push(STR_TAG);
                buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
                buf.extend_from_slice(value.as_bytes());
            }
        }
    }
}

impl From<i64> for LogValue {
    fn from(value: i64) -> Self {
        LogValue::Int(value)
    }
}

impl From<&str> for LogValue {
    fn from(value: &str) -> Self {
        LogValue::Str(value.to_string())
    }
}

/// Append-only log. Records are numbered from 1 in the order they
/// were appended; `flush` makes them durable.
pub struct LogManager {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

struct LogInner {
    file: File,
    latest_lsn: Lsn,
    last_durable_lsn: Lsn,
}

impl LogManager {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let (count, valid_len) = scan_records(&buf)?;
        if valid_len < buf.len() {
            warn!(
                "log {}: truncate torn record at byte {}",
                path.display(),
                valid_len
            );
            file.set_len(valid_len as u64)?;
            file.sync_data()?;
        }
        info!("open log {} with {} records", path.display(), count);
        Ok(Self {
            path,
            inner: Mutex::new(LogInner {
                file,
                latest_lsn: count,
                last_durable_lsn: count,
            }),
        })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// append one record, return its lsn
    pub fn append(&self, fields: &[LogValue]) -> Result<Lsn, LogError> {
        let mut payload = Vec::new();
        for field in fields {
            field.encode_into(&mut payload);
        }
        let len = (payload.len() as u32).to_le_bytes();
        let mut record = Vec::with_capacity(payload.len() + 8);
        record.extend_from_slice(&len);
        record.extend_from_slice(&payload);
        record.extend_from_slice(&len);

        let mut inner = self.lock();
        append_record(&mut inner.file, &record)?;
        inner.latest_lsn += 1;
        Ok(inner.latest_lsn)
    }
    /// make sure every record up to `lsn` is on disk
    pub fn flush(&self, lsn: Lsn) -> Result<(), LogError> {
        let mut inner = self.lock();
        if lsn > inner.last_durable_lsn {
            inner.file.sync_data()?;
            inner.last_durable_lsn = inner.latest_lsn;
        }
        Ok(())
    }
    pub fn latest_lsn(&self) -> Lsn {
        self.lock().latest_lsn
    }
    pub fn last_durable_lsn(&self) -> Lsn {
        self.lock().last_durable_lsn
    }
    /// iterate from the newest record to the oldest
    pub fn iter(&self) -> Result<LogIterator, LogError> {
        let mut inner = self.lock();
        let mut buf = Vec::new();
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.read_to_end(&mut buf)?;
        Ok(LogIterator::new(buf, inner.latest_lsn))
    }
    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Anything `append_record` can write to; the log file outside of tests.
trait LogFile: Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `record` at the end of `file`. If the write fails part way the
/// file is cut back, so the next record does not land behind a torn one.
fn append_record(file: &mut impl LogFile, record: &[u8]) -> io::Result<()> {
    let start = file.seek(SeekFrom::End(0))?;
    if let Err(err) = file.write_all(record) {
        if let Err(cut) = file.truncate(start) {
            warn!("cannot cut failed log append back to byte {}: {}", start, cut);
        }
        return Err(err);
    }
    Ok(())
}

/// count the complete records, return the count and the length they span
fn scan_records(buf: &[u8]) -> Result<(Lsn, usize), LogError> {
    let mut offset = 0usize;
    let mut count = 0;
    while buf.len() - offset >= 4 {
        let len = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        let end = offset + 4 + len + 4;
        if end > buf.len() {
            break;
        }
        let tail = u32::from_le_bytes(buf[end - 4..end].try_into().unwrap()) as usize;
        if tail != len {
            return Err(LogError::Corrupt(format!(
                "record at byte {} has mismatched lengths {} and {}",
                offset, len, tail
            )));
        }
        offset = end;
        count += 1;
    }
    Ok((count, offset))
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IOError: {0}")]
    IOError(#[from] std::io::Error),
    #[error("corrupt log: {0}")]
    Corrupt(String),
}
