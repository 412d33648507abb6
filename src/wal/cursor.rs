use super::{LogError, INT_TAG, STR_TAG};
use crate::storage::Lsn;

/// Walks the records of a log snapshot from the newest to the oldest.
pub struct LogIterator {
    buf: Vec<u8>,
    /// end of the next record to return
    end: usize,
    lsn: Lsn,
}

impl LogIterator {
    pub(super) fn new(buf: Vec<u8>, latest_lsn: Lsn) -> Self {
        let end = buf.len();
        Self {
            buf,
            end,
            lsn: latest_lsn,
        }
    }

    fn read_back(&mut self) -> Result<LogCursor, LogError> {
        let corrupt = || LogError::Corrupt(format!("bad record ending at byte {}", self.end));
        if self.end < 8 || self.lsn == 0 {
            return Err(corrupt());
        }
        let len = u32::from_le_bytes(self.buf[self.end - 4..self.end].try_into().unwrap()) as usize;
        let start = self.end.checked_sub(len + 8).ok_or_else(corrupt)?;
        let head = u32::from_le_bytes(self.buf[start..start + 4].try_into().unwrap()) as usize;
        if head != len {
            return Err(corrupt());
        }
        let cursor = LogCursor::new(self.lsn, self.buf[start + 4..self.end - 4].to_vec());
        self.end = start;
        self.lsn -= 1;
        Ok(cursor)
    }
}

impl Iterator for LogIterator {
    type Item = Result<LogCursor, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end == 0 {
            return None;
        }
        let res = self.read_back();
        if res.is_err() {
            // a broken frame hides everything before it
            self.end = 0;
        }
        Some(res)
    }
}

/// One log record. Fields must be read in the order they were written.
pub struct LogCursor {
    lsn: Lsn,
    payload: Vec<u8>,
    pos: usize,
}

impl LogCursor {
    pub fn new(lsn: Lsn, payload: Vec<u8>) -> Self {
        Self {
            lsn,
            payload,
            pos: 0,
        }
    }
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.payload.len()
    }
    pub fn next_int(&mut self) -> Result<i64, LogError> {
        self.expect_tag(INT_TAG, "int")?;
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }
    pub fn next_string(&mut self) -> Result<String, LogError> {
        self.expect_tag(STR_TAG, "string")?;
        let len = u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;
        let bytes = self.take(len)?.to_vec();
        String::from_utf8(bytes)
            .map_err(|_| LogError::Corrupt(format!("record {}: string is not utf8", self.lsn)))
    }

    fn expect_tag(&mut self, tag: u8, name: &str) -> Result<(), LogError> {
        let found = self.take(1)?[0];
        if found != tag {
            return Err(LogError::Corrupt(format!(
                "record {}: expected {} field at byte {}, found tag {}",
                self.lsn,
                name,
                self.pos - 1,
                found
            )));
        }
        Ok(())
    }
    fn take(&mut self, n: usize) -> Result<&[u8], LogError> {
        if self.payload.len() - self.pos < n {
            return Err(LogError::Corrupt(format!(
                "record {}: read past its end",
                self.lsn
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.payload[start..self.pos])
    }
}
