//! Streaming log record iterator.
//!
//! Reads the log in bounded chunks, so memory use does not grow with the
//! log. Records are fixed size, which makes every record boundary known
//! up front and lets the iterator tell a damaged tail from damage in the
//! middle of the log.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{LogRecord, RECORD_SIZE};
use pagedb_storage::StorageBackend;

/// Number of damaged records tolerated at the end of the log.
///
/// A crash can leave the last record half written (short) or fully sized
/// but with garbage in it. Damage further from the end is corruption.
pub const TRAILING_TOLERANCE_RECORDS: u64 = 1;

/// Records fetched per read.
const RECORDS_PER_READ: usize = 8;

/// A damaged record dropped from the end of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamagedTail {
    /// Offset of the first damaged byte range.
    pub offset: u64,
    /// Bytes from `offset` to the end of the log.
    pub len: u64,
    /// What was wrong with it.
    pub reason: String,
}

/// A streaming iterator over log records.
///
/// Yields `(offset, LogRecord)` pairs. When the tail of the log is damaged
/// within [`TRAILING_TOLERANCE_RECORDS`], iteration ends cleanly and the
/// damage is reported by [`LogRecordIterator::damaged_tail`]; any other
/// damage yields a `Recovery` error and ends iteration.
///
/// ```ignore
/// let mut iter = LogRecordIterator::new(log)?;
/// for item in &mut iter {
///     let (offset, record) = item?;
/// }
/// let clean_end = iter.valid_end();
/// ```
pub struct LogRecordIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    /// Offset of the next record to hand out.
    offset: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    tail: Option<DamagedTail>,
    finished: bool,
}

impl<'a> LogRecordIterator<'a> {
    /// Creates an iterator starting at offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: 0,
            buffer: Vec::new(),
            buffer_start: 0,
            tail: None,
            finished: false,
        })
    }

    /// End of the last valid record seen so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    /// The damaged tail, once iteration reached it.
    #[must_use]
    pub fn damaged_tail(&self) -> Option<&DamagedTail> {
        self.tail.as_ref()
    }

    /// Returns the bytes of the record at `self.offset`, refilling the
    /// buffer when needed. Only called when a whole record remains.
    fn record_bytes(&mut self) -> CoreResult<&[u8]> {
        let buffered_end = self.buffer_start + self.buffer.len() as u64;
        if self.offset < self.buffer_start || self.offset + RECORD_SIZE as u64 > buffered_end {
            let remaining = self.total_size - self.offset;
            let whole = (remaining / RECORD_SIZE as u64).min(RECORDS_PER_READ as u64);
            let len = whole as usize * RECORD_SIZE;
            self.buffer = self.backend.read_at(self.offset, len)?;
            self.buffer_start = self.offset;
        }
        let start = (self.offset - self.buffer_start) as usize;
        Ok(&self.buffer[start..start + RECORD_SIZE])
    }

    fn damaged(&mut self, reason: String) -> CoreResult<Option<(u64, LogRecord)>> {
        self.finished = true;
        let len = self.total_size - self.offset;
        if len <= TRAILING_TOLERANCE_RECORDS * RECORD_SIZE as u64 {
            self.tail = Some(DamagedTail {
                offset: self.offset,
                len,
                reason,
            });
            Ok(None)
        } else {
            Err(CoreError::recovery(format!(
                "damaged log record at offset {} with {len} bytes after it: {reason}",
                self.offset
            )))
        }
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, LogRecord)>> {
        if self.finished {
            return Ok(None);
        }
        let remaining = self.total_size - self.offset;
        if remaining == 0 {
            self.finished = true;
            return Ok(None);
        }
        if remaining < RECORD_SIZE as u64 {
            return self.damaged(format!("short record of {remaining} bytes"));
        }

        let decoded = LogRecord::decode(self.record_bytes()?);
        match decoded {
            Ok(record) => {
                let offset = self.offset;
                self.offset += RECORD_SIZE as u64;
                Ok(Some((offset, record)))
            }
            Err(err @ (CoreError::InvalidFormat { .. } | CoreError::ChecksumMismatch { .. })) => {
                self.damaged(err.to_string())
            }
            Err(err) => Err(err),
        }
    }
}

impl Iterator for LogRecordIterator<'_> {
    type Item = CoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
