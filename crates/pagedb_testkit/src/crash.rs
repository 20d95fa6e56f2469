//! Crash simulation for PageDB.
//!
//! A crash can leave the log in a handful of shapes. These helpers produce
//! them on a closed engine's log file so recovery can be tested:
//!
//! 1. **Torn append** - the last record is cut short
//! 2. **Garbled append** - the last record has full length but bad bytes
//! 3. **Unconfirmed tail** - a transaction's records without its confirmed one
//! 4. **Bit rot** - a record in the middle of the log is damaged
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagedb_testkit::crash::{LogFile, TailDamage};
//!
//! let mut test = TestEngine::file_keeping_log();
//! write_filled_pages(&test, &[1]);
//! test.close();
//! LogFile::new(test.log_path().unwrap()).damage_tail(TailDamage::Torn(100)).unwrap();
//! ```

use pagedb_core::wal::{LogRecord, RECORD_HEADER_SIZE, RECORD_SIZE};
use pagedb_core::{PageId, TransactionId, PAGE_SIZE};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

/// Shapes of a damaged final record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailDamage {
    /// Append this many bytes of a valid record, then stop.
    Torn(usize),
    /// Append a full-length record whose checksum does not match.
    Garbled,
    /// Flip a byte inside the last complete record.
    FlipLast,
}

/// Direct access to a log file on disk.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    /// Wraps the log file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Current length in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Returns `true` if the log is empty.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of whole records in the file.
    pub fn whole_records(&self) -> io::Result<u64> {
        Ok(self.len()? / RECORD_SIZE as u64)
    }

    /// Damages the end of the log.
    pub fn damage_tail(&self, damage: TailDamage) -> io::Result<()> {
        match damage {
            TailDamage::Torn(len) => {
                let record = sample_record(true).encode();
                self.append(&record[..len.min(RECORD_SIZE - 1)])
            }
            TailDamage::Garbled => {
                let mut record = sample_record(true).encode();
                record[RECORD_HEADER_SIZE] ^= 0xFF;
                self.append(&record)
            }
            TailDamage::FlipLast => {
                let len = self.len()?;
                if len < RECORD_SIZE as u64 {
                    return Err(io::Error::new(io::ErrorKind::InvalidInput, "log has no record"));
                }
                self.flip_byte(len - 10)
            }
        }
    }

    /// Flips every bit of the byte at `offset`.
    pub fn flip_byte(&self, offset: u64) -> io::Result<()> {
        let mut bytes = std::fs::read(&self.path)?;
        let index = usize::try_from(offset)
            .ok()
            .filter(|i| *i < bytes.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset past end of log"))?;
        bytes[index] ^= 0xFF;
        std::fs::write(&self.path, bytes)
    }

    /// Damages the record with index `record`, counted from the start.
    pub fn damage_record(&self, record: u64) -> io::Result<()> {
        self.flip_byte(record * RECORD_SIZE as u64 + RECORD_HEADER_SIZE as u64 + 1)
    }

    /// Appends records for `page_id` from a transaction that never
    /// confirmed, as if the process died mid-commit.
    pub fn append_unconfirmed(&self, txn_id: TransactionId, page_id: PageId, fill: u8) -> io::Result<()> {
        let record = LogRecord::new(page_id, txn_id, false, &[fill; PAGE_SIZE]);
        self.append(&record.encode())
    }

    /// Appends a complete confirmed single-page transaction.
    pub fn append_confirmed(&self, txn_id: TransactionId, page_id: PageId, fill: u8) -> io::Result<()> {
        let record = LogRecord::new(page_id, txn_id, true, &[fill; PAGE_SIZE]);
        self.append(&record.encode())
    }

    fn append(&self, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

fn sample_record(confirmed: bool) -> LogRecord {
    LogRecord::new(PageId::new(1), TransactionId::new(u64::MAX), confirmed, &[0xA5; PAGE_SIZE])
}
