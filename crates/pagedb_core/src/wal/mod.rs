//! Write-ahead log.
//!
//! Committed page images are appended to the log before they reach the data
//! file. The [`WalIndexService`] remembers, per page, which log record holds
//! the latest image; checkpoints fold those images back into the data file
//! and cut the log down to the records still indexed.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | flags (1) | page_id (4) | txn_id (8) | page (8192) | crc32 (4) |
//! ```
//!
//! A transaction's pages become visible only with its confirmed record,
//! the last one it writes.
//!
//! ## Recovery Policy
//!
//! ### Tolerated (treated as the clean end of the log)
//!
//! - a short final record (crash mid-append)
//! - a full-length final record with bad magic or CRC
//!
//! At most [`TRAILING_TOLERANCE_RECORDS`] records are dropped this way; the
//! log is cut back to the last complete record.
//!
//! ### Fatal (`Recovery` error, the engine does not open)
//!
//! - any damaged record that is not at the tail
//! - a confirmed header image that does not parse

mod index;
mod iterator;
mod record;

pub use index::{ActiveTransactions, CheckpointMode, RestoreReport, WalIndexService};
pub use iterator::{DamagedTail, LogRecordIterator, TRAILING_TOLERANCE_RECORDS};
pub use record::{LogRecord, CONFIRMED, LOG_MAGIC, LOG_VERSION, RECORD_HEADER_SIZE, RECORD_SIZE};
