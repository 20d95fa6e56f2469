//! Log record format.
//!
//! Every record carries exactly one page image:
//!
//! ```text
//! | magic (4) | version (2) | flags (1) | page_id (4) | txn_id (8) | page (PAGE_SIZE) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers everything before it.

use crate::error::{CoreError, CoreResult};
use crate::types::{PageId, TransactionId, PAGE_SIZE};

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"PLOG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Flag set on the last record of a transaction.
pub const CONFIRMED: u8 = 0x01;

/// Bytes before the page image.
pub const RECORD_HEADER_SIZE: usize = 4 + 2 + 1 + 4 + 8;

/// Size of one encoded record.
pub const RECORD_SIZE: usize = RECORD_HEADER_SIZE + PAGE_SIZE + 4;

/// One page image written to the log by a transaction.
#[derive(Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Page the image belongs to.
    pub page_id: PageId,
    /// Transaction that wrote it.
    pub txn_id: TransactionId,
    /// Set on the transaction's last record.
    pub confirmed: bool,
    /// Full page image.
    pub page: Vec<u8>,
}

impl LogRecord {
    /// Creates a record, padding or cutting `page` to `PAGE_SIZE`.
    #[must_use]
    pub fn new(page_id: PageId, txn_id: TransactionId, confirmed: bool, page: &[u8]) -> Self {
        let mut image = vec![0u8; PAGE_SIZE];
        let len = page.len().min(PAGE_SIZE);
        image[..len].copy_from_slice(&page[..len]);
        Self {
            page_id,
            txn_id,
            confirmed,
            page: image,
        }
    }

    /// Serializes the record.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        buf.extend_from_slice(&LOG_MAGIC);
        buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
        buf.push(if self.confirmed { CONFIRMED } else { 0 });
        buf.extend_from_slice(&self.page_id.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.txn_id.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.page);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses one record.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` for a wrong length, magic or version
    /// - `ChecksumMismatch` if the CRC does not match
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != RECORD_SIZE {
            return Err(CoreError::invalid_format(format!(
                "log record is {} bytes, expected {RECORD_SIZE}",
                bytes.len()
            )));
        }
        if bytes[0..4] != LOG_MAGIC {
            return Err(CoreError::invalid_format("bad log record magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != LOG_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported log record version {version}"
            )));
        }

        let body = RECORD_SIZE - 4;
        let stored = read_u32(&bytes[body..]);
        let actual = crc32fast::hash(&bytes[..body]);
        if stored != actual {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        Ok(Self {
            page_id: PageId::new(read_u32(&bytes[7..])),
            txn_id: TransactionId::new(read_u64(&bytes[11..])),
            confirmed: bytes[6] & CONFIRMED != 0,
            page: bytes[RECORD_HEADER_SIZE..body].to_vec(),
        })
    }
}

impl std::fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRecord")
            .field("page_id", &self.page_id)
            .field("txn_id", &self.txn_id)
            .field("confirmed", &self.confirmed)
            .finish_non_exhaustive()
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(confirmed: bool) -> LogRecord {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        LogRecord::new(PageId::new(7), TransactionId::new(42), confirmed, &page)
    }

    #[test]
    fn encoded_record_has_fixed_size() {
        assert_eq!(sample(false).encode().len(), RECORD_SIZE);
    }

    #[test]
    fn decode_restores_fields() {
        let record = sample(true);
        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.confirmed);
        assert_eq!(decoded.page[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn short_page_is_zero_padded() {
        let record = LogRecord::new(PageId::new(1), TransactionId::new(1), false, b"abc");
        assert_eq!(record.page.len(), PAGE_SIZE);
        assert_eq!(&record.page[..3], b"abc");
        assert!(record.page[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut bytes = sample(false).encode();
        bytes[RECORD_HEADER_SIZE + 10] ^= 0xFF;
        assert!(matches!(
            LogRecord::decode(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_and_length_are_invalid_format() {
        let mut bytes = sample(false).encode();
        bytes[0] = b'X';
        assert!(matches!(
            LogRecord::decode(&bytes),
            Err(CoreError::InvalidFormat { .. })
        ));
        assert!(matches!(
            LogRecord::decode(&bytes[..RECORD_SIZE - 1]),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut bytes = sample(false).encode();
        bytes[4] = 9;
        assert!(matches!(
            LogRecord::decode(&bytes),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
