//! Header page (page 0) and the cell that holds it.
//!
//! ## Layout
//!
//! ```text
//! | magic "PGDB" (4) | version u16 (2) | reserved (2) | page_count u32 (4) |
//! | free_empty_page u32 (4) | free_data_pages 5 x u32 (20) | crc32 (4) | zero padding |
//! ```
//!
//! The CRC covers every byte before it. The rest of the page is zero.

use crate::error::{CoreError, CoreResult};
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::sync::Arc;

/// Magic bytes at the start of every data file.
pub const HEADER_MAGIC: [u8; 4] = *b"PGDB";

/// Current data file format version.
pub const FILE_VERSION: u16 = 1;

/// Number of free-data-page list heads kept in the header.
pub const FREE_DATA_SLOTS: usize = 5;

const PAGE_COUNT_AT: usize = 8;
const FREE_EMPTY_AT: usize = 12;
const FREE_DATA_AT: usize = 16;
const CRC_AT: usize = FREE_DATA_AT + FREE_DATA_SLOTS * 4;

/// Bytes of page 0 that carry header fields, including the CRC.
pub const HEADER_LEN: usize = CRC_AT + 4;

/// Metadata stored in page 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPage {
    /// Data file format version.
    pub file_version: u16,
    /// Number of pages in the data file, header included.
    pub page_count: u32,
    /// Head of the empty-page free list.
    pub free_empty_page: PageId,
    /// Heads of the free-data-page lists, bucketed by free space.
    pub free_data_pages: [PageId; FREE_DATA_SLOTS],
}

impl Default for HeaderPage {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderPage {
    /// Header of a freshly created data file: only the header page exists.
    #[must_use]
    pub fn new() -> Self {
        Self {
            file_version: FILE_VERSION,
            page_count: 1,
            free_empty_page: PageId::NONE,
            free_data_pages: [PageId::NONE; FREE_DATA_SLOTS],
        }
    }

    /// Parses the header from the raw bytes of page 0.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` on a short page, bad magic, a future version or an
    ///   empty page count
    /// - `ChecksumMismatch` if the stored CRC does not match
    pub fn decode(page: &[u8]) -> CoreResult<Self> {
        if page.len() < HEADER_LEN {
            return Err(CoreError::invalid_format(format!(
                "header page too short: {} bytes",
                page.len()
            )));
        }
        if page[0..4] != HEADER_MAGIC {
            return Err(CoreError::invalid_format("not a data file: bad header magic"));
        }

        let stored = read_u32(page, CRC_AT);
        let computed = crc32fast::hash(&page[..CRC_AT]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let file_version = u16::from_le_bytes([page[4], page[5]]);
        if file_version > FILE_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported file version {file_version}"
            )));
        }

        let page_count = read_u32(page, PAGE_COUNT_AT);
        if page_count == 0 {
            return Err(CoreError::invalid_format("header reports zero pages"));
        }

        let mut free_data_pages = [PageId::NONE; FREE_DATA_SLOTS];
        for (slot, head) in free_data_pages.iter_mut().enumerate() {
            *head = PageId::new(read_u32(page, FREE_DATA_AT + slot * 4));
        }

        Ok(Self {
            file_version,
            page_count,
            free_empty_page: PageId::new(read_u32(page, FREE_EMPTY_AT)),
            free_data_pages,
        })
    }

    /// Serializes the header into a full page image.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&HEADER_MAGIC);
        page[4..6].copy_from_slice(&self.file_version.to_le_bytes());
        page[PAGE_COUNT_AT..PAGE_COUNT_AT + 4].copy_from_slice(&self.page_count.to_le_bytes());
        page[FREE_EMPTY_AT..FREE_EMPTY_AT + 4]
            .copy_from_slice(&self.free_empty_page.as_u32().to_le_bytes());
        for (slot, head) in self.free_data_pages.iter().enumerate() {
            let at = FREE_DATA_AT + slot * 4;
            page[at..at + 4].copy_from_slice(&head.as_u32().to_le_bytes());
        }
        let crc = crc32fast::hash(&page[..CRC_AT]);
        page[CRC_AT..CRC_AT + 4].copy_from_slice(&crc.to_le_bytes());
        page
    }

    /// Returns the id the next allocated page will get.
    #[must_use]
    pub fn next_page_id(&self) -> PageId {
        PageId::new(self.page_count)
    }

    /// Returns `true` if `page_id` lies inside the data file.
    #[must_use]
    pub fn contains(&self, page_id: PageId) -> bool {
        page_id.as_u32() < self.page_count
    }
}

fn read_u32(page: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([page[at], page[at + 1], page[at + 2], page[at + 3]])
}

/// Single-slot cell holding the engine's current header.
///
/// Every service that needs the header holds a clone of the cell, so when
/// restoration swaps in a header recovered from the log all of them observe
/// it without being told.
#[derive(Debug, Clone)]
pub struct HeaderCell {
    slot: Arc<RwLock<HeaderPage>>,
}

impl HeaderCell {
    /// Creates a cell holding `header`.
    #[must_use]
    pub fn new(header: HeaderPage) -> Self {
        Self {
            slot: Arc::new(RwLock::new(header)),
        }
    }

    /// Returns a copy of the current header.
    #[must_use]
    pub fn snapshot(&self) -> HeaderPage {
        self.slot.read().clone()
    }

    /// Replaces the whole header, returning the previous one.
    pub fn replace(&self, header: HeaderPage) -> HeaderPage {
        std::mem::replace(&mut *self.slot.write(), header)
    }

    /// Reads the header in place.
    pub fn read<R>(&self, f: impl FnOnce(&HeaderPage) -> R) -> R {
        f(&self.slot.read())
    }

    /// Mutates the header in place.
    ///
    /// Callers hold the exclusive `Header` lock, or run inside an
    /// orchestrator-exclusive window (startup, checkpoint, shutdown).
    pub fn update<R>(&self, f: impl FnOnce(&mut HeaderPage) -> R) -> R {
        f(&mut self.slot.write())
    }
}
