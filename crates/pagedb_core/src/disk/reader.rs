//! One-shot linear reader over the data file.

use super::buffer::PageBuffer;
use super::Files;
use crate::error::{CoreError, CoreResult};
use crate::types::{PageId, PAGE_SIZE};

/// Reads data pages front to back straight from the file.
///
/// Used once during startup, before the page cache is trusted. Pages come
/// back unpooled, so holding one (the header page) never shows up in
/// `pages_in_use`.
pub struct StartupReader<'a> {
    files: &'a Files,
    size: u64,
    next: u32,
}

impl<'a> StartupReader<'a> {
    pub(crate) fn new(files: &'a Files) -> CoreResult<Self> {
        let size = files.data.lock().size().map_err(CoreError::from_storage)?;
        Ok(Self {
            files,
            size,
            next: 0,
        })
    }

    /// Reads the next page, or `None` at the end of the file.
    pub fn next_page(&mut self) -> CoreResult<Option<(PageId, PageBuffer)>> {
        let id = PageId::new(self.next);
        if id.offset() + PAGE_SIZE as u64 > self.size {
            return Ok(None);
        }
        let bytes = self
            .files
            .data
            .lock()
            .read_at(id.offset(), PAGE_SIZE)
            .map_err(CoreError::from_storage)?;
        self.next += 1;
        Ok(Some((id, PageBuffer::from_bytes(&bytes))))
    }
}
