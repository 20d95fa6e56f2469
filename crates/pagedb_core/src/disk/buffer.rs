//! Page buffers and the pool that accounts for them.

use crate::types::PAGE_SIZE;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Recycles page-sized allocations and counts the ones handed out.
#[derive(Debug)]
pub(crate) struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    in_use: AtomicUsize,
    max_free: usize,
}

impl BufferPool {
    pub(crate) fn new(max_free: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            in_use: AtomicUsize::new(0),
            max_free,
        })
    }

    /// Hands out a zeroed page buffer owned by the caller until dropped.
    pub(crate) fn acquire(self: &Arc<Self>) -> PageBuffer {
        let data = match self.free.lock().pop() {
            Some(mut data) => {
                data.fill(0);
                data
            }
            None => vec![0u8; PAGE_SIZE].into_boxed_slice(),
        };
        self.in_use.fetch_add(1, Ordering::SeqCst);
        PageBuffer {
            data,
            pool: Some(Arc::clone(self)),
        }
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    fn give_back(&self, data: Box<[u8]>) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        let mut free = self.free.lock();
        if free.len() < self.max_free {
            free.push(data);
        }
    }
}

/// Raw content of one page.
///
/// Buffers handed out by the disk service are pooled: they count towards
/// `pages_in_use` until dropped, at which point they return to the pool.
/// Unpooled buffers (startup reads, caller-built pages) are never counted.
pub struct PageBuffer {
    data: Box<[u8]>,
    pool: Option<Arc<BufferPool>>,
}

impl PageBuffer {
    /// Creates an unpooled zeroed page.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            pool: None,
        }
    }

    /// Creates an unpooled page from `bytes`, zero-padded or cut to a page.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut page = Self::zeroed();
        let len = bytes.len().min(PAGE_SIZE);
        page.data[..len].copy_from_slice(&bytes[..len]);
        page
    }

    /// Returns `true` if this buffer came from the pool.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Copies the content into a plain vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl Deref for PageBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PageBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuffer")
            .field("pooled", &self.is_pooled())
            .finish_non_exhaustive()
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let data = std::mem::take(&mut self.data);
            pool.give_back(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_buffers_are_counted_until_dropped() {
        let pool = BufferPool::new(4);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.in_use(), 2);
        assert!(a.is_pooled());

        drop(a);
        assert_eq!(pool.in_use(), 1);
        drop(b);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn recycled_buffers_are_zeroed() {
        let pool = BufferPool::new(4);
        let mut page = pool.acquire();
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        drop(page);

        let page = pool.acquire();
        assert!(page.iter().all(|b| *b == 0));
    }

    #[test]
    fn unpooled_buffers_are_not_counted() {
        let pool = BufferPool::new(4);
        let page = PageBuffer::from_bytes(b"abc");
        assert!(!page.is_pooled());
        assert_eq!(page.len(), PAGE_SIZE);
        assert_eq!(&page[..3], b"abc");
        drop(page);
        assert_eq!(pool.in_use(), 0);
    }
}
