//! Core type definitions for PageDB.

use std::fmt;

/// Size of every page in the data file and of every page image in the log.
pub const PAGE_SIZE: usize = 8192;

/// Identifier of a page in the data file.
///
/// Page `0` is always the header page. The byte position of a page in the
/// data file is `id * PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl PageId {
    /// The header page.
    pub const HEADER: Self = Self(0);

    /// Marker for "no page" in free-space lists.
    pub const NONE: Self = Self(u32::MAX);

    /// Creates a new page ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the byte offset of this page in the data file.
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }

    /// Returns `true` for the [`PageId::NONE`] marker.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within
/// one engine lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Commit version used to decide which logged page images a reader sees.
///
/// Every confirmed transaction gets the next version. A reader started at
/// version `v` sees the latest logged image with a version `<= v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(pub u64);

impl Version {
    /// Creates a new version.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets() {
        assert_eq!(PageId::HEADER.offset(), 0);
        assert_eq!(PageId::new(3).offset(), 3 * PAGE_SIZE as u64);
    }

    #[test]
    fn none_marker() {
        assert!(PageId::NONE.is_none());
        assert!(!PageId::new(7).is_none());
    }

    #[test]
    fn version_ordering() {
        let v = Version::new(4);
        assert!(v.next() > v);
        assert_eq!(v.next().as_u64(), 5);
    }

    #[test]
    fn display_formats() {
        assert_eq!(PageId::new(9).to_string(), "page:9");
        assert_eq!(TransactionId::new(2).to_string(), "txn:2");
        assert_eq!(Version::new(1).to_string(), "v1");
    }
}
