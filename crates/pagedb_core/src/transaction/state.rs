//! Transaction state shared between the owning handle and the registry.

use crate::disk::PageBuffer;
use crate::header::{HeaderCell, HeaderPage};
use crate::lock::LockGuard;
use crate::types::{PageId, TransactionId, Version};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back, by its owner or by shutdown.
    RolledBack,
}

/// Mutable part of a transaction.
pub(crate) struct TxnState {
    pub(crate) status: TransactionState,
    pub(crate) page_locks: HashMap<PageId, LockGuard>,
    pub(crate) header_lock: Option<LockGuard>,
    /// Header as it was before this transaction first allocated a page.
    pub(crate) header_snapshot: Option<HeaderPage>,
    pub(crate) dirty: BTreeMap<PageId, PageBuffer>,
}

impl TxnState {
    fn new() -> Self {
        Self {
            status: TransactionState::Active,
            page_locks: HashMap::new(),
            header_lock: None,
            header_snapshot: None,
            dirty: BTreeMap::new(),
        }
    }

    /// Drops dirty pages and locks after a successful commit.
    pub(crate) fn finish_committed(&mut self) {
        self.dirty.clear();
        self.header_snapshot = None;
        self.header_lock = None;
        self.page_locks.clear();
        self.status = TransactionState::Committed;
    }
}

/// A registered transaction.
///
/// The owning [`Transaction`](super::Transaction) and the registry both
/// hold it, so shutdown can roll the transaction back from another thread.
pub(crate) struct TransactionShared {
    pub(crate) id: TransactionId,
    pub(crate) read_version: Version,
    signaled: AtomicBool,
    pub(crate) state: Mutex<TxnState>,
    header: HeaderCell,
}

impl TransactionShared {
    pub(crate) fn new(id: TransactionId, read_version: Version, header: HeaderCell) -> Self {
        Self {
            id,
            read_version,
            signaled: AtomicBool::new(false),
            state: Mutex::new(TxnState::new()),
            header,
        }
    }

    /// Marks the transaction as shutdown-signaled.
    pub(crate) fn signal(&self) {
        self.signaled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Discards everything the transaction did.
    ///
    /// The header snapshot is restored before the header lock goes.
    /// Returns `false` if the transaction had already finished.
    pub(crate) fn rollback_locked(&self, state: &mut TxnState) -> bool {
        if state.status != TransactionState::Active {
            return false;
        }
        state.dirty.clear();
        if let Some(snapshot) = state.header_snapshot.take() {
            self.header.replace(snapshot);
        }
        state.header_lock = None;
        state.page_locks.clear();
        state.status = TransactionState::RolledBack;
        true
    }
}

impl std::fmt::Debug for TransactionShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionShared")
            .field("id", &self.id)
            .field("read_version", &self.read_version)
            .field("signaled", &self.is_signaled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockKey, LockService};
    use std::time::Duration;

    #[test]
    fn rollback_restores_header_and_releases_locks() {
        let header = HeaderCell::new(HeaderPage::new());
        let locks = LockService::new(Duration::from_millis(50), false);
        let shared = TransactionShared::new(TransactionId::new(1), Version::default(), header.clone());

        {
            let mut state = shared.state.lock();
            state.header_lock = Some(locks.exclusive(LockKey::Header).unwrap());
            state.header_snapshot = Some(header.snapshot());
            header.update(|h| h.page_count = 5);
            state.dirty.insert(PageId::new(1), PageBuffer::zeroed());
        }

        let mut state = shared.state.lock();
        assert!(shared.rollback_locked(&mut state));
        assert_eq!(state.status, TransactionState::RolledBack);
        assert!(state.dirty.is_empty());
        assert_eq!(header.snapshot().page_count, 1);
        assert!(!locks.is_held(&LockKey::Header));

        assert!(!shared.rollback_locked(&mut state));
    }
}
