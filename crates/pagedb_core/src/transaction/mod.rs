//! Page-level transactions.
//!
//! A transaction sees the data file plus the log as of its read version,
//! and its own uncommitted pages on top:
//!
//! - **Reads** take a shared page lock held until the end
//! - **Writes** take an exclusive page lock; pages stay private until commit
//! - **Allocation** holds the exclusive `Header` lock until the end
//! - **Commit** logs every dirty page through the WAL index
//!
//! Dropping an active transaction rolls it back. Once the engine starts
//! shutting down, every operation fails with `ShuttingDown`.

mod registry;
mod state;

pub use registry::{SignalOutcome, TransactionRegistry};
pub use state::TransactionState;

pub(crate) use state::{TransactionShared, TxnState};

use crate::disk::PageBuffer;
use crate::engine::Services;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockKey, LockMode};
use crate::types::{PageId, TransactionId, Version};
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::debug;

/// A page-level transaction.
///
/// Created by [`Engine::begin`](crate::Engine::begin).
pub struct Transaction {
    services: Arc<Services>,
    shared: Arc<TransactionShared>,
}

impl Transaction {
    pub(crate) fn new(services: Arc<Services>, shared: Arc<TransactionShared>) -> Self {
        Self { services, shared }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.shared.id
    }

    /// Returns the version this transaction reads at.
    #[must_use]
    pub fn read_version(&self) -> Version {
        self.shared.read_version
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.shared.state.lock().status
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Hands out a zeroed page buffer to fill and pass to `write_page`.
    #[must_use]
    pub fn new_page(&self) -> PageBuffer {
        self.services.disk.new_page()
    }

    /// Reads a page.
    ///
    /// Returns this transaction's own uncommitted image if there is one,
    /// otherwise the latest logged image visible at the read version,
    /// otherwise the data file's copy.
    pub fn read_page(&self, page_id: PageId) -> CoreResult<PageBuffer> {
        let mut state = self.active_state()?;
        self.check_data_page(page_id)?;

        if let Some(dirty) = state.dirty.get(&page_id) {
            let mut page = self.services.disk.new_page();
            page.copy_from_slice(dirty);
            return Ok(page);
        }
        if !state.page_locks.contains_key(&page_id) {
            let guard = self.services.locks.shared(LockKey::Page(page_id))?;
            state.page_locks.insert(page_id, guard);
        }

        match self.services.wal.read_page(page_id, self.shared.read_version)? {
            Some(page) => Ok(page),
            None => self.services.disk.read_page(page_id),
        }
    }

    /// Replaces the content of a page.
    ///
    /// A shared lock already held on the page is upgraded by releasing it
    /// and then waiting for the exclusive lock.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` for page 0 or a page past the end of the file
    /// - `ReadOnly` on a read-only engine
    /// - `LockTimeout` if the page stays locked by someone else
    pub fn write_page(&self, page_id: PageId, page: PageBuffer) -> CoreResult<()> {
        let mut state = self.active_state()?;
        self.check_data_page(page_id)?;
        self.lock_exclusive(&mut state, page_id)?;
        state.dirty.insert(page_id, page);
        Ok(())
    }

    /// Appends a zeroed page to the file and returns its id.
    ///
    /// The header stays exclusively locked until this transaction ends;
    /// rollback restores the header as it was before the first allocation.
    pub fn allocate_page(&self) -> CoreResult<PageId> {
        let mut state = self.active_state()?;
        let header = &self.services.header;

        if state.header_lock.is_none() {
            let guard = self.services.locks.exclusive(LockKey::Header)?;
            state.header_snapshot = Some(header.snapshot());
            state.header_lock = Some(guard);
        }

        let page_id = header.update(|h| -> CoreResult<PageId> {
            let id = h.next_page_id();
            h.page_count = h
                .page_count
                .checked_add(1)
                .filter(|count| *count != PageId::NONE.as_u32())
                .ok_or_else(|| CoreError::invalid_operation("data file is full"))?;
            Ok(id)
        })?;

        self.lock_exclusive(&mut state, page_id)?;
        state.dirty.insert(page_id, self.services.disk.new_page());
        debug!(txn = %self.shared.id, page = %page_id, "page allocated");
        Ok(page_id)
    }

    /// Commits the transaction.
    ///
    /// Dirty pages, and the header if this transaction allocated, are
    /// logged; they become visible to transactions started afterwards.
    /// Returns the commit version. On error the transaction is rolled back.
    pub fn commit(self) -> CoreResult<Version> {
        let mut state = self.active_state()?;

        let header_image = state
            .header_lock
            .is_some()
            .then(|| self.services.header.snapshot().encode());
        let mut pages: Vec<(PageId, &[u8])> =
            state.dirty.iter().map(|(id, page)| (*id, &page[..])).collect();
        if let Some(image) = &header_image {
            pages.push((PageId::HEADER, image));
        }

        let result = self.services.wal.confirm_transaction(self.shared.id, &pages);
        drop(pages);
        match result {
            Ok(version) => {
                state.finish_committed();
                drop(state);
                self.services.registry.unregister(self.shared.id);
                debug!(txn = %self.shared.id, %version, "transaction committed");
                Ok(version)
            }
            Err(err) => {
                self.shared.rollback_locked(&mut state);
                drop(state);
                self.services.registry.unregister(self.shared.id);
                Err(err)
            }
        }
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` if shutdown already rolled it back.
    pub fn rollback(self) -> CoreResult<()> {
        if self.finish_rollback() || !self.shared.is_signaled() {
            Ok(())
        } else {
            Err(CoreError::ShuttingDown)
        }
    }

    /// Rolls back if still active; returns whether anything was undone.
    fn finish_rollback(&self) -> bool {
        let mut state = self.shared.state.lock();
        let undone = self.shared.rollback_locked(&mut state);
        drop(state);
        if undone {
            self.services.registry.unregister(self.shared.id);
            debug!(txn = %self.shared.id, "transaction rolled back");
        }
        undone
    }

    fn active_state(&self) -> CoreResult<MutexGuard<'_, TxnState>> {
        if self.shared.is_signaled() {
            self.finish_rollback();
            return Err(CoreError::ShuttingDown);
        }
        let state = self.shared.state.lock();
        match state.status {
            TransactionState::Active if self.shared.is_signaled() => {
                drop(state);
                self.finish_rollback();
                Err(CoreError::ShuttingDown)
            }
            TransactionState::Active => Ok(state),
            TransactionState::Committed => {
                Err(CoreError::transaction_aborted("transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(CoreError::transaction_aborted("transaction already rolled back"))
            }
        }
    }

    fn check_data_page(&self, page_id: PageId) -> CoreResult<()> {
        if page_id == PageId::HEADER {
            return Err(CoreError::invalid_operation("page 0 is reserved for the header"));
        }
        if !self.services.header.read(|h| h.contains(page_id)) {
            return Err(CoreError::invalid_operation(format!(
                "{page_id} is past the end of the data file"
            )));
        }
        Ok(())
    }

    fn lock_exclusive(&self, state: &mut TxnState, page_id: PageId) -> CoreResult<()> {
        if state
            .page_locks
            .get(&page_id)
            .is_some_and(|g| g.mode() == LockMode::Exclusive)
        {
            return Ok(());
        }
        state.page_locks.remove(&page_id);
        let guard = self.services.locks.exclusive(LockKey::Page(page_id))?;
        state.page_locks.insert(page_id, guard);
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.finish_rollback();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.shared.id)
            .field("read_version", &self.shared.read_version)
            .field("state", &self.state())
            .finish()
    }
}
