//! Registry of live transactions and the sticky shutdown flag.

use super::state::TransactionShared;
use crate::error::{CoreError, CoreResult};
use crate::header::HeaderCell;
use crate::types::{TransactionId, Version};
use crate::wal::ActiveTransactions;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug)]
struct RegistryState {
    shutting_down: bool,
    next_id: u64,
    active: HashMap<TransactionId, Arc<TransactionShared>>,
}

/// Result of broadcasting the shutdown signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalOutcome {
    /// Transactions rolled back by the signal.
    pub rolled_back: usize,
    /// Transactions that could not be rolled back in time; they stay
    /// signaled and roll back when their owner next touches them.
    pub failed: usize,
}

/// Tracks every live transaction of an engine.
///
/// Registration and the shutdown flag share one mutex: once
/// [`begin_shutdown`](Self::begin_shutdown) returns, no new transaction
/// can register.
#[derive(Debug)]
pub struct TransactionRegistry {
    state: Mutex<RegistryState>,
    drained: Condvar,
}

impl TransactionRegistry {
    /// Creates a registry whose first transaction gets `first_id`.
    #[must_use]
    pub fn new(first_id: TransactionId) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                shutting_down: false,
                next_id: first_id.as_u64().max(1),
                active: HashMap::new(),
            }),
            drained: Condvar::new(),
        }
    }

    /// Registers a new transaction.
    ///
    /// `read_version` is evaluated under the registry lock, so a checkpoint
    /// computing the oldest active version never misses a transaction that
    /// is halfway through starting.
    pub(crate) fn register(
        &self,
        header: HeaderCell,
        read_version: impl FnOnce() -> Version,
    ) -> CoreResult<Arc<TransactionShared>> {
        let mut state = self.state.lock();
        if state.shutting_down {
            return Err(CoreError::ShuttingDown);
        }
        let id = TransactionId::new(state.next_id);
        state.next_id += 1;
        let shared = Arc::new(TransactionShared::new(id, read_version(), header));
        state.active.insert(id, Arc::clone(&shared));
        debug!(txn = %id, read_version = %shared.read_version, "transaction registered");
        Ok(shared)
    }

    /// Removes a finished transaction.
    pub(crate) fn unregister(&self, id: TransactionId) {
        let mut state = self.state.lock();
        if state.active.remove(&id).is_some() && state.active.is_empty() {
            self.drained.notify_all();
        }
    }

    /// Sets the sticky shutdown flag.
    ///
    /// Returns `true` for the call that actually set it.
    pub fn begin_shutdown(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.shutting_down, true)
    }

    /// Signals every registered transaction and rolls it back.
    ///
    /// A transaction busy in another thread is waited for up to `timeout`.
    /// Failures are logged and counted; they never stop the broadcast.
    pub fn signal_all(&self, timeout: Duration) -> SignalOutcome {
        let targets: Vec<Arc<TransactionShared>> =
            self.state.lock().active.values().cloned().collect();
        let mut outcome = SignalOutcome::default();

        for shared in targets {
            shared.signal();
            match shared.state.try_lock_for(timeout) {
                Some(mut state) => {
                    shared.rollback_locked(&mut state);
                    drop(state);
                    self.unregister(shared.id);
                    outcome.rolled_back += 1;
                }
                None => {
                    warn!(txn = %shared.id, "transaction busy, rollback on shutdown deferred");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}

impl ActiveTransactions for TransactionRegistry {
    fn oldest_read_version(&self) -> Option<Version> {
        self.state
            .lock()
            .active
            .values()
            .map(|t| t.read_version)
            .min()
    }

    fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    fn wait_until_empty(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.active.is_empty() {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.active.len()
    }
}
