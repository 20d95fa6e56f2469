//! Lock service: shared/exclusive locks per resource with bounded waits.
//!
//! Locks are cooperative and in-process. Waiters queue per resource in
//! arrival order; a waiter is granted only once it reaches the head of its
//! queue and its mode is compatible with the current holders, so a queued
//! exclusive request is never starved by a stream of new shared requests.
//!
//! In read-only mode exclusive requests fail immediately with
//! [`CoreError::ReadOnly`], whatever the timeout.

use crate::error::{CoreError, CoreResult};
use crate::types::PageId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A lockable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// The header page; held exclusively while a transaction allocates pages.
    Header,
    /// The log; shared by commits and log reads, exclusive for checkpoints.
    Log,
    /// A single data page.
    Page(PageId),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => f.write_str("header"),
            Self::Log => f.write_str("log"),
            Self::Page(id) => write!(f, "{id}"),
        }
    }
}

/// Lock level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders at once.
    Shared,
    /// A single holder.
    Exclusive,
}

impl LockMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
        }
    }
}

#[derive(Debug, Default)]
struct Resource {
    shared: usize,
    exclusive: bool,
    waiters: VecDeque<(u64, LockMode)>,
}

impl Resource {
    fn compatible(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive,
            LockMode::Exclusive => !self.exclusive && self.shared == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared += 1,
            LockMode::Exclusive => self.exclusive = true,
        }
    }

    fn is_idle(&self) -> bool {
        self.shared == 0 && !self.exclusive && self.waiters.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    closed: bool,
    next_ticket: u64,
    resources: HashMap<LockKey, Resource>,
}

impl LockTable {
    fn forget_waiter(&mut self, key: &LockKey, ticket: u64) {
        if let Some(resource) = self.resources.get_mut(key) {
            resource.waiters.retain(|(t, _)| *t != ticket);
            if resource.is_idle() {
                self.resources.remove(key);
            }
        }
    }
}

#[derive(Debug)]
struct LockInner {
    timeout: Duration,
    read_only: bool,
    table: Mutex<LockTable>,
    changed: Condvar,
}

impl LockInner {
    fn release(&self, key: &LockKey, mode: LockMode) {
        let mut table = self.table.lock();
        if let Some(resource) = table.resources.get_mut(key) {
            match mode {
                LockMode::Shared => resource.shared = resource.shared.saturating_sub(1),
                LockMode::Exclusive => resource.exclusive = false,
            }
            if resource.is_idle() {
                table.resources.remove(key);
            }
        }
        drop(table);
        self.changed.notify_all();
    }
}

/// Grants shared and exclusive locks on [`LockKey`]s.
///
/// Cloning the service is cheap; clones share one lock table.
#[derive(Debug, Clone)]
pub struct LockService {
    inner: Arc<LockInner>,
}

impl LockService {
    /// Creates a lock service.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Longest time any acquisition waits
    /// * `read_only` - Reject every exclusive request
    #[must_use]
    pub fn new(timeout: Duration, read_only: bool) -> Self {
        Self {
            inner: Arc::new(LockInner {
                timeout,
                read_only,
                table: Mutex::new(LockTable::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Returns the configured wait timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Returns `true` if exclusive locks are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Acquires a shared lock, waiting up to the configured timeout.
    pub fn shared(&self, key: LockKey) -> CoreResult<LockGuard> {
        self.acquire(key, LockMode::Shared)
    }

    /// Acquires an exclusive lock, waiting up to the configured timeout.
    pub fn exclusive(&self, key: LockKey) -> CoreResult<LockGuard> {
        self.acquire(key, LockMode::Exclusive)
    }

    /// Acquires a lock in `mode`, waiting up to the configured timeout.
    ///
    /// # Errors
    ///
    /// - `ReadOnly` for exclusive requests in read-only mode
    /// - `LockTimeout` if the lock is not granted in time
    /// - `Disposed` if the service is closed before or while waiting
    pub fn acquire(&self, key: LockKey, mode: LockMode) -> CoreResult<LockGuard> {
        if mode == LockMode::Exclusive && self.inner.read_only {
            return Err(CoreError::ReadOnly);
        }

        let deadline = Instant::now() + self.inner.timeout;
        let mut table = self.inner.table.lock();
        if table.closed {
            return Err(CoreError::Disposed);
        }

        let ticket = table.next_ticket;
        table.next_ticket += 1;
        table
            .resources
            .entry(key.clone())
            .or_default()
            .waiters
            .push_back((ticket, mode));

        loop {
            if table.closed {
                table.forget_waiter(&key, ticket);
                return Err(CoreError::Disposed);
            }

            let resource = table.resources.entry(key.clone()).or_default();
            let at_head = resource.waiters.front().map(|(t, _)| *t) == Some(ticket);
            if at_head && resource.compatible(mode) {
                resource.waiters.pop_front();
                resource.grant(mode);
                drop(table);
                // The next waiter may be compatible too (shared after shared).
                self.inner.changed.notify_all();
                return Ok(LockGuard {
                    inner: Arc::clone(&self.inner),
                    key,
                    mode,
                });
            }

            if self.inner.changed.wait_until(&mut table, deadline).timed_out() {
                let resource = table.resources.entry(key.clone()).or_default();
                let at_head = resource.waiters.front().map(|(t, _)| *t) == Some(ticket);
                if at_head && resource.compatible(mode) {
                    continue;
                }
                table.forget_waiter(&key, ticket);
                drop(table);
                self.inner.changed.notify_all();
                debug!(resource = %key, mode = mode.as_str(), "lock wait timed out");
                return Err(CoreError::LockTimeout {
                    resource: key.to_string(),
                    mode: mode.as_str(),
                    timeout: self.inner.timeout,
                });
            }
        }
    }

    /// Takes an exclusive lock only if it is free right now.
    ///
    /// Returns `Ok(None)` when the resource is held or has waiters.
    ///
    /// # Errors
    ///
    /// `ReadOnly` in read-only mode, `Disposed` after close.
    pub fn try_exclusive(&self, key: LockKey) -> CoreResult<Option<LockGuard>> {
        if self.inner.read_only {
            return Err(CoreError::ReadOnly);
        }
        let mut table = self.inner.table.lock();
        if table.closed {
            return Err(CoreError::Disposed);
        }
        let resource = table.resources.entry(key.clone()).or_default();
        if resource.waiters.is_empty() && resource.compatible(LockMode::Exclusive) {
            resource.grant(LockMode::Exclusive);
            Ok(Some(LockGuard {
                inner: Arc::clone(&self.inner),
                key,
                mode: LockMode::Exclusive,
            }))
        } else {
            if resource.is_idle() {
                table.resources.remove(&key);
            }
            Ok(None)
        }
    }

    /// Returns the number of resources currently held or waited on.
    #[must_use]
    pub fn active_resources(&self) -> usize {
        self.inner.table.lock().resources.len()
    }

    /// Returns `true` if `key` is currently held in any mode.
    #[must_use]
    pub fn is_held(&self, key: &LockKey) -> bool {
        self.inner
            .table
            .lock()
            .resources
            .get(key)
            .is_some_and(|r| r.shared > 0 || r.exclusive)
    }

    /// Closes the service.
    ///
    /// Waiters wake up with `Disposed`; new acquisitions fail the same way.
    /// Guards already handed out still release normally. Closing twice is a
    /// no-op.
    pub fn close(&self) {
        let mut table = self.inner.table.lock();
        if table.closed {
            return;
        }
        table.closed = true;
        drop(table);
        self.inner.changed.notify_all();
        debug!("lock service closed");
    }

    /// Returns `true` once [`LockService::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.table.lock().closed
    }
}

/// A held lock, released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    inner: Arc<LockInner>,
    key: LockKey,
    mode: LockMode,
}

impl LockGuard {
    /// Returns the locked resource.
    #[must_use]
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Returns the held mode.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.inner.release(&self.key, self.mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn service(ms: u64) -> LockService {
        LockService::new(Duration::from_millis(ms), false)
    }

    #[test]
    fn shared_locks_coexist() {
        let locks = service(50);
        let a = locks.shared(LockKey::Header).unwrap();
        let b = locks.shared(LockKey::Header).unwrap();
        assert_eq!(a.mode(), LockMode::Shared);
        assert!(locks.is_held(&LockKey::Header));
        drop(a);
        drop(b);
        assert!(!locks.is_held(&LockKey::Header));
        assert_eq!(locks.active_resources(), 0);
    }

    #[test]
    fn exclusive_blocks_shared_until_timeout() {
        let locks = service(30);
        let _x = locks.exclusive(LockKey::Page(PageId::new(1))).unwrap();

        let err = locks.shared(LockKey::Page(PageId::new(1))).unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn different_resources_do_not_contend() {
        let locks = service(30);
        let _a = locks.exclusive(LockKey::Page(PageId::new(1))).unwrap();
        let _b = locks.exclusive(LockKey::Page(PageId::new(2))).unwrap();
        let _c = locks.exclusive(LockKey::Header).unwrap();
    }

    #[test]
    fn release_wakes_waiter() {
        let locks = service(2_000);
        let guard = locks.exclusive(LockKey::Log).unwrap();

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || locks.shared(LockKey::Log).map(|g| g.mode()))
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert_eq!(waiter.join().unwrap().unwrap(), LockMode::Shared);
    }

    #[test]
    fn queued_exclusive_is_not_starved_by_new_readers() {
        let locks = service(2_000);
        let reader = locks.shared(LockKey::Log).unwrap();

        let writer = {
            let locks = locks.clone();
            thread::spawn(move || {
                let _g = locks.exclusive(LockKey::Log).unwrap();
            })
        };
        thread::sleep(Duration::from_millis(30));

        // The writer is queued, so a new reader must wait behind it.
        let late = locks.clone();
        let late_reader = thread::spawn(move || late.shared(LockKey::Log).is_ok());

        thread::sleep(Duration::from_millis(30));
        assert!(!late_reader.is_finished());

        drop(reader);
        writer.join().unwrap();
        assert!(late_reader.join().unwrap());
    }

    #[test]
    fn read_only_rejects_exclusive_immediately() {
        let locks = LockService::new(Duration::from_secs(60), true);
        let start = Instant::now();
        assert!(matches!(
            locks.exclusive(LockKey::Header),
            Err(CoreError::ReadOnly)
        ));
        assert!(matches!(
            locks.try_exclusive(LockKey::Header),
            Err(CoreError::ReadOnly)
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(locks.shared(LockKey::Header).is_ok());
    }

    #[test]
    fn try_exclusive_never_waits() {
        let locks = service(5_000);
        let held = locks.shared(LockKey::Page(PageId::new(4))).unwrap();
        assert!(locks
            .try_exclusive(LockKey::Page(PageId::new(4)))
            .unwrap()
            .is_none());
        drop(held);
        assert!(locks
            .try_exclusive(LockKey::Page(PageId::new(4)))
            .unwrap()
            .is_some());
    }

    #[test]
    fn close_fails_waiters_and_new_requests() {
        let locks = service(5_000);
        let held = locks.exclusive(LockKey::Header).unwrap();

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || locks.exclusive(LockKey::Header).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        locks.close();

        assert!(matches!(waiter.join().unwrap(), Err(CoreError::Disposed)));
        assert!(matches!(
            locks.shared(LockKey::Log),
            Err(CoreError::Disposed)
        ));
        drop(held);
        locks.close();
        assert!(locks.is_closed());
    }

    #[test]
    fn exclusive_is_mutually_exclusive_across_threads() {
        let locks = service(5_000);
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _g = locks.exclusive(LockKey::Page(PageId::new(7))).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_resources(), 0);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(48))]

            #[test]
            fn grants_follow_mode_compatibility(
                ops in prop::collection::vec(
                    (0u32..3, any::<bool>(), any::<bool>(), any::<prop::sample::Index>()),
                    1..24,
                ),
            ) {
                let locks = service(1);
                let mut held: Vec<LockGuard> = Vec::new();
                for (page, exclusive, release, pick) in ops {
                    if release && !held.is_empty() {
                        held.remove(pick.index(held.len()));
                        continue;
                    }
                    let key = LockKey::Page(PageId::new(page));
                    let mode = if exclusive { LockMode::Exclusive } else { LockMode::Shared };
                    let holders: Vec<LockMode> = held
                        .iter()
                        .filter(|g| *g.key() == key)
                        .map(LockGuard::mode)
                        .collect();
                    let compatible = holders.is_empty()
                        || (mode == LockMode::Shared && holders.iter().all(|m| *m == LockMode::Shared));

                    match locks.acquire(key, mode) {
                        Ok(guard) => {
                            prop_assert!(compatible);
                            held.push(guard);
                        }
                        Err(CoreError::LockTimeout { .. }) => prop_assert!(!compatible),
                        Err(e) => prop_assert!(false, "unexpected error: {}", e),
                    }
                }
                drop(held);
                prop_assert_eq!(locks.active_resources(), 0);
            }
        }
    }
}
