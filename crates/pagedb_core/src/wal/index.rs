//! WAL index service: which log offset holds the current image of a page.

use crate::disk::{DiskService, PageBuffer};
use crate::error::{CoreError, CoreResult};
use crate::header::{HeaderCell, HeaderPage};
use crate::lock::{LockGuard, LockKey, LockService};
use crate::types::{PageId, TransactionId, Version};
use crate::wal::iterator::{DamagedTail, LogRecordIterator};
use crate::wal::record::{LogRecord, RECORD_SIZE};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How much a checkpoint folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Runs alongside transactions; folds only pages no active reader
    /// could still need from the log.
    Incremental,
    /// Requires zero active transactions and folds everything.
    Shutdown,
}

/// View of the live transactions a checkpoint has to respect.
pub trait ActiveTransactions {
    /// Lowest read version among active transactions, if any.
    fn oldest_read_version(&self) -> Option<Version>;

    /// Number of active transactions.
    fn active_count(&self) -> usize;

    /// Blocks until no transaction is active or `timeout` elapses.
    ///
    /// Returns the number still active.
    fn wait_until_empty(&self, timeout: Duration) -> usize;
}

/// Outcome of [`WalIndexService::restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Valid records read.
    pub records: usize,
    /// Transactions whose confirmed record was found.
    pub confirmed_transactions: usize,
    /// Records of transactions that never confirmed.
    pub unconfirmed_records: usize,
    /// Highest transaction id seen in the log.
    pub max_txn_id: Option<TransactionId>,
    /// Whether a confirmed transaction carried a header image.
    pub header_replaced: bool,
    /// Damaged record dropped from the tail.
    pub damaged_tail: Option<DamagedTail>,
}

/// Page id to `(version, log offset)` pairs, oldest first.
type PageEntries = HashMap<PageId, Vec<(Version, u64)>>;

#[derive(Debug, Default)]
struct IndexState {
    pages: PageEntries,
    version: Version,
}

impl IndexState {
    fn insert(&mut self, offsets: &[(PageId, u64)]) -> Version {
        let version = self.version.next();
        self.version = version;
        for (page_id, offset) in offsets {
            self.pages
                .entry(*page_id)
                .or_default()
                .push((version, *offset));
        }
        version
    }
}

/// Maps page ids to the log records that hold their latest images.
///
/// Every indexed offset points at a complete, checksummed record of a
/// confirmed transaction. Entries leave the index only inside a checkpoint
/// holding the exclusive `Log` lock, after the folded pages are durable in
/// the data file.
pub struct WalIndexService {
    disk: Arc<DiskService>,
    locks: LockService,
    state: RwLock<IndexState>,
}

impl WalIndexService {
    /// Creates an empty index bound to `disk` and `locks`.
    #[must_use]
    pub fn new(disk: Arc<DiskService>, locks: LockService) -> Self {
        Self {
            disk,
            locks,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Rebuilds the index from the log.
    ///
    /// Records are buffered per transaction until its confirmed record;
    /// transactions that never confirmed are ignored. A confirmed header
    /// image replaces the content of `header`. A damaged tail is dropped
    /// and, unless the engine is read-only, cut from the log.
    ///
    /// # Errors
    ///
    /// `Recovery` for damage anywhere but the tail, or a header image that
    /// does not parse.
    pub fn restore(&self, header: &HeaderCell) -> CoreResult<RestoreReport> {
        let mut report = RestoreReport::default();
        let mut pending: HashMap<TransactionId, Vec<(PageId, u64)>> = HashMap::new();
        let mut pending_header: HashMap<TransactionId, Vec<u8>> = HashMap::new();
        let mut state = self.state.write();

        let valid_end = self.disk.with_log(|log| -> CoreResult<u64> {
            let mut iter = LogRecordIterator::new(log)?;
            for item in &mut iter {
                let (offset, record) = item?;
                report.records += 1;
                report.max_txn_id = report.max_txn_id.max(Some(record.txn_id));

                pending
                    .entry(record.txn_id)
                    .or_default()
                    .push((record.page_id, offset));
                if record.page_id == PageId::HEADER {
                    pending_header.insert(record.txn_id, record.page);
                }
                if !record.confirmed {
                    continue;
                }

                let offsets = pending.remove(&record.txn_id).unwrap_or_default();
                state.insert(&offsets);
                report.confirmed_transactions += 1;

                if let Some(image) = pending_header.remove(&record.txn_id) {
                    let restored = HeaderPage::decode(&image).map_err(|e| {
                        CoreError::recovery(format!(
                            "header image of {} at offset {offset}: {e}",
                            record.txn_id
                        ))
                    })?;
                    header.replace(restored);
                    report.header_replaced = true;
                }
            }
            report.damaged_tail = iter.damaged_tail().cloned();
            Ok(iter.valid_end())
        })?;
        drop(state);

        report.unconfirmed_records = pending.values().map(Vec::len).sum();
        if let Some(tail) = &report.damaged_tail {
            warn!(
                offset = tail.offset,
                len = tail.len,
                reason = %tail.reason,
                "dropping damaged log tail"
            );
            if !self.disk.is_read_only() {
                self.disk.truncate_log(valid_end)?;
            }
        }

        info!(
            records = report.records,
            transactions = report.confirmed_transactions,
            pages = self.len(),
            "log restored"
        );
        Ok(report)
    }

    /// Logs the pages of a transaction and makes them visible.
    ///
    /// The last record carries the confirmed flag. Pages become visible,
    /// under a new version, only once every record is durable.
    ///
    /// # Errors
    ///
    /// `LockTimeout` if a checkpoint holds the log for too long, or any
    /// disk error; on error nothing is indexed.
    pub fn confirm_transaction(
        &self,
        txn_id: TransactionId,
        pages: &[(PageId, &[u8])],
    ) -> CoreResult<Version> {
        if pages.is_empty() {
            return Ok(self.current_version());
        }
        let _log = self.locks.shared(LockKey::Log)?;

        let last = pages.len() - 1;
        let mut offsets = Vec::with_capacity(pages.len());
        for (i, (page_id, page)) in pages.iter().enumerate() {
            let record = LogRecord::new(*page_id, txn_id, i == last, page);
            offsets.push((*page_id, self.disk.append_log(record.encode())?));
        }
        self.disk.wait_for_queue()?;

        let version = self.state.write().insert(&offsets);
        debug!(txn = %txn_id, pages = pages.len(), %version, "transaction confirmed");
        Ok(version)
    }

    /// Log offset of the latest image of `page_id` visible at `read_version`.
    #[must_use]
    pub fn find(&self, page_id: PageId, read_version: Version) -> Option<u64> {
        self.state.read().pages.get(&page_id).and_then(|entries| {
            entries
                .iter()
                .rev()
                .find(|(version, _)| *version <= read_version)
                .map(|(_, offset)| *offset)
        })
    }

    /// Reads the latest logged image of `page_id` visible at `read_version`.
    ///
    /// Returns `None` if the log holds no such image and the data file is
    /// authoritative.
    pub fn read_page(&self, page_id: PageId, read_version: Version) -> CoreResult<Option<PageBuffer>> {
        let _log = self.locks.shared(LockKey::Log)?;
        let Some(offset) = self.find(page_id, read_version) else {
            return Ok(None);
        };
        let record = self.read_record(page_id, offset)?;
        let mut page = self.disk.new_page();
        page.copy_from_slice(&record.page);
        Ok(Some(page))
    }

    /// Folds logged pages back into the data file.
    ///
    /// Returns the number of pages folded. See [`CheckpointMode`] for what
    /// each mode folds. The log is then cut down to the records still
    /// indexed, which is nothing once the index is empty. If anything fails
    /// before the new log is in place the index is left unchanged.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` for a `Shutdown` checkpoint while transactions
    ///   are still active after waiting the lock timeout
    /// - `LockTimeout` if the exclusive `Log` lock is not granted in time
    /// - `ReadOnly` in read-only mode
    pub fn checkpoint(
        &self,
        header: &HeaderCell,
        mode: CheckpointMode,
        active: &dyn ActiveTransactions,
    ) -> CoreResult<usize> {
        if mode == CheckpointMode::Shutdown {
            let remaining = active.wait_until_empty(self.locks.timeout());
            if remaining > 0 {
                return Err(CoreError::invalid_operation(format!(
                    "shutdown checkpoint with {remaining} active transactions"
                )));
            }
        }

        let _log = self.locks.exclusive(LockKey::Log)?;
        let horizon = match mode {
            CheckpointMode::Shutdown => {
                let count = active.active_count();
                if count > 0 {
                    return Err(CoreError::invalid_operation(format!(
                        "shutdown checkpoint with {count} active transactions"
                    )));
                }
                None
            }
            CheckpointMode::Incremental => active.oldest_read_version(),
        };

        let mut candidates: Vec<(PageId, u64)> = self
            .state
            .read()
            .pages
            .iter()
            .filter_map(|(page_id, entries)| {
                let (newest, offset) = *entries.last()?;
                horizon
                    .map_or(true, |h| newest <= h)
                    .then_some((*page_id, offset))
            })
            .collect();
        candidates.sort_unstable();

        let mut held: Vec<LockGuard> = Vec::with_capacity(candidates.len());
        let mut folded = Vec::with_capacity(candidates.len());
        for (page_id, offset) in candidates {
            let key = if page_id == PageId::HEADER {
                LockKey::Header
            } else {
                LockKey::Page(page_id)
            };
            let Some(guard) = self.locks.try_exclusive(key)? else {
                debug!(page = %page_id, "page busy, not folded");
                continue;
            };

            let image = if page_id == PageId::HEADER && mode == CheckpointMode::Shutdown {
                header.snapshot().encode()
            } else {
                self.read_record(page_id, offset)?.page
            };
            let mut page = self.disk.new_page();
            page.copy_from_slice(&image);
            self.disk.write_page(page_id, page)?;

            held.push(guard);
            folded.push(page_id);
        }
        self.disk.wait_for_queue()?;

        let folded_set: HashSet<PageId> = folded.iter().copied().collect();
        let kept = self.compact_log(self.surviving_entries(&folded_set, horizon))?;
        self.state.write().pages = kept;
        drop(held);

        info!(?mode, folded = folded.len(), remaining = self.len(), "checkpoint finished");
        Ok(folded.len())
    }

    /// Number of pages with logged images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().pages.len()
    }

    /// Returns `true` if no page has a logged image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version of the latest confirmed transaction.
    #[must_use]
    pub fn current_version(&self) -> Version {
        self.state.read().version
    }

    /// Page ids with logged images, in ascending order.
    #[must_use]
    pub fn pages(&self) -> Vec<PageId> {
        let mut pages: Vec<PageId> = self.state.read().pages.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Entries that stay indexed once `folded` pages leave the index.
    ///
    /// For every other page this is the newest entry at or below `horizon`
    /// and everything newer; older entries are invisible to every reader.
    fn surviving_entries(&self, folded: &HashSet<PageId>, horizon: Option<Version>) -> PageEntries {
        self.state
            .read()
            .pages
            .iter()
            .filter(|(page_id, _)| !folded.contains(*page_id))
            .map(|(page_id, entries)| {
                let first = entries
                    .iter()
                    .rposition(|(version, _)| horizon.map_or(true, |h| *version <= h))
                    .unwrap_or(0);
                (*page_id, entries[first..].to_vec())
            })
            .collect()
    }

    /// Rewrites the log to hold only the records `kept` points at, in their
    /// original order, and returns `kept` with the new offsets.
    ///
    /// The last kept record of each transaction carries the confirmed flag,
    /// so restoring the new log indexes exactly the kept records. The log
    /// is left alone if it already holds nothing else.
    fn compact_log(&self, kept: PageEntries) -> CoreResult<PageEntries> {
        if kept.is_empty() {
            if self.disk.log_length() > 0 {
                self.disk.truncate_log(0)?;
            }
            return Ok(kept);
        }

        let mut order: Vec<(u64, PageId)> = kept
            .iter()
            .flat_map(|(page_id, entries)| entries.iter().map(move |(_, offset)| (*offset, *page_id)))
            .collect();
        let before = self.disk.log_length();
        if (order.len() * RECORD_SIZE) as u64 == before {
            return Ok(kept);
        }
        order.sort_unstable();

        let mut records = order
            .iter()
            .map(|(offset, page_id)| self.read_record(*page_id, *offset))
            .collect::<CoreResult<Vec<_>>>()?;
        let last_of_txn: HashMap<TransactionId, usize> = records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.txn_id, i))
            .collect();

        let mut bytes = Vec::with_capacity(records.len() * RECORD_SIZE);
        let mut moved = HashMap::with_capacity(records.len());
        for (i, (record, (offset, _))) in records.iter_mut().zip(&order).enumerate() {
            record.confirmed = last_of_txn.get(&record.txn_id) == Some(&i);
            moved.insert(*offset, bytes.len() as u64);
            bytes.extend_from_slice(&record.encode());
        }
        self.disk.replace_log(&bytes)?;
        debug!(records = records.len(), before, after = bytes.len(), "log compacted");

        Ok(kept
            .into_iter()
            .map(|(page_id, entries)| {
                let entries = entries
                    .into_iter()
                    .map(|(version, offset)| (version, moved.get(&offset).copied().unwrap_or(offset)))
                    .collect();
                (page_id, entries)
            })
            .collect())
    }

    fn read_record(&self, page_id: PageId, offset: u64) -> CoreResult<LogRecord> {
        let bytes = self.disk.read_log(offset, RECORD_SIZE)?;
        let record = LogRecord::decode(&bytes)?;
        if record.page_id != page_id {
            return Err(CoreError::recovery(format!(
                "log offset {offset} holds {} instead of {page_id}",
                record.page_id
            )));
        }
        Ok(record)
    }
}

impl std::fmt::Debug for WalIndexService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalIndexService")
            .field("pages", &self.len())
            .field("version", &self.current_version())
            .finish_non_exhaustive()
    }
}
